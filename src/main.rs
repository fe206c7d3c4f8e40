// SPDX-License-Identifier: PMPL-1.0-or-later
//! Fairnessbot CLI - design fairness audits for a single interface
//!
//! Part of the gitbot-fleet ecosystem.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fairnessbot::collector::{CollectOptions, InputMode};
use fairnessbot::config::{load_config, write_default_config};
use fairnessbot::report::{generate_report, Narrative, OutputFormat, Reporter};
use fairnessbot::{AuditKind, AuditRun, Config, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Accessibility, contrast and dark-pattern audits fused into one score
#[derive(Parser)]
#[command(name = "fairnessbot")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Configuration file (defaults apply when absent)
    #[arg(long, default_value = "fairnessbot.toml")]
    config: PathBuf,

    /// Directory for captured artifacts and reports
    #[arg(long, default_value = "out")]
    output_dir: PathBuf,

    /// Accessibility weight
    #[arg(long)]
    alpha: Option<f64>,

    /// Contrast weight
    #[arg(long)]
    beta: Option<f64>,

    /// Dark-pattern weight
    #[arg(long)]
    gamma: Option<f64>,

    /// Report formats to write (repeatable); overrides the config
    #[arg(long)]
    format: Vec<OutputFormat>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and audit a live address
    Url {
        /// Address to audit
        address: String,

        /// Previously captured screenshot to audit if the browser is unavailable
        #[arg(long)]
        fallback_image: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Audit a pre-captured screenshot
    Screenshot {
        /// PNG or JPEG screenshot
        path: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination path
        #[arg(default_value = "fairnessbot.toml")]
        path: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("fairnessbot=debug")
    } else {
        EnvFilter::new("fairnessbot=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load the config file and apply the weight flags
fn build_config(args: &RunArgs) -> anyhow::Result<Arc<Config>> {
    let mut config = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let overrides = [
        (AuditKind::Accessibility, args.alpha),
        (AuditKind::Contrast, args.beta),
        (AuditKind::DarkPatterns, args.gamma),
    ];
    for (kind, weight) in overrides {
        if let Some(weight) = weight {
            config.weights.set(kind, weight);
        }
    }
    if !args.format.is_empty() {
        config.output.formats = args.format.clone();
    }
    config.validate()?;

    Ok(Arc::new(config))
}

async fn run_audit(
    mode: InputMode,
    value: &str,
    fallback_image: Option<&Path>,
    args: &RunArgs,
) -> anyhow::Result<AuditRun> {
    let config = build_config(args)?;

    let mut options = CollectOptions::new(&args.output_dir);
    if let Some(path) = fallback_image {
        options = options.with_fallback_image(path);
    }

    let orchestrator = Orchestrator::new(Arc::clone(&config));
    let run = orchestrator.run(mode, value, &options).await;
    info!("Audit of {} finished in state {}", run.subject, run.state);

    let reporter = Reporter::from_config(&config.narrative);
    let written = reporter
        .emit(&run, &args.output_dir, &config.output.formats)
        .await?;
    for path in &written {
        eprintln!("Report written to {}", path.display());
    }

    Ok(run)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let run = match cli.command {
        Commands::Url { address, fallback_image, run } => {
            init_logging(run.verbose);
            run_audit(InputMode::Live, &address, fallback_image.as_deref(), &run).await?
        }

        Commands::Screenshot { path, run } => {
            init_logging(run.verbose);
            let value = path.to_string_lossy().into_owned();
            run_audit(InputMode::StaticImage, &value, None, &run).await?
        }

        Commands::InitConfig { path } => {
            write_default_config(&path)?;
            eprintln!("Default configuration written to {}", path.display());
            return Ok(());
        }
    };

    let narrative = Narrative::template(&run);
    println!("{}", generate_report(&run, OutputFormat::Text, &narrative)?);

    if run.abort_reason().is_some() {
        std::process::exit(2);
    }

    Ok(())
}
