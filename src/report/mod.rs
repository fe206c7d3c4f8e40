// SPDX-License-Identifier: PMPL-1.0-or-later
//! Report generation for audit runs.
//!
//! Supports multiple output formats:
//! - Text: console summary with findings grouped by severity
//! - JSON: the complete `AuditRun` for programmatic consumption
//! - Markdown: narrative report with methodology and coverage disclosure
//! - SARIF: Static Analysis Results Interchange Format for IDE/CI integration
//!
//! Every format discloses which audits were degraded or excluded; a fused
//! score is never shown without its coverage.

pub mod markdown;
pub mod narrative;
pub mod sarif;

use crate::error::Result;
use crate::fleet::Severity;
use crate::orchestrator::AuditRun;
use crate::outcome::{AuditKind, OutcomeStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub use narrative::{
    GenerativeNarrator, Narrative, NarrativeError, NarrativeRequest, NarrativeService,
    NarrativeSource, Reporter,
};

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// The full audit run as JSON
    Json,
    /// Markdown report
    Markdown,
    /// SARIF for IDE/CI integration
    Sarif,
}

impl OutputFormat {
    /// File name the format is written to by [`emit`]
    pub fn file_name(&self) -> &'static str {
        match self {
            OutputFormat::Text => "audit.txt",
            OutputFormat::Json => "audit.json",
            OutputFormat::Markdown => "audit_report.md",
            OutputFormat::Sarif => "audit.sarif",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Sarif => write!(f, "sarif"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "sarif" => Ok(OutputFormat::Sarif),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

/// Priority of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "HIGH"),
            Priority::Medium => write!(f, "MEDIUM"),
        }
    }
}

/// A rule-based recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub area: String,
    pub action: String,
    pub impact: String,
}

impl Recommendation {
    fn new(priority: Priority, area: &str, action: &str, impact: &str) -> Self {
        Self {
            priority,
            area: area.to_string(),
            action: action.to_string(),
            impact: impact.to_string(),
        }
    }
}

/// Recommendations derived from the outcomes.
///
/// Failed audits contribute nothing; the user-testing recommendation is
/// always present.
pub fn recommendations(run: &AuditRun) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if let Some(outcomes) = &run.outcomes {
        if outcomes.accessibility.score().is_some_and(|s| s < 0.8) {
            recs.push(Recommendation::new(
                Priority::High,
                "Accessibility",
                "Address WCAG violations, focusing on critical and serious issues first",
                "Enables access for users with disabilities and reduces legal risk",
            ));
        }
        if !outcomes.contrast.findings().is_empty() {
            recs.push(Recommendation::new(
                Priority::High,
                "Visual Design",
                "Raise text contrast to WCAG AA (4.5:1 normal text, 3:1 large text)",
                "Keeps content readable for users with low vision and in poor lighting",
            ));
        }
        if outcomes.dark_patterns.score().is_some_and(|s| s < 0.8) {
            recs.push(Recommendation::new(
                Priority::Medium,
                "Ethical UX",
                "Remove or rephrase manipulative language and pre-selected defaults",
                "Builds user trust and avoids consumer-protection complaints",
            ));
        }
    }

    recs.push(Recommendation::new(
        Priority::Medium,
        "User Testing",
        "Run usability sessions with diverse users, including people with disabilities",
        "Validates fixes and uncovers issues automated checks cannot see",
    ));
    recs
}

/// One line per audit that did not contribute at full fidelity
pub fn coverage_notes(run: &AuditRun) -> Vec<String> {
    let Some(outcomes) = &run.outcomes else {
        return vec!["No audits ran".to_string()];
    };
    let mut notes = Vec::new();
    if run.image_only_fallback {
        notes.push(
            "Live capture was unavailable; a previously captured screenshot was audited"
                .to_string(),
        );
    }
    for kind in AuditKind::all() {
        let summary = outcomes.summary(kind);
        match summary.status {
            OutcomeStatus::Success => {}
            OutcomeStatus::Degraded => notes.push(format!(
                "{}: degraded ({})",
                kind.label(),
                summary
                    .degradation
                    .map(|r| r.to_string())
                    .unwrap_or_default()
            )),
            OutcomeStatus::Failed => notes.push(format!(
                "{}: excluded from the score ({})",
                kind.label(),
                summary.failure.map(|r| r.to_string()).unwrap_or_default()
            )),
        }
    }
    notes
}

/// Format an optional score for tables
pub(crate) fn format_score(score: Option<f64>) -> String {
    score
        .map(|s| format!("{:.2}", s))
        .unwrap_or_else(|| "n/a".to_string())
}

/// Generate a report in one format
pub fn generate_report(
    run: &AuditRun,
    format: OutputFormat,
    narrative: &Narrative,
) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => generate_text_report(run),
        OutputFormat::Json => generate_json_report(run)?,
        OutputFormat::Markdown => markdown::render(run, narrative),
        OutputFormat::Sarif => sarif::render(run),
    })
}

/// Generate human-readable text report
fn generate_text_report(run: &AuditRun) -> String {
    let mut output = String::new();

    output.push_str("=== Fairnessbot Design Fairness Report ===\n\n");
    output.push_str(&format!("Subject: {}\n", run.subject));
    output.push_str(&format!("State:   {}\n\n", run.state));

    if let Some(fused) = &run.fused {
        output.push_str(&format!(
            "Design Fairness Score: {:.2} ({})\n\n",
            fused.overall,
            fused.assessment().label()
        ));
    }

    if let Some(outcomes) = &run.outcomes {
        output.push_str(&format!(
            "{:<18} {:<9} {:>6} {:>8}\n",
            "Audit", "Status", "Score", "Weight"
        ));
        for kind in AuditKind::all() {
            let summary = outcomes.summary(kind);
            let weight = run
                .fused
                .as_ref()
                .map(|f| f.applied_weights.get(kind))
                .unwrap_or(0.0);
            output.push_str(&format!(
                "{:<18} {:<9} {:>6} {:>8.2}\n",
                kind.label(),
                summary.status.to_string(),
                format_score(summary.score),
                weight
            ));
        }
        output.push('\n');
    }

    let notes = coverage_notes(run);
    if !notes.is_empty() {
        output.push_str("Coverage:\n");
        for note in &notes {
            output.push_str(&format!("  - {}\n", note));
        }
        output.push('\n');
    }

    let findings = run.findings();
    if findings.is_empty() && run.outcomes.is_some() {
        output.push_str("No findings.\n\n");
    }
    for severity in Severity::all() {
        let sev_findings = findings.by_severity(severity);
        if sev_findings.is_empty() {
            continue;
        }

        output.push_str(&format!("--- {} ({}) ---\n", severity, sev_findings.len()));
        for finding in sev_findings {
            output.push_str(&format!("[{}] {}\n", finding.rule_id, finding.message));
            output.push_str(&format!("  Location: {}\n", finding.location_string()));
            if let Some(ref suggestion) = finding.suggestion {
                output.push_str(&format!("  Fix: {}\n", suggestion));
            }
            output.push('\n');
        }
    }

    match run.abort_reason() {
        Some(reason) => output.push_str(&format!("RESULT: ABORTED ({})\n", reason)),
        None if findings.has_blocking() => {
            output.push_str("RESULT: DONE (critical findings present)\n")
        }
        None => output.push_str("RESULT: DONE\n"),
    }

    output
}

/// Generate JSON report
fn generate_json_report(run: &AuditRun) -> Result<String> {
    Ok(serde_json::to_string_pretty(run)?)
}

/// Write the selected formats into `dir`, returning the written paths
pub fn emit(
    run: &AuditRun,
    dir: &Path,
    formats: &[OutputFormat],
    narrative: &Narrative,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(formats.len());
    for format in formats {
        let path = dir.join(format.file_name());
        std::fs::write(&path, generate_report(run, *format, narrative)?)?;
        info!("Wrote {} report to {}", format, path.display());
        written.push(path);
    }
    Ok(written)
}
