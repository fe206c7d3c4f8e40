// SPDX-License-Identifier: PMPL-1.0-or-later
//! Narrative enrichment.
//!
//! A [`NarrativeService`] may turn a completed run into prose. The service is
//! optional and untrusted: the [`Reporter`] tries it and falls back to the
//! template narrative on any failure, so enrichment can only change the
//! wording of a report, never a score or a finding.

use crate::config::NarrativeConfig;
use crate::error::Result;
use crate::orchestrator::AuditRun;
use crate::outcome::AuditKind;
use crate::report::{self, OutputFormat};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Visible-text budget passed to the service
const MARKUP_EXCERPT_CHARS: usize = 4000;

const SYSTEM_PREAMBLE: &str = "You are an expert in web accessibility, inclusive design and \
ethical UX. Provide clear, actionable insights that help teams build better, more accessible \
products.";

/// Narrative service failures
#[derive(Error, Debug)]
pub enum NarrativeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service returned no text")]
    EmptyResponse,
}

/// Inputs handed to a narrative service
#[derive(Debug, Clone, Copy)]
pub struct NarrativeRequest<'a> {
    pub image_path: Option<&'a Path>,
    pub markup: Option<&'a str>,
    pub run: &'a AuditRun,
}

impl<'a> NarrativeRequest<'a> {
    pub fn from_run(run: &'a AuditRun) -> Self {
        Self {
            image_path: run.bundle.as_ref().map(|b| b.image_path.as_path()),
            markup: run.bundle.as_ref().and_then(|b| b.text.as_deref()),
            run,
        }
    }
}

/// Generative narrative seam
#[async_trait]
pub trait NarrativeService: Send + Sync {
    /// Human-readable name of this service
    fn name(&self) -> &str;

    /// Produce a narrative for a completed run
    async fn narrate(&self, request: NarrativeRequest<'_>) -> std::result::Result<String, NarrativeError>;
}

/// Where a narrative came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    Generative,
    Template,
}

/// Executive-summary prose for a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub source: NarrativeSource,
    pub text: String,
}

impl Narrative {
    /// Deterministic narrative rendered from the run alone
    pub fn template(run: &AuditRun) -> Self {
        Self {
            source: NarrativeSource::Template,
            text: template_text(run),
        }
    }
}

fn template_text(run: &AuditRun) -> String {
    let (Some(fused), Some(outcomes)) = (&run.fused, &run.outcomes) else {
        return match run.abort_reason() {
            Some(reason) => format!(
                "The audit of {} did not complete: {}. No design fairness score was produced.",
                run.subject, reason
            ),
            None => format!("The audit of {} has not completed.", run.subject),
        };
    };

    let mut text = format!(
        "The interface at {} received a Design Fairness Score of {:.2} ({}).",
        run.subject,
        fused.overall,
        fused.assessment().label()
    );

    let scored: Vec<String> = AuditKind::all()
        .into_iter()
        .filter_map(|kind| {
            outcomes
                .summary(kind)
                .score
                .map(|s| format!("{} {:.2}", kind.label(), s))
        })
        .collect();
    if !scored.is_empty() {
        text.push_str(&format!(" Subscores: {}.", scored.join(", ")));
    }

    let findings = run.findings();
    if findings.is_empty() {
        text.push_str(" No issues were found by the automated checks.");
    } else {
        let blocking = findings
            .findings
            .iter()
            .filter(|f| f.severity.is_blocking())
            .count();
        text.push_str(&format!(
            " {} issue(s) were found, {} of them critical.",
            findings.len(),
            blocking
        ));
    }

    if !fused.is_full_coverage() {
        text.push_str(
            " Not every audit ran at full fidelity; see the coverage section before relying on \
             the overall score.",
        );
    }
    text
}

fn build_prompt(request: &NarrativeRequest<'_>) -> String {
    let run = request.run;
    let mut prompt = format!("{}\n\n", SYSTEM_PREAMBLE);
    prompt.push_str(&format!("Audit subject: {}\n", run.subject));
    if let Some(fused) = &run.fused {
        prompt.push_str(&format!(
            "Overall Design Fairness Score: {:.2}/1.0\n",
            fused.overall
        ));
    }
    if let Some(outcomes) = &run.outcomes {
        for kind in AuditKind::all() {
            let summary = outcomes.summary(kind);
            prompt.push_str(&format!(
                "- {}: {} (score {}, {} finding(s))\n",
                kind.label(),
                summary.status,
                report::format_score(summary.score),
                summary.findings
            ));
        }
    }

    let findings = run.findings();
    if !findings.is_empty() {
        prompt.push_str("\nFindings:\n");
        for finding in findings.findings.iter().take(40) {
            prompt.push_str(&format!(
                "- [{}] {} at {}: {}\n",
                finding.severity,
                finding.rule_id,
                finding.location_string(),
                finding.message
            ));
        }
    }

    if let Some(path) = request.image_path {
        prompt.push_str(&format!("\nScreenshot artifact: {}\n", path.display()));
    }
    if let Some(text) = request.markup {
        let excerpt: String = text.chars().take(MARKUP_EXCERPT_CHARS).collect();
        prompt.push_str(&format!("\nVisible page text:\n{}\n", excerpt));
    }

    prompt.push_str(
        "\nWrite a short executive summary of these results, then a prioritised action plan \
         (quick wins, medium term, long term). Do not restate the scores as a table.",
    );
    prompt
}

/// Narrative service backed by a Gemini-style `generateContent` endpoint
pub struct GenerativeNarrator {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    temperature: f64,
    max_tokens: u32,
    timeout: Duration,
}

impl GenerativeNarrator {
    pub fn new(config: &NarrativeConfig, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Narrator for the configured service; `None` when disabled or keyless
    pub fn from_config(config: &NarrativeConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Some(Self::new(config, key.trim())),
            _ => {
                debug!("{} not set, narrative enrichment disabled", config.api_key_env);
                None
            }
        }
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Concatenated text parts of the first candidate
fn response_text(body: &Value) -> Option<String> {
    let parts = body
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[async_trait]
impl NarrativeService for GenerativeNarrator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn narrate(&self, request: NarrativeRequest<'_>) -> std::result::Result<String, NarrativeError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": build_prompt(&request) }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            },
        });

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NarrativeError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let body: Value = response.json().await?;
        response_text(&body).ok_or(NarrativeError::EmptyResponse)
    }
}

/// Reporting collaborator: narrative with template fallback, then emission
#[derive(Clone, Default)]
pub struct Reporter {
    service: Option<Arc<dyn NarrativeService>>,
}

impl Reporter {
    pub fn new(service: Option<Arc<dyn NarrativeService>>) -> Self {
        Self { service }
    }

    /// Reporter that never calls a narrative service
    pub fn template_only() -> Self {
        Self { service: None }
    }

    pub fn from_config(config: &NarrativeConfig) -> Self {
        Self::new(
            GenerativeNarrator::from_config(config).map(|n| Arc::new(n) as Arc<dyn NarrativeService>),
        )
    }

    /// Narrative for `run`; generative when available, template otherwise
    pub async fn narrative(&self, run: &AuditRun) -> Narrative {
        let Some(service) = self.service.as_ref().filter(|_| run.is_done()) else {
            return Narrative::template(run);
        };

        match service.narrate(NarrativeRequest::from_run(run)).await {
            Ok(text) if !text.trim().is_empty() => {
                info!("Narrative generated by {}", service.name());
                Narrative {
                    source: NarrativeSource::Generative,
                    text,
                }
            }
            Ok(_) => {
                warn!("Narrative service {} returned nothing; using template", service.name());
                Narrative::template(run)
            }
            Err(e) => {
                warn!("Narrative service {} failed: {}; using template", service.name(), e);
                Narrative::template(run)
            }
        }
    }

    /// Build the narrative and write every selected format into `dir`
    pub async fn emit(
        &self,
        run: &AuditRun,
        dir: &Path,
        formats: &[OutputFormat],
    ) -> Result<Vec<PathBuf>> {
        let narrative = self.narrative(run).await;
        report::emit(run, dir, formats, &narrative)
    }
}
