// SPDX-License-Identifier: PMPL-1.0-or-later
//! Dark-pattern auditor - manipulative language in visible text
//!
//! Detection is two-tier. The auditor holds a fixed, ordered pair of
//! [`DetectionStrategy`] values and uses the first one that works:
//!
//! 1. a text classifier (HTTP text-classification endpoint by default)
//! 2. a deterministic keyword lexicon
//!
//! Falling through to the lexicon marks the outcome
//! `Degraded(ClassifierUnavailable)`. Keyword matches carry the matched
//! phrase and never a confidence.

use super::{Auditor, EngineError};
use crate::collector::text::split_segments;
use crate::collector::InputBundle;
use crate::config::{ClassifierConfig, DarkPatternConfig};
use crate::fleet::{Finding, FindingKind, Severity};
use crate::outcome::{AuditKind, AuditOutcome, DegradationReason, FailureReason};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Top label for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

/// Text-classifier seam for the primary tier
#[async_trait]
pub trait TextClassifier: Send + Sync {
    /// Human-readable name of this classifier
    fn name(&self) -> &str;

    /// Whether the classifier can be used at all
    async fn is_available(&self) -> bool {
        true
    }

    /// Classify every segment, returning one top label per segment in order
    async fn classify(&self, segments: &[String]) -> Result<Vec<Classification>, EngineError>;
}

/// Curated phrases per manipulative-language category
#[derive(Debug, Clone, PartialEq)]
pub struct Lexicon {
    categories: Vec<(String, Vec<String>)>,
}

impl Lexicon {
    pub fn new(categories: &BTreeMap<String, Vec<String>>) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|(category, phrases)| {
                    let phrases = phrases
                        .iter()
                        .map(|p| normalize(p))
                        .filter(|p| !p.is_empty())
                        .collect();
                    (category.clone(), phrases)
                })
                .collect(),
        }
    }

    /// First category with a phrase contained in `segment`, and that phrase
    pub fn find(&self, segment: &str) -> Option<(&str, &str)> {
        let haystack = normalize(segment);
        self.categories.iter().find_map(|(category, phrases)| {
            phrases
                .iter()
                .find(|phrase| haystack.contains(phrase.as_str()))
                .map(|phrase| (category.as_str(), phrase.as_str()))
        })
    }
}

fn normalize(s: &str) -> String {
    s.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

/// One detection tier
pub enum DetectionStrategy {
    /// Primary tier; `None` when no classifier is configured
    Classifier(Option<Arc<dyn TextClassifier>>),
    /// Fallback tier
    Lexicon(Lexicon),
}

/// Which tier produced the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTier {
    Classifier,
    Lexicon,
}

/// Why a segment was flagged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Evidence {
    Classifier { confidence: f64 },
    Keyword { matched_phrase: String },
}

/// A flagged text segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DarkPatternFlag {
    /// Zero-based index into the segment list
    pub segment_index: usize,
    pub segment: String,
    pub category: String,
    pub evidence: Evidence,
}

/// Payload of a dark-pattern outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkPatternData {
    pub tier: DetectionTier,
    pub segments_total: usize,
    pub flags: Vec<DarkPatternFlag>,
}

/// Auditor for manipulative-language risk
pub struct DarkPatternAuditor {
    strategies: [DetectionStrategy; 2],
    labels: Vec<String>,
    threshold: f64,
    min_segment_chars: usize,
}

impl DarkPatternAuditor {
    pub fn new(classifier: Option<Arc<dyn TextClassifier>>, config: &DarkPatternConfig) -> Self {
        Self {
            strategies: [
                DetectionStrategy::Classifier(classifier),
                DetectionStrategy::Lexicon(Lexicon::new(&config.lexicon)),
            ],
            labels: config.classifier.labels.clone(),
            threshold: config.classifier.threshold,
            min_segment_chars: config.min_segment_chars,
        }
    }

    /// Auditor using [`HttpClassifier`] when an endpoint is configured
    pub fn from_config(config: &DarkPatternConfig) -> Self {
        let classifier = HttpClassifier::from_config(&config.classifier)
            .map(|c| Arc::new(c) as Arc<dyn TextClassifier>);
        Self::new(classifier, config)
    }

    /// Configured label matching a raw classifier label, if any
    fn dark_label(&self, raw: &str) -> Option<&str> {
        let label = raw.trim();
        let label = label.strip_prefix("LABEL_").unwrap_or(label).trim();
        self.labels
            .iter()
            .find(|l| l.eq_ignore_ascii_case(label))
            .map(String::as_str)
    }

    async fn run_classifier(
        &self,
        classifier: &dyn TextClassifier,
        segments: &[String],
    ) -> Result<Vec<DarkPatternFlag>, EngineError> {
        if !classifier.is_available().await {
            return Err(EngineError::Unavailable(format!(
                "{} reports unavailable",
                classifier.name()
            )));
        }
        let classifications = classifier.classify(segments).await?;
        if classifications.len() != segments.len() {
            return Err(EngineError::InvalidResponse(format!(
                "{} labels for {} segments",
                classifications.len(),
                segments.len()
            )));
        }

        Ok(segments
            .iter()
            .zip(classifications)
            .enumerate()
            .filter(|(_, (_, c))| c.confidence >= self.threshold)
            .filter_map(|(idx, (segment, c))| {
                self.dark_label(&c.label).map(|category| DarkPatternFlag {
                    segment_index: idx,
                    segment: segment.clone(),
                    category: category.to_string(),
                    evidence: Evidence::Classifier {
                        confidence: c.confidence,
                    },
                })
            })
            .collect())
    }
}

fn run_lexicon(lexicon: &Lexicon, segments: &[String]) -> Vec<DarkPatternFlag> {
    segments
        .iter()
        .enumerate()
        .filter_map(|(idx, segment)| {
            lexicon.find(segment).map(|(category, phrase)| DarkPatternFlag {
                segment_index: idx,
                segment: segment.clone(),
                category: category.to_string(),
                evidence: Evidence::Keyword {
                    matched_phrase: phrase.to_string(),
                },
            })
        })
        .collect()
}

fn slug(category: &str) -> String {
    category
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn excerpt(segment: &str) -> String {
    const MAX: usize = 80;
    if segment.chars().count() <= MAX {
        segment.to_string()
    } else {
        let cut: String = segment.chars().take(MAX).collect();
        format!("{}...", cut.trim_end())
    }
}

fn to_finding(flag: &DarkPatternFlag) -> Finding {
    let finding = Finding::new(
        AuditKind::DarkPatterns,
        FindingKind::ManipulativeLanguage,
        &format!("dark-pattern-{}", slug(&flag.category)),
        Severity::Moderate,
        &format!("\"{}\" reads as {}", excerpt(&flag.segment), flag.category),
    )
    .with_location(&format!("segment {}", flag.segment_index + 1))
    .with_category(&flag.category)
    .with_suggestion("Rephrase neutrally; state facts without pressure, shame or hidden defaults");
    match &flag.evidence {
        Evidence::Classifier { confidence } => finding.with_confidence(*confidence),
        Evidence::Keyword { matched_phrase } => finding.with_matched_phrase(matched_phrase),
    }
}

#[async_trait]
impl Auditor for DarkPatternAuditor {
    type Data = DarkPatternData;

    fn kind(&self) -> AuditKind {
        AuditKind::DarkPatterns
    }

    async fn audit(&self, bundle: &InputBundle) -> AuditOutcome<DarkPatternData> {
        let Some(text) = bundle.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            debug!("No visible text in bundle");
            return AuditOutcome::failed(FailureReason::NoTextContent);
        };
        let segments = split_segments(text, self.min_segment_chars);
        if segments.is_empty() {
            return AuditOutcome::failed_with(
                FailureReason::NoTextContent,
                format!("no segments of at least {} characters", self.min_segment_chars),
            );
        }

        for (position, strategy) in self.strategies.iter().enumerate() {
            let (tier, flags) = match strategy {
                DetectionStrategy::Classifier(None) => {
                    debug!("No classifier configured");
                    continue;
                }
                DetectionStrategy::Classifier(Some(classifier)) => {
                    match self.run_classifier(classifier.as_ref(), &segments).await {
                        Ok(flags) => (DetectionTier::Classifier, flags),
                        Err(e) => {
                            warn!("Classifier {} unusable: {}", classifier.name(), e);
                            continue;
                        }
                    }
                }
                DetectionStrategy::Lexicon(lexicon) => {
                    (DetectionTier::Lexicon, run_lexicon(lexicon, &segments))
                }
            };

            let total = segments.len();
            let score = 1.0 - flags.len() as f64 / total as f64;
            let findings = flags.iter().map(to_finding).collect();
            let data = DarkPatternData {
                tier,
                segments_total: total,
                flags,
            };
            debug!(?tier, total, flagged = data.flags.len(), "Dark-pattern detection done");

            return if position == 0 {
                AuditOutcome::success(data, score, findings)
            } else {
                info!("Dark-pattern audit fell back to {:?}", tier);
                AuditOutcome::degraded(data, score, DegradationReason::ClassifierUnavailable, findings)
            };
        }

        AuditOutcome::failed_with(FailureReason::EngineError, "no detection tier produced a result")
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a [String],
}

/// Primary tier backed by a text-classification HTTP endpoint.
///
/// Posts `{"inputs": [...segments]}` and accepts either one
/// `{label, score}` object per segment or, per segment, a list of candidate
/// labels of which the highest-scoring one is taken.
pub struct HttpClassifier {
    client: Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            token,
            timeout,
        }
    }

    /// Classifier for the configured endpoint; `None` when no endpoint is set
    pub fn from_config(config: &ClassifierConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?.trim();
        if endpoint.is_empty() {
            return None;
        }
        let token = std::env::var(&config.api_key_env)
            .ok()
            .filter(|t| !t.is_empty());
        Some(Self::new(
            endpoint,
            token,
            Duration::from_secs(config.request_timeout_secs),
        ))
    }
}

fn parse_candidate(value: &Value) -> Option<Classification> {
    Some(Classification {
        label: value.get("label")?.as_str()?.to_string(),
        confidence: value.get("score")?.as_f64()?,
    })
}

/// Parse a classification response into one top label per entry
fn parse_classifications(body: &Value) -> Result<Vec<Classification>, EngineError> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(EngineError::Unavailable(error.to_string()));
    }
    let entries = body
        .as_array()
        .ok_or_else(|| EngineError::InvalidResponse("expected a JSON array".to_string()))?;

    entries
        .iter()
        .map(|entry| {
            let top = match entry {
                Value::Array(candidates) => candidates
                    .iter()
                    .filter_map(parse_candidate)
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence)),
                other => parse_candidate(other),
            };
            top.ok_or_else(|| {
                EngineError::InvalidResponse(format!("no label/score in {}", entry))
            })
        })
        .collect()
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    fn name(&self) -> &str {
        "http-classifier"
    }

    async fn classify(&self, segments: &[String]) -> Result<Vec<Classification>, EngineError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { inputs: segments })
            .timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(EngineError::Unavailable(format!("classifier returned {}", status)));
        }
        if !status.is_success() {
            return Err(EngineError::Execution(format!("classifier returned {}", status)));
        }

        let body: Value = response.json().await?;
        parse_classifications(&body)
    }
}
