// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit outcome model.
//!
//! Every audit returns an [`AuditOutcome`]: `Success` and `Degraded` carry a
//! score in `[0, 1]` and the findings the audit produced, `Failed` carries
//! only a reason. Audit-local failures are data, never errors thrown past the
//! auditor boundary.

use crate::fleet::Finding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three independent audit dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// WCAG rule evaluation over markup
    Accessibility,
    /// Text/background contrast over the image
    Contrast,
    /// Manipulative-language detection over visible text
    DarkPatterns,
}

impl AuditKind {
    /// All audits in report order
    pub fn all() -> [AuditKind; 3] {
        [AuditKind::Accessibility, AuditKind::Contrast, AuditKind::DarkPatterns]
    }

    /// Stable machine name
    pub fn name(&self) -> &'static str {
        match self {
            AuditKind::Accessibility => "accessibility",
            AuditKind::Contrast => "contrast",
            AuditKind::DarkPatterns => "dark_patterns",
        }
    }

    /// Human-readable axis label
    pub fn label(&self) -> &'static str {
        match self {
            AuditKind::Accessibility => "Accessibility",
            AuditKind::Contrast => "Visual Contrast",
            AuditKind::DarkPatterns => "Ethical UX",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<AuditKind> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "accessibility" | "a11y" => Some(AuditKind::Accessibility),
            "contrast" => Some(AuditKind::Contrast),
            "dark_patterns" | "darkpatterns" | "ethics" => Some(AuditKind::DarkPatterns),
            _ => None,
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why an audit ran with reduced fidelity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationReason {
    /// Primary classifier unavailable; keyword lexicon used instead
    ClassifierUnavailable,
    /// No text/UI regions found; score is 1.0 by convention
    NoRegionsDetected,
}

impl fmt::Display for DegradationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationReason::ClassifierUnavailable => {
                write!(f, "classifier unavailable, keyword lexicon used")
            }
            DegradationReason::NoRegionsDetected => {
                write!(f, "no text regions detected")
            }
        }
    }
}

/// Why an audit could not produce a score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Accessibility rules need markup and none was collected
    MissingMarkup,
    /// No extractable text segments for dark-pattern detection
    NoTextContent,
    /// The analysis engine failed to execute
    EngineError,
    /// The audit exceeded its time budget or was cancelled
    Timeout,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MissingMarkup => write!(f, "no markup available"),
            FailureReason::NoTextContent => write!(f, "no text content"),
            FailureReason::EngineError => write!(f, "engine error"),
            FailureReason::Timeout => write!(f, "timed out"),
        }
    }
}

/// Tag of an outcome without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Degraded,
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Success => write!(f, "success"),
            OutcomeStatus::Degraded => write!(f, "degraded"),
            OutcomeStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running one audit once
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome<T> {
    Success {
        data: T,
        score: f64,
        findings: Vec<Finding>,
    },
    Degraded {
        data: T,
        score: f64,
        reason: DegradationReason,
        findings: Vec<Finding>,
    },
    Failed {
        reason: FailureReason,
        detail: Option<String>,
    },
}

/// Clamp a raw score into `[0, 1]`; NaN maps to 0
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

impl<T> AuditOutcome<T> {
    /// Successful outcome; the score is clamped into `[0, 1]`
    pub fn success(data: T, score: f64, findings: Vec<Finding>) -> Self {
        AuditOutcome::Success {
            data,
            score: clamp_score(score),
            findings,
        }
    }

    /// Degraded outcome; the score is clamped into `[0, 1]`
    pub fn degraded(data: T, score: f64, reason: DegradationReason, findings: Vec<Finding>) -> Self {
        AuditOutcome::Degraded {
            data,
            score: clamp_score(score),
            reason,
            findings,
        }
    }

    /// Failed outcome
    pub fn failed(reason: FailureReason) -> Self {
        AuditOutcome::Failed { reason, detail: None }
    }

    /// Failed outcome with a diagnostic message
    pub fn failed_with(reason: FailureReason, detail: impl Into<String>) -> Self {
        AuditOutcome::Failed {
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Outcome tag
    pub fn status(&self) -> OutcomeStatus {
        match self {
            AuditOutcome::Success { .. } => OutcomeStatus::Success,
            AuditOutcome::Degraded { .. } => OutcomeStatus::Degraded,
            AuditOutcome::Failed { .. } => OutcomeStatus::Failed,
        }
    }

    /// Score, present for `Success` and `Degraded`
    pub fn score(&self) -> Option<f64> {
        match self {
            AuditOutcome::Success { score, .. } | AuditOutcome::Degraded { score, .. } => {
                Some(*score)
            }
            AuditOutcome::Failed { .. } => None,
        }
    }

    /// Payload, present for `Success` and `Degraded`
    pub fn data(&self) -> Option<&T> {
        match self {
            AuditOutcome::Success { data, .. } | AuditOutcome::Degraded { data, .. } => Some(data),
            AuditOutcome::Failed { .. } => None,
        }
    }

    /// Findings owned by this outcome
    pub fn findings(&self) -> &[Finding] {
        match self {
            AuditOutcome::Success { findings, .. } | AuditOutcome::Degraded { findings, .. } => {
                findings
            }
            AuditOutcome::Failed { .. } => &[],
        }
    }

    /// Whether this outcome can take part in fusion
    pub fn is_usable(&self) -> bool {
        !matches!(self, AuditOutcome::Failed { .. })
    }

    pub fn degradation_reason(&self) -> Option<DegradationReason> {
        match self {
            AuditOutcome::Degraded { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            AuditOutcome::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Payload-free view used by the fusion engine and reports
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            status: self.status(),
            score: self.score(),
            degradation: self.degradation_reason(),
            failure: self.failure_reason(),
            findings: self.findings().len(),
        }
    }
}

/// Payload-free projection of an [`AuditOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub status: OutcomeStatus,
    pub score: Option<f64>,
    pub degradation: Option<DegradationReason>,
    pub failure: Option<FailureReason>,
    pub findings: usize,
}

impl OutcomeSummary {
    pub fn is_usable(&self) -> bool {
        self.status != OutcomeStatus::Failed && self.score.is_some()
    }
}
