// SPDX-License-Identifier: PMPL-1.0-or-later
//! Finding types shared by every audit.
//!
//! The shape mirrors the gitbot-shared-context finding model so a fleet
//! coordinator can consume fairnessbot output, with the location widened to a
//! free-form descriptor (CSS selector, pixel region or text span) because the
//! audited subject is a rendered page rather than a source file.

use crate::outcome::AuditKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordinal severity of a finding, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or best-practice issue
    Minor,
    /// Noticeable barrier with a workaround
    Moderate,
    /// Significant barrier for some users
    Serious,
    /// Blocks some users entirely
    Critical,
}

impl Severity {
    /// All severities, most severe first
    pub fn all() -> [Severity; 4] {
        [Severity::Critical, Severity::Serious, Severity::Moderate, Severity::Minor]
    }

    /// Parse an axe-style impact label
    pub fn from_impact(impact: &str) -> Option<Severity> {
        match impact.trim().to_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "serious" => Some(Severity::Serious),
            "moderate" => Some(Severity::Moderate),
            "minor" => Some(Severity::Minor),
            _ => None,
        }
    }

    /// Whether this severity should be called out as blocking
    pub fn is_blocking(&self) -> bool {
        matches!(self, Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Critical => write!(f, "CRITICAL"),
            Severity::Serious => write!(f, "SERIOUS"),
            Severity::Moderate => write!(f, "MODERATE"),
            Severity::Minor => write!(f, "MINOR"),
        }
    }
}

/// What kind of problem a finding describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    /// A WCAG rule evaluated against the markup failed
    RuleViolation,
    /// A detected text region is below its required contrast ratio
    LowContrast,
    /// A text segment reads as manipulative
    ManipulativeLanguage,
}

/// A single finding attached to an audit outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Unique identifier
    pub id: Uuid,
    /// Audit that produced this finding
    pub audit: AuditKind,
    /// Finding kind
    pub kind: FindingKind,
    /// Rule/check identifier (e.g., "image-alt", "contrast-normal-text")
    pub rule_id: String,
    /// Severity level
    pub severity: Severity,
    /// Where the problem is: selector, pixel region or text span
    pub location: String,
    /// Human-readable message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
    /// Dark-pattern or rule category
    pub category: Option<String>,
    /// Measured contrast ratio
    pub measured_ratio: Option<f64>,
    /// Required contrast ratio
    pub required_ratio: Option<f64>,
    /// Classifier confidence; absent for deterministic matches
    pub confidence: Option<f64>,
    /// Lexicon phrase that triggered a keyword match
    pub matched_phrase: Option<String>,
    /// Reference documentation
    pub help_url: Option<String>,
    /// When this finding was created
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Create a new finding
    pub fn new(
        audit: AuditKind,
        kind: FindingKind,
        rule_id: &str,
        severity: Severity,
        message: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            audit,
            kind,
            rule_id: rule_id.to_string(),
            severity,
            location: String::new(),
            message: message.to_string(),
            suggestion: None,
            category: None,
            measured_ratio: None,
            required_ratio: None,
            confidence: None,
            matched_phrase: None,
            help_url: None,
            created_at: Utc::now(),
        }
    }

    /// Set the location descriptor
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    /// Set suggestion
    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }

    /// Set the category
    pub fn with_category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }

    /// Attach measured and required contrast ratios
    pub fn with_ratios(mut self, measured: f64, required: f64) -> Self {
        self.measured_ratio = Some(measured);
        self.required_ratio = Some(required);
        self
    }

    /// Attach a classifier confidence
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Attach the lexicon phrase that matched
    pub fn with_matched_phrase(mut self, phrase: &str) -> Self {
        self.matched_phrase = Some(phrase.to_string());
        self
    }

    /// Attach a help URL
    pub fn with_help_url(mut self, url: &str) -> Self {
        self.help_url = Some(url.to_string());
        self
    }

    /// Get location string for display
    pub fn location_string(&self) -> String {
        if self.location.is_empty() {
            "<page>".to_string()
        } else {
            self.location.clone()
        }
    }
}

/// A collection of findings with aggregation methods
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingSet {
    /// All findings
    pub findings: Vec<Finding>,
}

impl FindingSet {
    /// Create empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding
    pub fn add(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    /// Extend with findings from an iterator
    pub fn extend(&mut self, findings: impl IntoIterator<Item = Finding>) {
        self.findings.extend(findings);
    }

    /// Get findings by severity
    pub fn by_severity(&self, severity: Severity) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.severity == severity).collect()
    }

    /// Get findings produced by one audit
    pub fn by_audit(&self, audit: AuditKind) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.audit == audit).collect()
    }

    /// Check if any finding is blocking
    pub fn has_blocking(&self) -> bool {
        self.findings.iter().any(|f| f.severity.is_blocking())
    }

    /// Total count
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Is empty
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

impl FromIterator<Finding> for FindingSet {
    fn from_iter<I: IntoIterator<Item = Finding>>(iter: I) -> Self {
        Self {
            findings: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Serious);
        assert!(Severity::Serious > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Minor);
        assert_eq!(Severity::all()[0], Severity::Critical);
    }

    #[test]
    fn test_severity_from_impact() {
        assert_eq!(Severity::from_impact("Critical"), Some(Severity::Critical));
        assert_eq!(Severity::from_impact(" minor "), Some(Severity::Minor));
        assert_eq!(Severity::from_impact("catastrophic"), None);
    }

    #[test]
    fn test_finding_set_queries() {
        let set: FindingSet = vec![
            Finding::new(
                AuditKind::Accessibility,
                FindingKind::RuleViolation,
                "image-alt",
                Severity::Critical,
                "Image is missing alt text",
            ),
            Finding::new(
                AuditKind::Contrast,
                FindingKind::LowContrast,
                "contrast-normal-text",
                Severity::Serious,
                "Low contrast",
            )
            .with_ratios(3.0, 4.5),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert!(set.has_blocking());
        assert_eq!(set.by_audit(AuditKind::Contrast).len(), 1);
        assert_eq!(set.by_severity(Severity::Serious)[0].required_ratio, Some(4.5));
    }

    #[test]
    fn test_location_string_defaults_to_page() {
        let finding = Finding::new(
            AuditKind::Accessibility,
            FindingKind::RuleViolation,
            "document-title",
            Severity::Serious,
            "Missing title",
        );
        assert_eq!(finding.location_string(), "<page>");
        assert_eq!(finding.with_location("head").location_string(), "head");
    }
}
