// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit units.
//!
//! Each auditor wraps an analysis engine behind the uniform [`Auditor`]
//! contract and turns everything the engine does, including its failures,
//! into an [`AuditOutcome`]. Nothing escapes an auditor as an error.
//!
//! - [`accessibility`]: WCAG rule evaluation over markup
//! - [`contrast`]: region contrast over the screenshot
//! - [`dark_patterns`]: classifier with a keyword lexicon fallback

pub mod accessibility;
pub mod contrast;
pub mod dark_patterns;

use crate::collector::InputBundle;
use crate::outcome::{AuditKind, AuditOutcome};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use accessibility::{AccessibilityAuditor, AccessibilityData, MarkupRuleEngine, RuleEngine};
pub use contrast::{ContrastAuditor, ContrastData, RegionDetector, TileContrastDetector};
pub use dark_patterns::{DarkPatternAuditor, DarkPatternData, HttpClassifier, TextClassifier};

/// Failure of an analysis engine behind an auditor
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The engine is not installed, configured or reachable
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine started but failed while running
    #[error("engine execution failed: {0}")]
    Execution(String),

    /// The engine answered with something that could not be interpreted
    #[error("invalid engine response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            EngineError::Unavailable(e.to_string())
        } else if e.is_decode() {
            EngineError::InvalidResponse(e.to_string())
        } else {
            EngineError::Execution(e.to_string())
        }
    }
}

/// Trait implemented by all auditors
#[async_trait]
pub trait Auditor: Send + Sync {
    /// Payload carried by `Success` and `Degraded` outcomes
    type Data: Serialize + Send + Sync + 'static;

    /// Which audit this is
    fn kind(&self) -> AuditKind;

    /// Run the audit once against a read-only bundle
    async fn audit(&self, bundle: &InputBundle) -> AuditOutcome<Self::Data>;
}
