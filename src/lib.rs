// SPDX-License-Identifier: PMPL-1.0-or-later
//! Fairnessbot - design fairness audits for a single interface
//!
//! Part of the gitbot-fleet ecosystem. Fairnessbot audits one page (fetched
//! live through headless Chrome, or supplied as a screenshot) along three
//! independent axes and fuses the subscores into one Design Fairness Score.
//!
//! ## Audits
//!
//! - **Accessibility**: WCAG rule evaluation over the captured markup
//! - **Contrast**: text/background contrast of regions detected in the image
//! - **Dark patterns**: manipulative-language detection over visible text,
//!   classifier first with a keyword lexicon as fallback
//!
//! ## Pipeline
//!
//! `collect -> audit (parallel) -> fuse -> report`. Each audit yields an
//! [`outcome::AuditOutcome`] that is `Success`, `Degraded` or `Failed`; the
//! fusion engine renormalises weights over whatever audits produced a score,
//! so a missing input modality shrinks an axis instead of zeroing it.

pub mod analyzers;
pub mod collector;
pub mod config;
pub mod error;
pub mod fleet;
pub mod fusion;
pub mod orchestrator;
pub mod outcome;
pub mod report;

pub use config::Config;
pub use error::{FairnessError, Result};
pub use fusion::{fuse, FusedScore, WeightConfig};
pub use orchestrator::{AuditRun, Orchestrator, RunState};
pub use outcome::{AuditKind, AuditOutcome, DegradationReason, FailureReason};
