// SPDX-License-Identifier: PMPL-1.0-or-later
//! Score fusion.
//!
//! Combines the usable audit subscores into one Design Fairness Score:
//!
//! ```text
//! effective_weight[a] = weight[a] / sum(weight[b] for b in usable)
//! overall             = sum(effective_weight[a] * score[a] for a in usable)
//! ```
//!
//! Failed audits are excluded and their weight is redistributed, so a missing
//! input modality shrinks an axis instead of dragging the score to zero. The
//! engine is a pure function: no I/O, no shared state.

use crate::outcome::{AuditKind, OutcomeStatus, OutcomeSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

/// Fusion failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FusionError {
    #[error("no audit produced a usable score")]
    NoAuditSucceeded,

    #[error("every usable audit has a configured weight of 0")]
    NoWeightedAudit,

    #[error("invalid weight {weight} for {audit}: weights must be finite and non-negative")]
    InvalidWeight { audit: AuditKind, weight: f64 },
}

/// Per-audit weights. Audits without an entry weigh 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightConfig {
    weights: BTreeMap<AuditKind, f64>,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self::empty()
            .with(AuditKind::Accessibility, 0.34)
            .with(AuditKind::Contrast, 0.33)
            .with(AuditKind::DarkPatterns, 0.33)
    }
}

impl WeightConfig {
    /// No weights configured
    pub fn empty() -> Self {
        Self {
            weights: BTreeMap::new(),
        }
    }

    /// Equal weight for every audit
    pub fn equal() -> Self {
        AuditKind::all()
            .into_iter()
            .fold(Self::empty(), |w, kind| w.with(kind, 1.0))
    }

    /// Set the weight for one audit
    pub fn with(mut self, audit: AuditKind, weight: f64) -> Self {
        self.weights.insert(audit, weight);
        self
    }

    /// Set the weight for one audit in place
    pub fn set(&mut self, audit: AuditKind, weight: f64) {
        self.weights.insert(audit, weight);
    }

    /// Weight for an audit, 0 when not configured
    pub fn get(&self, audit: AuditKind) -> f64 {
        self.weights.get(&audit).copied().unwrap_or(0.0)
    }

    /// Configured entries
    pub fn iter(&self) -> impl Iterator<Item = (AuditKind, f64)> + '_ {
        self.weights.iter().map(|(k, v)| (*k, *v))
    }

    /// Multiply every weight by `factor`
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            weights: self.weights.iter().map(|(k, v)| (*k, v * factor)).collect(),
        }
    }

    /// Reject negative, NaN or infinite weights
    pub fn validate(&self) -> Result<(), FusionError> {
        for (audit, weight) in self.iter() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(FusionError::InvalidWeight { audit, weight });
            }
        }
        Ok(())
    }
}

/// One audit's contribution to the fused score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionComponent {
    pub status: OutcomeStatus,
    pub score: Option<f64>,
    pub configured_weight: f64,
    pub effective_weight: f64,
    pub contribution: f64,
}

/// Final fused record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedScore {
    /// Overall score in `[0, 1]`
    pub overall: f64,
    /// Per-audit status, score and weights
    pub components: BTreeMap<AuditKind, FusionComponent>,
    /// Effective weights after renormalisation
    pub applied_weights: WeightConfig,
    /// Audits that ran with reduced fidelity
    pub degraded: Vec<AuditKind>,
    /// Audits that failed and were excluded
    pub excluded: Vec<AuditKind>,
}

impl FusedScore {
    /// Whether every audit contributed at full fidelity
    pub fn is_full_coverage(&self) -> bool {
        self.degraded.is_empty() && self.excluded.is_empty()
    }

    /// Qualitative band for the overall score
    pub fn assessment(&self) -> Assessment {
        Assessment::from_score(self.overall)
    }
}

/// Qualitative band used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    Excellent,
    Good,
    NeedsImprovement,
    Critical,
}

impl Assessment {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Assessment::Excellent
        } else if score >= 0.6 {
            Assessment::Good
        } else if score >= 0.4 {
            Assessment::NeedsImprovement
        } else {
            Assessment::Critical
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Assessment::Excellent => "excellent",
            Assessment::Good => "good with room for improvement",
            Assessment::NeedsImprovement => "needs improvement",
            Assessment::Critical => "critical issues detected",
        }
    }
}

/// Fuse audit outcomes into one score.
///
/// Fails with [`FusionError::NoAuditSucceeded`] when no outcome is usable and
/// with [`FusionError::NoWeightedAudit`] when the usable outcomes carry no
/// weight. A weight-0 audit never moves the score.
pub fn fuse(
    outcomes: &BTreeMap<AuditKind, OutcomeSummary>,
    weights: &WeightConfig,
) -> Result<FusedScore, FusionError> {
    weights.validate()?;

    let usable: Vec<(AuditKind, f64)> = outcomes
        .iter()
        .filter(|(_, o)| o.is_usable())
        .filter_map(|(k, o)| o.score.map(|s| (*k, s)))
        .collect();

    if usable.is_empty() {
        return Err(FusionError::NoAuditSucceeded);
    }

    let mass: f64 = usable.iter().map(|(k, _)| weights.get(*k)).sum();
    if mass <= 0.0 {
        warn!("All usable audits weigh 0; refusing to fuse");
        return Err(FusionError::NoWeightedAudit);
    }
    let effective: BTreeMap<AuditKind, f64> = usable
        .iter()
        .map(|(k, _)| (*k, weights.get(*k) / mass))
        .collect();

    let mut components = BTreeMap::new();
    let mut overall = 0.0;
    for (kind, summary) in outcomes {
        let effective_weight = effective.get(kind).copied().unwrap_or(0.0);
        let contribution = summary.score.map(|s| s * effective_weight).unwrap_or(0.0);
        overall += contribution;
        components.insert(
            *kind,
            FusionComponent {
                status: summary.status,
                score: summary.score,
                configured_weight: weights.get(*kind),
                effective_weight,
                contribution,
            },
        );
    }

    let applied_weights = effective
        .iter()
        .fold(WeightConfig::empty(), |w, (k, v)| w.with(*k, *v));

    let degraded = outcomes
        .iter()
        .filter(|(_, o)| o.status == OutcomeStatus::Degraded)
        .map(|(k, _)| *k)
        .collect();
    let excluded = outcomes
        .iter()
        .filter(|(_, o)| !o.is_usable())
        .map(|(k, _)| *k)
        .collect();

    let overall = overall.clamp(0.0, 1.0);
    debug!(overall, usable = usable.len(), "Fused audit scores");

    Ok(FusedScore {
        overall,
        components,
        applied_weights,
        degraded,
        excluded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{AuditOutcome, DegradationReason, FailureReason};

    fn ok(score: f64) -> OutcomeSummary {
        AuditOutcome::<()>::success((), score, Vec::new()).summary()
    }

    fn degraded(score: f64) -> OutcomeSummary {
        AuditOutcome::<()>::degraded((), score, DegradationReason::ClassifierUnavailable, Vec::new())
            .summary()
    }

    fn failed() -> OutcomeSummary {
        AuditOutcome::<()>::failed(FailureReason::EngineError).summary()
    }

    fn outcomes(a: OutcomeSummary, c: OutcomeSummary, d: OutcomeSummary) -> BTreeMap<AuditKind, OutcomeSummary> {
        BTreeMap::from([
            (AuditKind::Accessibility, a),
            (AuditKind::Contrast, c),
            (AuditKind::DarkPatterns, d),
        ])
    }

    #[test]
    fn test_all_failed_is_an_error() {
        let result = fuse(&outcomes(failed(), failed(), failed()), &WeightConfig::default());
        assert_eq!(result.unwrap_err(), FusionError::NoAuditSucceeded);
    }

    #[test]
    fn test_weighted_average_of_all_three() {
        let weights = WeightConfig::empty()
            .with(AuditKind::Accessibility, 0.5)
            .with(AuditKind::Contrast, 0.25)
            .with(AuditKind::DarkPatterns, 0.25);
        let fused = fuse(&outcomes(ok(0.8), ok(0.4), ok(1.0)), &weights).expect("fuses");
        assert!((fused.overall - 0.75).abs() < 1e-12);
        assert!(fused.is_full_coverage());
    }

    #[test]
    fn test_failed_audit_weight_is_redistributed() {
        let weights = WeightConfig::empty()
            .with(AuditKind::Accessibility, 0.5)
            .with(AuditKind::Contrast, 0.25)
            .with(AuditKind::DarkPatterns, 0.25);
        let fused = fuse(&outcomes(failed(), ok(0.4), ok(1.0)), &weights).expect("fuses");
        assert!((fused.overall - 0.7).abs() < 1e-12);
        assert_eq!(fused.excluded, vec![AuditKind::Accessibility]);
        assert!((fused.applied_weights.get(AuditKind::Contrast) - 0.5).abs() < 1e-12);
        assert_eq!(fused.applied_weights.get(AuditKind::Accessibility), 0.0);
    }

    #[test]
    fn test_single_usable_audit_equals_its_score() {
        let grid = [0.0, 0.1, 0.33, 1.0, 7.5];
        for wa in grid {
            for wc in [0.1, 0.33, 1.0, 7.5] {
                for wd in grid {
                    let weights = WeightConfig::empty()
                        .with(AuditKind::Accessibility, wa)
                        .with(AuditKind::Contrast, wc)
                        .with(AuditKind::DarkPatterns, wd);
                    let fused = fuse(&outcomes(failed(), degraded(0.62), failed()), &weights)
                        .expect("one usable audit");
                    assert!(
                        (fused.overall - 0.62).abs() < 1e-12,
                        "weights ({wa}, {wc}, {wd}) gave {}",
                        fused.overall
                    );
                }
            }
        }
    }

    #[test]
    fn test_overall_stays_in_unit_interval() {
        let scores = [0.0, 0.37, 1.0];
        let grid = [0.0, 0.2, 1.0, 3.0];
        let choices = |s: f64| [ok(s), degraded(s), failed()];
        for sa in scores {
            for sc in scores {
                for sd in scores {
                    for a in choices(sa) {
                        for c in choices(sc) {
                            for d in choices(sd) {
                                for wa in grid {
                                    for wc in grid {
                                        let weights = WeightConfig::empty()
                                            .with(AuditKind::Accessibility, wa)
                                            .with(AuditKind::Contrast, wc)
                                            .with(AuditKind::DarkPatterns, 0.5);
                                        match fuse(&outcomes(a, c, d), &weights) {
                                            Ok(fused) => assert!((0.0..=1.0).contains(&fused.overall)),
                                            Err(e) => assert!(matches!(
                                                e,
                                                FusionError::NoAuditSucceeded | FusionError::NoWeightedAudit
                                            )),
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_scaling_weights_does_not_change_score() {
        let weights = WeightConfig::empty()
            .with(AuditKind::Accessibility, 0.2)
            .with(AuditKind::Contrast, 0.3)
            .with(AuditKind::DarkPatterns, 0.5);
        let set = outcomes(ok(0.9), degraded(1.0), ok(0.25));
        let base = fuse(&set, &weights).expect("fuses").overall;
        for factor in [0.001, 0.5, 3.0, 1000.0] {
            let scaled = fuse(&set, &weights.scaled(factor)).expect("fuses").overall;
            assert!((scaled - base).abs() < 1e-12, "factor {factor}: {scaled} vs {base}");
        }
    }

    #[test]
    fn test_zero_weight_audit_is_reported_but_inert() {
        let weights = WeightConfig::empty()
            .with(AuditKind::Accessibility, 1.0)
            .with(AuditKind::Contrast, 1.0);
        let fused = fuse(&outcomes(ok(0.5), ok(1.0), ok(0.0)), &weights).expect("fuses");
        assert!((fused.overall - 0.75).abs() < 1e-12);
        let dark = &fused.components[&AuditKind::DarkPatterns];
        assert_eq!(dark.score, Some(0.0));
        assert_eq!(dark.effective_weight, 0.0);
    }

    #[test]
    fn test_unweighted_usable_audits_do_not_produce_a_score() {
        let weights = WeightConfig::empty().with(AuditKind::Accessibility, 1.0);
        let result = fuse(&outcomes(failed(), ok(0.2), ok(0.6)), &weights);
        assert_eq!(result.unwrap_err(), FusionError::NoWeightedAudit);
    }

    #[test]
    fn test_weights_scaled_to_zero_do_not_produce_a_score() {
        let weights = WeightConfig::empty()
            .with(AuditKind::Accessibility, 0.2)
            .with(AuditKind::Contrast, 0.3)
            .with(AuditKind::DarkPatterns, 0.5)
            .scaled(1e-200)
            .scaled(1e-200);
        let result = fuse(&outcomes(ok(0.9), ok(0.1), ok(0.5)), &weights);
        assert_eq!(result.unwrap_err(), FusionError::NoWeightedAudit);
    }

    #[test]
    fn test_degraded_audits_are_tracked() {
        let fused = fuse(&outcomes(ok(1.0), degraded(1.0), failed()), &WeightConfig::default())
            .expect("fuses");
        assert_eq!(fused.degraded, vec![AuditKind::Contrast]);
        assert_eq!(fused.excluded, vec![AuditKind::DarkPatterns]);
        assert!(!fused.is_full_coverage());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = WeightConfig::default().with(AuditKind::Contrast, -1.0);
        let err = fuse(&outcomes(ok(1.0), ok(1.0), ok(1.0)), &weights).unwrap_err();
        assert!(matches!(err, FusionError::InvalidWeight { audit: AuditKind::Contrast, .. }));
    }

    #[test]
    fn test_assessment_bands() {
        assert_eq!(Assessment::from_score(0.85), Assessment::Excellent);
        assert_eq!(Assessment::from_score(0.6), Assessment::Good);
        assert_eq!(Assessment::from_score(0.45), Assessment::NeedsImprovement);
        assert_eq!(Assessment::from_score(0.1), Assessment::Critical);
    }
}
