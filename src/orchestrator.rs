// SPDX-License-Identifier: PMPL-1.0-or-later
//! Audit pipeline state machine.
//!
//! ```text
//! INIT -> COLLECTING -> AUDITING -> FUSING -> DONE
//!            \______________\__________\_____> ABORTED
//! ```
//!
//! - Collection that reports `AutomationUnavailable` in live mode degrades to
//!   an image-only run when a previous capture exists.
//! - The three audits run as separate tasks against one shared, read-only
//!   bundle. Each is bounded by its own timeout; a timeout or a cancellation
//!   becomes `Failed(Timeout)` for that audit alone.
//! - Fusion waits for all three outcomes. Only a collection failure with no
//!   usable bundle, a cancelled collection, or `NoAuditSucceeded` aborts.

use crate::analyzers::{
    AccessibilityAuditor, AccessibilityData, Auditor, ContrastAuditor, ContrastData,
    DarkPatternAuditor, DarkPatternData, HttpClassifier, MarkupRuleEngine, RegionDetector,
    RuleEngine, TextClassifier, TileContrastDetector,
};
use crate::collector::{
    ChromeFetcher, CollectOptions, CollectionError, CollectionErrorKind, CollectorGateway,
    InputBundle, InputMode, PageFetcher,
};
use crate::config::Config;
use crate::fleet::FindingSet;
use crate::fusion::{fuse, FusedScore, FusionError, WeightConfig};
use crate::outcome::{AuditKind, AuditOutcome, FailureReason, OutcomeSummary};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a run was aborted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    /// No usable bundle could be collected
    CollectionFailed(String),
    /// Every audit failed
    NoAuditSucceeded,
    /// Fusion rejected its inputs
    FusionFailed(String),
    /// The caller cancelled the run before a bundle existed
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::CollectionFailed(detail) => write!(f, "collection failed: {}", detail),
            AbortReason::NoAuditSucceeded => write!(f, "no audit produced a usable score"),
            AbortReason::FusionFailed(detail) => write!(f, "fusion failed: {}", detail),
            AbortReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Pipeline state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Init,
    Collecting,
    Auditing,
    Fusing,
    Done,
    Aborted { reason: AbortReason },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted { .. })
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => write!(f, "INIT"),
            RunState::Collecting => write!(f, "COLLECTING"),
            RunState::Auditing => write!(f, "AUDITING"),
            RunState::Fusing => write!(f, "FUSING"),
            RunState::Done => write!(f, "DONE"),
            RunState::Aborted { reason } => write!(f, "ABORTED ({})", reason),
        }
    }
}

/// A state change with its timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// The three completed outcomes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOutcomes {
    pub accessibility: AuditOutcome<AccessibilityData>,
    pub contrast: AuditOutcome<ContrastData>,
    pub dark_patterns: AuditOutcome<DarkPatternData>,
}

impl AuditOutcomes {
    /// Payload-free view keyed by audit, as consumed by fusion
    pub fn summaries(&self) -> BTreeMap<AuditKind, OutcomeSummary> {
        BTreeMap::from([
            (AuditKind::Accessibility, self.accessibility.summary()),
            (AuditKind::Contrast, self.contrast.summary()),
            (AuditKind::DarkPatterns, self.dark_patterns.summary()),
        ])
    }

    pub fn summary(&self, kind: AuditKind) -> OutcomeSummary {
        match kind {
            AuditKind::Accessibility => self.accessibility.summary(),
            AuditKind::Contrast => self.contrast.summary(),
            AuditKind::DarkPatterns => self.dark_patterns.summary(),
        }
    }

    /// Every finding across the three outcomes
    pub fn findings(&self) -> FindingSet {
        self.accessibility
            .findings()
            .iter()
            .chain(self.contrast.findings())
            .chain(self.dark_patterns.findings())
            .cloned()
            .collect()
    }
}

/// One orchestration run, from collection to the fused score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub id: Uuid,
    pub mode: InputMode,
    /// Address or file path the run was started with
    pub subject: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub transitions: Vec<Transition>,
    pub bundle: Option<InputBundle>,
    /// Live collection was unavailable and a previous capture was audited instead
    pub image_only_fallback: bool,
    /// Weights configured for this run
    pub weights: WeightConfig,
    pub outcomes: Option<AuditOutcomes>,
    pub fused: Option<FusedScore>,
}

impl AuditRun {
    fn new(mode: InputMode, subject: &str, weights: WeightConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            mode,
            subject: subject.to_string(),
            started_at: now,
            completed_at: None,
            state: RunState::Init,
            transitions: vec![Transition {
                state: RunState::Init,
                at: now,
            }],
            bundle: None,
            image_only_fallback: false,
            weights,
            outcomes: None,
            fused: None,
        }
    }

    fn transition(&mut self, state: RunState) {
        info!(run = %self.id, "{} -> {}", self.state, state);
        let at = Utc::now();
        if state.is_terminal() {
            self.completed_at = Some(at);
        }
        self.transitions.push(Transition {
            state: state.clone(),
            at,
        });
        self.state = state;
    }

    fn abort(mut self, reason: AbortReason) -> Self {
        warn!(run = %self.id, "Run aborted: {}", reason);
        self.transition(RunState::Aborted { reason });
        self
    }

    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.state {
            RunState::Aborted { reason } => Some(reason),
            _ => None,
        }
    }

    /// Sequence of states visited, oldest first
    pub fn states(&self) -> Vec<&RunState> {
        self.transitions.iter().map(|t| &t.state).collect()
    }

    pub fn findings(&self) -> FindingSet {
        self.outcomes
            .as_ref()
            .map(AuditOutcomes::findings)
            .unwrap_or_default()
    }
}

/// Caller side of a run cancellation
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// New handle and the token observed by the run
    pub fn pair() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, CancelToken { rx: Some(rx) })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Run side of a cancellation
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelToken {
    /// Token that is never cancelled
    pub fn none() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve once cancellation is requested; never resolves otherwise
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        std::future::pending::<()>().await
    }
}

/// Run one audit as its own task, bounded by `timeout` and `cancel`
async fn bounded<A>(
    auditor: Arc<A>,
    bundle: Arc<InputBundle>,
    timeout: Duration,
    mut cancel: CancelToken,
) -> AuditOutcome<A::Data>
where
    A: Auditor + 'static,
{
    let kind = auditor.kind();
    let task = tokio::spawn(async move { auditor.audit(&bundle).await });
    let abort = task.abort_handle();

    tokio::select! {
        joined = tokio::time::timeout(timeout, task) => match joined {
            Ok(Ok(outcome)) => {
                debug!(audit = %kind, status = %outcome.status(), "Audit finished");
                outcome
            }
            Ok(Err(e)) => {
                warn!(audit = %kind, "Audit task failed: {}", e);
                AuditOutcome::failed_with(FailureReason::EngineError, format!("audit task failed: {}", e))
            }
            Err(_) => {
                abort.abort();
                warn!(audit = %kind, "Audit exceeded {}s", timeout.as_secs());
                AuditOutcome::failed_with(
                    FailureReason::Timeout,
                    format!("exceeded {}s", timeout.as_secs()),
                )
            }
        },
        _ = cancel.cancelled() => {
            abort.abort();
            warn!(audit = %kind, "Audit cancelled");
            AuditOutcome::failed_with(FailureReason::Timeout, "cancelled")
        }
    }
}

/// Drives collection, the three audits and fusion
pub struct Orchestrator {
    config: Arc<Config>,
    collector: CollectorGateway,
    accessibility: Arc<AccessibilityAuditor>,
    contrast: Arc<ContrastAuditor>,
    dark_patterns: Arc<DarkPatternAuditor>,
}

impl Orchestrator {
    /// Orchestrator with the built-in engines
    pub fn new(config: Arc<Config>) -> Self {
        Self::builder(config).build()
    }

    /// Builder for replacing individual engines
    pub fn builder(config: Arc<Config>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            fetcher: None,
            rule_engine: None,
            region_detector: None,
            classifier: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn collector(&self) -> &CollectorGateway {
        &self.collector
    }

    /// Run the full pipeline
    pub async fn run(&self, mode: InputMode, value: &str, options: &CollectOptions) -> AuditRun {
        self.run_with_cancel(mode, value, options, CancelToken::none())
            .await
    }

    /// Run the full pipeline, honouring `cancel`
    pub async fn run_with_cancel(
        &self,
        mode: InputMode,
        value: &str,
        options: &CollectOptions,
        mut cancel: CancelToken,
    ) -> AuditRun {
        let mut run = AuditRun::new(mode, value, self.config.weights.clone());
        run.transition(RunState::Collecting);

        let collected = tokio::select! {
            result = self.collector.collect(mode, value, options) => result,
            _ = cancel.cancelled() => return run.abort(AbortReason::Cancelled),
        };

        let bundle = match collected {
            Ok(bundle) => bundle,
            Err(err) => match self.recover_image_only(mode, value, options, err).await {
                Ok(bundle) => {
                    run.image_only_fallback = true;
                    bundle
                }
                Err(err) => return run.abort(AbortReason::CollectionFailed(err.to_string())),
            },
        };

        self.audit_and_fuse(run, bundle, cancel).await
    }

    /// Audit an already collected bundle
    pub async fn run_bundle(&self, mode: InputMode, bundle: InputBundle) -> AuditRun {
        self.run_bundle_with_cancel(mode, bundle, CancelToken::none())
            .await
    }

    pub async fn run_bundle_with_cancel(
        &self,
        mode: InputMode,
        bundle: InputBundle,
        cancel: CancelToken,
    ) -> AuditRun {
        let subject = bundle
            .source
            .clone()
            .unwrap_or_else(|| bundle.image_path.display().to_string());
        let mut run = AuditRun::new(mode, &subject, self.config.weights.clone());
        run.transition(RunState::Collecting);
        self.audit_and_fuse(run, bundle, cancel).await
    }

    /// Image-only continuation after live automation turned out unavailable
    async fn recover_image_only(
        &self,
        mode: InputMode,
        value: &str,
        options: &CollectOptions,
        err: CollectionError,
    ) -> Result<InputBundle, CollectionError> {
        if mode != InputMode::Live || err.kind() != CollectionErrorKind::AutomationUnavailable {
            return Err(err);
        }
        let Some(previous) = options.previous_capture() else {
            warn!("Automation unavailable and no previous capture to fall back on");
            return Err(err);
        };
        warn!(
            "Automation unavailable ({}); continuing image-only with {}",
            err,
            previous.display()
        );
        self.collector
            .load_static(&previous, options, Some(value.to_string()))
            .await
    }

    async fn audit_and_fuse(
        &self,
        mut run: AuditRun,
        bundle: InputBundle,
        cancel: CancelToken,
    ) -> AuditRun {
        run.transition(RunState::Auditing);
        debug!(capabilities = ?bundle.capabilities(), "Auditing bundle");
        let bundle = Arc::new(bundle);

        let (accessibility, contrast, dark_patterns) = tokio::join!(
            bounded(
                Arc::clone(&self.accessibility),
                Arc::clone(&bundle),
                self.config.accessibility.timeout(),
                cancel.clone(),
            ),
            bounded(
                Arc::clone(&self.contrast),
                Arc::clone(&bundle),
                self.config.contrast.timeout(),
                cancel.clone(),
            ),
            bounded(
                Arc::clone(&self.dark_patterns),
                Arc::clone(&bundle),
                self.config.dark_patterns.timeout(),
                cancel,
            ),
        );
        let outcomes = AuditOutcomes {
            accessibility,
            contrast,
            dark_patterns,
        };
        run.bundle = Some(InputBundle::clone(&bundle));

        run.transition(RunState::Fusing);
        let fused = fuse(&outcomes.summaries(), &run.weights);
        run.outcomes = Some(outcomes);

        match fused {
            Ok(score) => {
                info!(
                    overall = score.overall,
                    degraded = ?score.degraded,
                    excluded = ?score.excluded,
                    "Design fairness score fused"
                );
                run.fused = Some(score);
                run.transition(RunState::Done);
                run
            }
            Err(FusionError::NoAuditSucceeded) => run.abort(AbortReason::NoAuditSucceeded),
            Err(e) => run.abort(AbortReason::FusionFailed(e.to_string())),
        }
    }
}

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: Arc<Config>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    rule_engine: Option<Arc<dyn RuleEngine>>,
    region_detector: Option<Arc<dyn RegionDetector>>,
    classifier: Option<Option<Arc<dyn TextClassifier>>>,
}

impl OrchestratorBuilder {
    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_rule_engine(mut self, engine: Arc<dyn RuleEngine>) -> Self {
        self.rule_engine = Some(engine);
        self
    }

    pub fn with_region_detector(mut self, detector: Arc<dyn RegionDetector>) -> Self {
        self.region_detector = Some(detector);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TextClassifier>) -> Self {
        self.classifier = Some(Some(classifier));
        self
    }

    /// Force the keyword tier regardless of configuration
    pub fn without_classifier(mut self) -> Self {
        self.classifier = Some(None);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(ChromeFetcher::from_config(&config.collector)));
        let rule_engine = self.rule_engine.unwrap_or_else(|| Arc::new(MarkupRuleEngine));
        let region_detector = self
            .region_detector
            .unwrap_or_else(|| Arc::new(TileContrastDetector));
        let classifier = self.classifier.unwrap_or_else(|| {
            HttpClassifier::from_config(&config.dark_patterns.classifier)
                .map(|c| Arc::new(c) as Arc<dyn TextClassifier>)
        });

        Orchestrator {
            collector: CollectorGateway::new(fetcher),
            accessibility: Arc::new(AccessibilityAuditor::new(
                rule_engine,
                config.accessibility.clone(),
            )),
            contrast: Arc::new(ContrastAuditor::new(region_detector, config.contrast.clone())),
            dark_patterns: Arc::new(DarkPatternAuditor::new(classifier, &config.dark_patterns)),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(RunState::Done.to_string(), "DONE");
        let aborted = RunState::Aborted {
            reason: AbortReason::NoAuditSucceeded,
        };
        assert!(aborted.to_string().starts_with("ABORTED"));
        assert!(aborted.is_terminal());
        assert!(!RunState::Fusing.is_terminal());
    }

    #[test]
    fn test_run_records_transitions() {
        let mut run = AuditRun::new(InputMode::Live, "https://example.org", WeightConfig::default());
        run.transition(RunState::Collecting);
        let run = run.abort(AbortReason::Cancelled);
        assert_eq!(
            run.states(),
            vec![
                &RunState::Init,
                &RunState::Collecting,
                &RunState::Aborted {
                    reason: AbortReason::Cancelled
                }
            ]
        );
        assert!(run.completed_at.is_some());
        assert_eq!(run.abort_reason(), Some(&AbortReason::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_token_resolves_after_cancel() {
        let (handle, mut token) = CancelHandle::pair();
        assert!(!token.is_cancelled());
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("cancellation observed");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_none_token_never_resolves() {
        let mut token = CancelToken::none();
        let waited = tokio::time::timeout(Duration::from_millis(20), token.cancelled()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_abort_reason_serializes() {
        let json = serde_json::to_value(RunState::Aborted {
            reason: AbortReason::CollectionFailed("no chrome".to_string()),
        })
        .expect("serializable");
        assert_eq!(json["state"], "aborted");
        assert_eq!(json["reason"]["kind"], "collection_failed");
    }
}
