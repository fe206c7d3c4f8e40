// SPDX-License-Identifier: PMPL-1.0-or-later
//! Integration tests for the HTTP classifier and narrative service

use fairnessbot::analyzers::dark_patterns::{DetectionTier, Evidence};
use fairnessbot::analyzers::{Auditor, DarkPatternAuditor, HttpClassifier, TextClassifier};
use fairnessbot::collector::{InputBundle, InputMode};
use fairnessbot::config::{DarkPatternConfig, NarrativeConfig};
use fairnessbot::outcome::OutcomeStatus;
use fairnessbot::report::{GenerativeNarrator, NarrativeService, NarrativeSource, Reporter};
use fairnessbot::{Config, DegradationReason, Orchestrator};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html lang="en"><head><title>Shop</title></head><body>
    <p>Our jackets are made from recycled wool and organic cotton.</p>
    <p>Only three left, this deal disappears at midnight tonight!</p>
    <p>Delivery is carbon neutral and takes two working days.</p>
    </body></html>"#;

fn bundle() -> InputBundle {
    InputBundle::from_image("/tmp/unused/screenshot.png", "/tmp/unused")
        .with_markup(PAGE)
        .with_source("https://shop.example")
}

fn classifier(server: &MockServer) -> Arc<dyn TextClassifier> {
    Arc::new(HttpClassifier::new(
        format!("{}/classify", server.uri()),
        Some("secret-token".to_string()),
        Duration::from_secs(5),
    ))
}

#[tokio::test]
async fn test_classifier_tier_flags_labelled_segments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            [{"label": "LABEL_Neutral", "score": 0.97}, {"label": "Urgency", "score": 0.03}],
            [{"label": "Neutral", "score": 0.08}, {"label": "Urgency", "score": 0.92}],
            {"label": "Urgency", "score": 0.31}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let auditor = DarkPatternAuditor::new(Some(classifier(&server)), &DarkPatternConfig::default());
    let outcome = auditor.audit(&bundle()).await;

    assert_eq!(outcome.status(), OutcomeStatus::Success);
    let data = outcome.data().expect("data");
    assert_eq!(data.tier, DetectionTier::Classifier);
    assert_eq!(data.segments_total, 3);
    assert_eq!(data.flags.len(), 1);
    assert_eq!(data.flags[0].segment_index, 1);
    assert_eq!(data.flags[0].category, "Urgency");
    assert_eq!(data.flags[0].evidence, Evidence::Classifier { confidence: 0.92 });

    let score = outcome.score().expect("score");
    assert!((score - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(outcome.findings()[0].rule_id, "dark-pattern-urgency");
}

#[tokio::test]
async fn test_unavailable_classifier_falls_back_to_lexicon() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": "Model is currently loading", "estimated_time": 20.0})),
        )
        .mount(&server)
        .await;

    let mut config = DarkPatternConfig::default();
    config
        .lexicon
        .insert("Urgency".to_string(), vec!["midnight tonight".to_string()]);
    let auditor = DarkPatternAuditor::new(Some(classifier(&server)), &config);
    let outcome = auditor.audit(&bundle()).await;

    assert_eq!(outcome.status(), OutcomeStatus::Degraded);
    assert_eq!(
        outcome.degradation_reason(),
        Some(DegradationReason::ClassifierUnavailable)
    );
    let data = outcome.data().expect("data");
    assert_eq!(data.tier, DetectionTier::Lexicon);
    assert_eq!(
        data.flags[0].evidence,
        Evidence::Keyword {
            matched_phrase: "midnight tonight".to_string()
        }
    );
}

#[tokio::test]
async fn test_classifier_server_error_degrades_pipeline_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classify"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let orchestrator = Orchestrator::builder(Arc::new(Config::default()))
        .with_classifier(classifier(&server))
        .build();
    let dir = tempfile::tempdir().expect("tempdir");
    let shot = dir.path().join("screenshot.png");
    image::RgbImage::from_pixel(32, 32, image::Rgb([250, 250, 250]))
        .save(&shot)
        .expect("png written");
    let run = orchestrator
        .run_bundle(
            InputMode::Live,
            InputBundle::from_image(&shot, dir.path()).with_markup(PAGE),
        )
        .await;

    assert!(run.is_done());
    let outcomes = run.outcomes.as_ref().expect("outcomes");
    assert_eq!(outcomes.dark_patterns.status(), OutcomeStatus::Degraded);
    assert!(run
        .fused
        .as_ref()
        .expect("fused")
        .degraded
        .contains(&fairnessbot::AuditKind::DarkPatterns));
}

fn narrative_config(server: &MockServer) -> NarrativeConfig {
    NarrativeConfig {
        endpoint: server.uri(),
        model: "test-model".to_string(),
        ..NarrativeConfig::default()
    }
}

async fn completed_run() -> fairnessbot::AuditRun {
    let dir = tempfile::tempdir().expect("tempdir");
    let shot = dir.path().join("screenshot.png");
    image::RgbImage::from_pixel(32, 32, image::Rgb([255, 255, 255]))
        .save(&shot)
        .expect("png written");
    let orchestrator = Orchestrator::builder(Arc::new(Config::default()))
        .without_classifier()
        .build();
    orchestrator
        .run_bundle(
            InputMode::Live,
            InputBundle::from_image(&shot, dir.path())
                .with_markup(PAGE)
                .with_source("https://shop.example"),
        )
        .await
}

#[tokio::test]
async fn test_generative_narrator_reads_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/test-model:generateContent"))
        .and(header("x-goog-api-key", "narrator-key"))
        .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 4000}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"parts": [{"text": "The storefront is broadly usable. "}, {"text": "Fix the urgency copy."}]}
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let run = completed_run().await;
    let narrator = GenerativeNarrator::new(&narrative_config(&server), "narrator-key");
    assert_eq!(narrator.name(), "test-model");

    let reporter = Reporter::new(Some(Arc::new(narrator)));
    let narrative = reporter.narrative(&run).await;
    assert_eq!(narrative.source, NarrativeSource::Generative);
    assert_eq!(
        narrative.text,
        "The storefront is broadly usable. Fix the urgency copy."
    );
}

#[tokio::test]
async fn test_narrator_failure_keeps_template_report() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let run = completed_run().await;
    let narrator = GenerativeNarrator::new(&narrative_config(&server), "narrator-key");
    let reporter = Reporter::new(Some(Arc::new(narrator)));

    let narrative = reporter.narrative(&run).await;
    assert_eq!(narrative.source, NarrativeSource::Template);
    assert!(narrative.text.contains("Design Fairness Score"));

    let out = tempfile::tempdir().expect("tempdir");
    let written = reporter
        .emit(&run, out.path(), &[fairnessbot::report::OutputFormat::Markdown])
        .await
        .expect("report written despite narrative failure");
    let markdown = std::fs::read_to_string(&written[0]).expect("markdown");
    assert!(markdown.contains(&narrative.text));
    assert!(!out.path().join("audit.json").exists());
}
