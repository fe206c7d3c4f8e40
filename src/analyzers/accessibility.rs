// SPDX-License-Identifier: PMPL-1.0-or-later
//! Accessibility auditor - WCAG rule evaluation over captured markup
//!
//! The auditor needs markup; an image-only bundle fails with
//! `MissingMarkup` without consulting the engine. Violations are weighted by
//! severity and the score is `1 - weighted / normalization`, clamped.
//!
//! The built-in [`MarkupRuleEngine`] checks:
//! - `image-alt`: `<img>` without an `alt` attribute (critical, 1.1.1)
//! - `label`: form controls without an accessible label (critical, 1.3.1/4.1.2)
//! - `button-name`: buttons without discernible text (critical, 4.1.2)
//! - `html-has-lang`: `<html>` without `lang` (serious, 3.1.1)
//! - `document-title`: missing or empty `<title>` (serious, 2.4.2)
//! - `link-name`: links without discernible text (serious, 2.4.4)
//! - `heading-order`: heading levels skipped (moderate, 1.3.1)
//! - `image-alt-generic`: alt text such as "image" or a file name (minor, 1.1.1)

use super::{Auditor, EngineError};
use crate::collector::InputBundle;
use crate::config::{AccessibilityConfig, SeverityWeights};
use crate::fleet::{Finding, FindingKind, Severity};
use crate::outcome::{AuditKind, AuditOutcome, FailureReason};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Generic alt text values that say nothing about the image
const GENERIC_ALT_VALUES: &[&str] = &[
    "image",
    "photo",
    "picture",
    "icon",
    "graphic",
    "img",
    "banner",
    "logo",
    "untitled",
    "screenshot",
    "thumbnail",
    "placeholder",
];

const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp"];

const HELP_BASE: &str = "https://dequeuniversity.com/rules/axe/4.8";

/// One violated rule at one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_id: String,
    pub severity: Severity,
    /// Locator of the offending element
    pub target: String,
    pub message: String,
    pub help_url: Option<String>,
}

impl RuleViolation {
    pub fn new(rule_id: &str, severity: Severity, target: &str, message: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            severity,
            target: target.to_string(),
            message: message.to_string(),
            help_url: None,
        }
    }

    pub fn with_help_url(mut self, url: &str) -> Self {
        self.help_url = Some(url.to_string());
        self
    }
}

/// Rule-evaluation engine seam
pub trait RuleEngine: Send + Sync {
    /// Human-readable name of this engine
    fn name(&self) -> &str;

    /// Evaluate markup, returning violations in document order
    fn evaluate(&self, markup: &str) -> Result<Vec<RuleViolation>, EngineError>;
}

/// Payload of an accessibility outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityData {
    pub engine: String,
    pub violations: Vec<RuleViolation>,
    pub severity_weights: SeverityWeights,
    pub normalization: f64,
    pub weighted_violation_count: f64,
}

impl AccessibilityData {
    /// Violation count for one severity class
    pub fn count(&self, severity: Severity) -> usize {
        self.violations.iter().filter(|v| v.severity == severity).count()
    }
}

/// Auditor for WCAG rule compliance
pub struct AccessibilityAuditor {
    engine: Arc<dyn RuleEngine>,
    config: AccessibilityConfig,
}

impl AccessibilityAuditor {
    pub fn new(engine: Arc<dyn RuleEngine>, config: AccessibilityConfig) -> Self {
        Self { engine, config }
    }

    /// Auditor using the built-in [`MarkupRuleEngine`]
    pub fn from_config(config: &AccessibilityConfig) -> Self {
        Self::new(Arc::new(MarkupRuleEngine), config.clone())
    }

    fn weighted_count(&self, violations: &[RuleViolation]) -> f64 {
        violations
            .iter()
            .map(|v| self.config.severity_weights.weight(v.severity))
            .sum()
    }
}

#[async_trait]
impl Auditor for AccessibilityAuditor {
    type Data = AccessibilityData;

    fn kind(&self) -> AuditKind {
        AuditKind::Accessibility
    }

    async fn audit(&self, bundle: &InputBundle) -> AuditOutcome<AccessibilityData> {
        let Some(markup) = bundle.markup.as_deref().filter(|m| !m.trim().is_empty()) else {
            debug!("No markup in bundle, skipping rule evaluation");
            return AuditOutcome::failed(FailureReason::MissingMarkup);
        };

        let engine = Arc::clone(&self.engine);
        let markup = markup.to_string();
        let evaluated = tokio::task::spawn_blocking(move || engine.evaluate(&markup)).await;
        let violations = match evaluated {
            Ok(Ok(violations)) => violations,
            Ok(Err(e)) => {
                warn!("Rule engine {} failed: {}", self.engine.name(), e);
                return AuditOutcome::failed_with(FailureReason::EngineError, e.to_string());
            }
            Err(e) => {
                warn!("Rule engine task aborted: {}", e);
                return AuditOutcome::failed_with(FailureReason::EngineError, e.to_string());
            }
        };

        let weighted = self.weighted_count(&violations);
        let score = 1.0 - weighted / self.config.normalization;
        debug!(
            violations = violations.len(),
            weighted, score, "Accessibility rules evaluated"
        );

        let findings = violations.iter().map(to_finding).collect();
        let data = AccessibilityData {
            engine: self.engine.name().to_string(),
            violations,
            severity_weights: self.config.severity_weights,
            normalization: self.config.normalization,
            weighted_violation_count: weighted,
        };
        AuditOutcome::success(data, score, findings)
    }
}

fn to_finding(v: &RuleViolation) -> Finding {
    let mut finding = Finding::new(
        AuditKind::Accessibility,
        FindingKind::RuleViolation,
        &v.rule_id,
        v.severity,
        &v.message,
    )
    .with_location(&v.target);
    if let Some(suggestion) = suggestion_for(&v.rule_id) {
        finding = finding.with_suggestion(suggestion);
    }
    if let Some(url) = &v.help_url {
        finding = finding.with_help_url(url);
    }
    finding
}

fn suggestion_for(rule_id: &str) -> Option<&'static str> {
    match rule_id {
        "image-alt" => Some(
            "Add alt=\"description\" for informative images or alt=\"\" for decorative images",
        ),
        "image-alt-generic" => Some("Replace with a meaningful description of the image content"),
        "label" => Some("Associate a <label for=\"id\">, wrap the control in <label>, or add aria-label"),
        "button-name" => Some("Give the button visible text or an aria-label"),
        "link-name" => Some("Give the link visible text, an aria-label, or an image with alt text"),
        "html-has-lang" => Some("Add a lang attribute to <html>, e.g. lang=\"en\""),
        "document-title" => Some("Add a non-empty <title> describing the page"),
        "heading-order" => Some("Do not skip heading levels; nest headings by one level at a time"),
        _ => None,
    }
}

/// Built-in rule engine evaluating a compact WCAG rule set over the DOM
pub struct MarkupRuleEngine;

impl RuleEngine for MarkupRuleEngine {
    fn name(&self) -> &str {
        "markup-rules"
    }

    fn evaluate(&self, markup: &str) -> Result<Vec<RuleViolation>, EngineError> {
        let document = Html::parse_document(markup);
        let mut violations = Vec::new();

        check_html_lang(&document, &mut violations)?;
        check_document_title(&document, &mut violations)?;
        check_images(&document, &mut violations)?;
        check_form_labels(&document, &mut violations)?;
        check_buttons(&document, &mut violations)?;
        check_links(&document, &mut violations)?;
        check_heading_order(&document, &mut violations)?;

        Ok(violations)
    }
}

fn selector(css: &str) -> Result<Selector, EngineError> {
    Selector::parse(css).map_err(|e| EngineError::Execution(format!("selector {}: {:?}", css, e)))
}

fn help(rule_id: &str) -> String {
    format!("{}/{}", HELP_BASE, rule_id)
}

/// Locator for an element: `tag#id` when it has an id, else `tag[n]` in document order
fn locator(element: &ElementRef<'_>, index: usize) -> String {
    let name = element.value().name();
    match element.value().id() {
        Some(id) => format!("{}#{}", name, id),
        None => format!("{}[{}]", name, index + 1),
    }
}

fn visible_text(element: &ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn has_aria_name(element: &ElementRef<'_>) -> bool {
    ["aria-label", "aria-labelledby", "title"].iter().any(|attr| {
        element
            .value()
            .attr(attr)
            .is_some_and(|v| !v.trim().is_empty())
    })
}

fn check_html_lang(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let html_sel = selector("html")?;
    let has_lang = document
        .select(&html_sel)
        .next()
        .and_then(|el| el.value().attr("lang"))
        .is_some_and(|lang| !lang.trim().is_empty());
    if !has_lang {
        out.push(
            RuleViolation::new(
                "html-has-lang",
                Severity::Serious,
                "html",
                "The <html> element has no lang attribute; screen readers cannot pick a pronunciation",
            )
            .with_help_url(&help("html-has-lang")),
        );
    }
    Ok(())
}

fn check_document_title(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let title_sel = selector("title")?;
    let has_title = document
        .select(&title_sel)
        .any(|t| !visible_text(&t).is_empty());
    if !has_title {
        out.push(
            RuleViolation::new(
                "document-title",
                Severity::Serious,
                "head > title",
                "Document has no non-empty <title>",
            )
            .with_help_url(&help("document-title")),
        );
    }
    Ok(())
}

fn check_images(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let img_sel = selector("img")?;
    for (idx, img) in document.select(&img_sel).enumerate() {
        let target = locator(&img, idx);
        let role = img.value().attr("role").unwrap_or("");
        if matches!(role, "presentation" | "none") {
            continue;
        }

        match img.value().attr("alt") {
            None if !has_aria_name(&img) => out.push(
                RuleViolation::new(
                    "image-alt",
                    Severity::Critical,
                    &target,
                    "Image has no alt attribute; every <img> needs alternative text or alt=\"\"",
                )
                .with_help_url(&help("image-alt")),
            ),
            Some(alt) if !alt.trim().is_empty() => {
                let alt_lower = alt.trim().to_lowercase();
                let is_filename = IMAGE_EXTENSIONS.iter().any(|ext| alt_lower.ends_with(ext));
                if GENERIC_ALT_VALUES.contains(&alt_lower.as_str()) || is_filename {
                    out.push(
                        RuleViolation::new(
                            "image-alt-generic",
                            Severity::Minor,
                            &target,
                            &format!("Image alt text \"{}\" does not describe the image", alt),
                        )
                        .with_help_url(&help("image-redundant-alt")),
                    );
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_form_labels(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let label_sel = selector("label[for]")?;
    let labelled: HashSet<&str> = document
        .select(&label_sel)
        .filter_map(|l| l.value().attr("for"))
        .collect();

    let control_sel = selector("input, select, textarea")?;
    for (idx, control) in document.select(&control_sel).enumerate() {
        let input_type = control.value().attr("type").unwrap_or("text").to_lowercase();
        if matches!(
            input_type.as_str(),
            "hidden" | "submit" | "button" | "reset" | "image"
        ) {
            continue;
        }

        let by_for = control
            .value()
            .id()
            .is_some_and(|id| labelled.contains(id));
        let wrapped = control.ancestors().any(|node| {
            node.value()
                .as_element()
                .is_some_and(|el| el.name() == "label")
        });
        if by_for || wrapped || has_aria_name(&control) {
            continue;
        }

        out.push(
            RuleViolation::new(
                "label",
                Severity::Critical,
                &locator(&control, idx),
                "Form control has no associated label",
            )
            .with_help_url(&help("label")),
        );
    }
    Ok(())
}

fn check_buttons(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let button_sel = selector("button, [role=\"button\"]")?;
    let img_sel = selector("img[alt]")?;
    for (idx, button) in document.select(&button_sel).enumerate() {
        let has_img_name = button
            .select(&img_sel)
            .any(|img| img.value().attr("alt").is_some_and(|a| !a.trim().is_empty()));
        if visible_text(&button).is_empty() && !has_aria_name(&button) && !has_img_name {
            out.push(
                RuleViolation::new(
                    "button-name",
                    Severity::Critical,
                    &locator(&button, idx),
                    "Button has no discernible text",
                )
                .with_help_url(&help("button-name")),
            );
        }
    }
    Ok(())
}

fn check_links(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let link_sel = selector("a[href]")?;
    let img_sel = selector("img[alt]")?;
    for (idx, link) in document.select(&link_sel).enumerate() {
        let has_img_name = link
            .select(&img_sel)
            .any(|img| img.value().attr("alt").is_some_and(|a| !a.trim().is_empty()));
        if visible_text(&link).is_empty() && !has_aria_name(&link) && !has_img_name {
            out.push(
                RuleViolation::new(
                    "link-name",
                    Severity::Serious,
                    &locator(&link, idx),
                    "Link has no discernible text",
                )
                .with_help_url(&help("link-name")),
            );
        }
    }
    Ok(())
}

fn check_heading_order(document: &Html, out: &mut Vec<RuleViolation>) -> Result<(), EngineError> {
    let heading_sel = selector("h1, h2, h3, h4, h5, h6")?;
    let mut previous: Option<u8> = None;

    for (idx, heading) in document.select(&heading_sel).enumerate() {
        let level = heading
            .value()
            .name()
            .trim_start_matches('h')
            .parse::<u8>()
            .unwrap_or(1);
        if let Some(prev) = previous {
            if level > prev + 1 {
                out.push(
                    RuleViolation::new(
                        "heading-order",
                        Severity::Moderate,
                        &locator(&heading, idx),
                        &format!("Heading level jumps from h{} to h{}", prev, level),
                    )
                    .with_help_url(&help("heading-order")),
                );
            }
        }
        previous = Some(level);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLEAN_PAGE: &str = r#"<!DOCTYPE html><html lang="en"><head><title>Shop</title></head>
        <body><h1>Shop</h1><h2>Jackets</h2>
        <img src="jacket.png" alt="Green waxed jacket">
        <label for="email">Email</label><input id="email" type="email">
        <button>Subscribe</button><a href="/about">About us</a></body></html>"#;

    struct FailingEngine;

    impl RuleEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        fn evaluate(&self, _markup: &str) -> Result<Vec<RuleViolation>, EngineError> {
            Err(EngineError::Execution("rule engine crashed".to_string()))
        }
    }

    fn rules(markup: &str) -> Vec<String> {
        MarkupRuleEngine
            .evaluate(markup)
            .expect("evaluates")
            .into_iter()
            .map(|v| v.rule_id)
            .collect()
    }

    #[test]
    fn test_clean_page_has_no_violations() {
        assert!(rules(CLEAN_PAGE).is_empty());
    }

    #[test]
    fn test_missing_and_generic_alt() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <img src="a.png"><img src="b.png" alt="photo"><img src="c.png" alt="hero.jpg">
            <img src="d.png" alt=""><img src="e.png" role="presentation"></body></html>"#;
        assert_eq!(
            rules(html),
            vec!["image-alt", "image-alt-generic", "image-alt-generic"]
        );
    }

    #[test]
    fn test_document_level_rules() {
        let html = "<html><head></head><body><p>Hi</p></body></html>";
        assert_eq!(rules(html), vec!["html-has-lang", "document-title"]);
    }

    #[test]
    fn test_unlabelled_controls() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <input type="text" name="q">
            <input type="hidden" name="csrf">
            <label>Name <input type="text"></label>
            <input type="text" aria-label="Search">
            <select id="size"></select></body></html>"#;
        let violations = MarkupRuleEngine.evaluate(html).expect("evaluates");
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().all(|v| v.rule_id == "label"));
        assert_eq!(violations[1].target, "select#size");
    }

    #[test]
    fn test_empty_buttons_and_links() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <button></button><button aria-label="Close"></button>
            <a href="/x"></a><a href="/y"><img src="y.png" alt="Home"></a></body></html>"#;
        assert_eq!(rules(html), vec!["button-name", "link-name"]);
    }

    #[test]
    fn test_heading_skip() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <h1>A</h1><h3>B</h3><h4>C</h4><h2>D</h2></body></html>"#;
        assert_eq!(rules(html), vec!["heading-order"]);
    }

    #[tokio::test]
    async fn test_score_from_weighted_violations() {
        let html = r#"<html lang="en"><head><title>T</title></head><body>
            <img src="a.png"><img src="b.png"><img src="c.png" alt="icon"></body></html>"#;
        let bundle = InputBundle::from_image("shot.png", ".").with_markup(html);
        let auditor = AccessibilityAuditor::from_config(&AccessibilityConfig::default());

        let outcome = auditor.audit(&bundle).await;
        let data = outcome.data().expect("success");
        assert_eq!(data.count(Severity::Critical), 2);
        assert_eq!(data.count(Severity::Minor), 1);
        assert!((data.weighted_violation_count - 6.5).abs() < 1e-9);
        assert!((outcome.score().expect("score") - 0.74).abs() < 1e-9);
        assert_eq!(outcome.findings().len(), 3);
    }

    #[tokio::test]
    async fn test_missing_markup_fails_without_engine() {
        let bundle = InputBundle::from_image("shot.png", ".");
        let auditor =
            AccessibilityAuditor::new(Arc::new(FailingEngine), AccessibilityConfig::default());
        let outcome = auditor.audit(&bundle).await;
        assert_eq!(outcome.failure_reason(), Some(FailureReason::MissingMarkup));
    }

    #[tokio::test]
    async fn test_engine_error_becomes_failed_outcome() {
        let bundle = InputBundle::from_image("shot.png", ".").with_markup(CLEAN_PAGE);
        let auditor =
            AccessibilityAuditor::new(Arc::new(FailingEngine), AccessibilityConfig::default());
        let outcome = auditor.audit(&bundle).await;
        assert_eq!(outcome.failure_reason(), Some(FailureReason::EngineError));
    }

    /// Records the thread each evaluation runs on
    struct ThreadRecordingEngine(std::sync::Mutex<Option<std::thread::ThreadId>>);

    impl RuleEngine for ThreadRecordingEngine {
        fn name(&self) -> &str {
            "thread-recording"
        }

        fn evaluate(&self, _markup: &str) -> Result<Vec<RuleViolation>, EngineError> {
            if let Ok(mut seen) = self.0.lock() {
                *seen = Some(std::thread::current().id());
            }
            Ok(Vec::new())
        }
    }

    struct PanickingEngine;

    impl RuleEngine for PanickingEngine {
        fn name(&self) -> &str {
            "panicking"
        }

        fn evaluate(&self, _markup: &str) -> Result<Vec<RuleViolation>, EngineError> {
            panic!("parser blew up")
        }
    }

    #[tokio::test]
    async fn test_evaluation_runs_off_the_runtime_thread() {
        let engine = Arc::new(ThreadRecordingEngine(std::sync::Mutex::new(None)));
        let auditor = AccessibilityAuditor::new(engine.clone(), AccessibilityConfig::default());
        let bundle = InputBundle::from_image("shot.png", ".").with_markup(CLEAN_PAGE);

        let outcome = auditor.audit(&bundle).await;
        assert_eq!(outcome.score(), Some(1.0));

        let seen = engine.0.lock().expect("lock").expect("engine ran");
        assert_ne!(seen, std::thread::current().id());
    }

    #[tokio::test]
    async fn test_engine_panic_becomes_failed_outcome() {
        let bundle = InputBundle::from_image("shot.png", ".").with_markup(CLEAN_PAGE);
        let auditor =
            AccessibilityAuditor::new(Arc::new(PanickingEngine), AccessibilityConfig::default());
        let outcome = auditor.audit(&bundle).await;
        assert_eq!(outcome.failure_reason(), Some(FailureReason::EngineError));
    }

    #[tokio::test]
    async fn test_score_clamped_at_zero() {
        let imgs = "<img src=\"x.png\">".repeat(20);
        let html = format!(
            "<html lang=\"en\"><head><title>T</title></head><body>{}</body></html>",
            imgs
        );
        let bundle = InputBundle::from_image("shot.png", ".").with_markup(html);
        let auditor = AccessibilityAuditor::from_config(&AccessibilityConfig::default());
        assert_eq!(auditor.audit(&bundle).await.score(), Some(0.0));
    }
}
