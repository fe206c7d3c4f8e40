// SPDX-License-Identifier: PMPL-1.0-or-later
//! Configuration handling for fairnessbot.
//!
//! One immutable [`Config`] value is loaded (or defaulted) at startup, wrapped
//! in an `Arc` and threaded into the orchestrator; every component reads its
//! own section. Nothing is read from ambient global state after that point.

use crate::error::{FairnessError, Result};
use crate::fleet::Severity;
use crate::fusion::WeightConfig;
use crate::report::OutputFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Fusion weights per audit
    #[serde(default)]
    pub weights: WeightConfig,

    /// Accessibility scoring settings
    #[serde(default)]
    pub accessibility: AccessibilityConfig,

    /// Contrast thresholds and detector settings
    #[serde(default)]
    pub contrast: ContrastConfig,

    /// Dark-pattern detection settings
    #[serde(default)]
    pub dark_patterns: DarkPatternConfig,

    /// Live-fetch settings
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Narrative enrichment settings
    #[serde(default)]
    pub narrative: NarrativeConfig,

    /// Report output settings
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Check invariants the audits rely on
    pub fn validate(&self) -> Result<()> {
        self.weights.validate()?;

        if !(self.accessibility.normalization > 0.0) {
            return Err(FairnessError::Config(
                "accessibility.normalization must be positive".to_string(),
            ));
        }
        for severity in Severity::all() {
            let weight = self.accessibility.severity_weights.weight(severity);
            if !weight.is_finite() || weight < 0.0 {
                return Err(FairnessError::Config(format!(
                    "accessibility.severity_weights.{} must be non-negative",
                    severity.to_string().to_lowercase()
                )));
            }
        }
        if self.contrast.normal_text_ratio < 1.0 || self.contrast.large_text_ratio < 1.0 {
            return Err(FairnessError::Config(
                "contrast thresholds must be at least 1:1".to_string(),
            ));
        }
        if self.contrast.tile_size_px == 0 {
            return Err(FairnessError::Config(
                "contrast.tile_size_px must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.dark_patterns.classifier.threshold) {
            return Err(FairnessError::Config(
                "dark_patterns.classifier.threshold must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accessibility scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessibilityConfig {
    /// Weighted violation count that maps to a score of 0
    #[serde(default = "default_normalization")]
    pub normalization: f64,

    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,

    /// Per-severity weights for the weighted violation count
    #[serde(default)]
    pub severity_weights: SeverityWeights,
}

impl Default for AccessibilityConfig {
    fn default() -> Self {
        Self {
            severity_weights: SeverityWeights::default(),
            normalization: default_normalization(),
            timeout_secs: default_audit_timeout(),
        }
    }
}

impl AccessibilityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_normalization() -> f64 {
    25.0
}

fn default_audit_timeout() -> u64 {
    30
}

/// Weight of one violation per severity class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub critical: f64,
    pub serious: f64,
    pub moderate: f64,
    pub minor: f64,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self {
            critical: 3.0,
            serious: 2.0,
            moderate: 1.0,
            minor: 0.5,
        }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::Serious => self.serious,
            Severity::Moderate => self.moderate,
            Severity::Minor => self.minor,
        }
    }
}

/// Contrast thresholds and built-in detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastConfig {
    /// Required ratio for normal text (WCAG AA 1.4.3)
    #[serde(default = "default_normal_ratio")]
    pub normal_text_ratio: f64,

    /// Required ratio for large text
    #[serde(default = "default_large_ratio")]
    pub large_text_ratio: f64,

    /// Ink height at which a region counts as large text
    #[serde(default = "default_large_text_height")]
    pub large_text_min_height_px: u32,

    /// Side of the square tiles the detector scans
    #[serde(default = "default_tile_size")]
    pub tile_size_px: u32,

    /// Luminance spread below which a tile is treated as flat background
    #[serde(default = "default_min_spread")]
    pub min_luminance_spread: f64,

    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            normal_text_ratio: default_normal_ratio(),
            large_text_ratio: default_large_ratio(),
            large_text_min_height_px: default_large_text_height(),
            tile_size_px: default_tile_size(),
            min_luminance_spread: default_min_spread(),
            timeout_secs: default_audit_timeout(),
        }
    }
}

impl ContrastConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_normal_ratio() -> f64 {
    4.5
}

fn default_large_ratio() -> f64 {
    3.0
}

fn default_large_text_height() -> u32 {
    24
}

fn default_tile_size() -> u32 {
    32
}

fn default_min_spread() -> f64 {
    0.03
}

/// Dark-pattern detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DarkPatternConfig {
    /// Segments shorter than this are not analysed
    #[serde(default = "default_min_segment_chars")]
    pub min_segment_chars: usize,

    #[serde(default = "default_audit_timeout")]
    pub timeout_secs: u64,

    /// Primary tier
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Fallback tier: category name to lowercase phrases
    #[serde(default = "default_lexicon")]
    pub lexicon: BTreeMap<String, Vec<String>>,
}

impl Default for DarkPatternConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            lexicon: default_lexicon(),
            min_segment_chars: default_min_segment_chars(),
            timeout_secs: default_audit_timeout(),
        }
    }
}

impl DarkPatternConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_min_segment_chars() -> usize {
    20
}

fn phrases(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_lexicon() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        (
            "Urgency".to_string(),
            phrases(&[
                "last chance",
                "limited time",
                "hurry",
                "expires soon",
                "buy now",
                "act now",
                "ends tonight",
                "only today",
            ]),
        ),
        (
            "Scarcity".to_string(),
            phrases(&["left in stock", "selling fast", "almost gone", "in high demand"]),
        ),
        (
            "Confirm-shaming".to_string(),
            phrases(&[
                "are you sure",
                "don't miss",
                "you'll regret",
                "no thanks, i",
                "i don't want to save",
            ]),
        ),
        (
            "Misdirection".to_string(),
            phrases(&["preselected", "selected by default", "hidden fee", "sneak"]),
        ),
        (
            "Forced continuity".to_string(),
            phrases(&[
                "auto-renew",
                "automatically renew",
                "will be charged",
                "free trial",
            ]),
        ),
    ])
}

/// Text classifier endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Text-classification endpoint; the tier is unavailable when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding a bearer token
    #[serde(default = "default_classifier_token_env")]
    pub api_key_env: String,

    /// Labels that count as dark patterns
    #[serde(default = "default_classifier_labels")]
    pub labels: Vec<String>,

    /// Minimum confidence for a label to count
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default = "default_http_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key_env: default_classifier_token_env(),
            labels: default_classifier_labels(),
            threshold: default_threshold(),
            request_timeout_secs: default_http_timeout(),
        }
    }
}

fn default_classifier_token_env() -> String {
    "FAIRNESSBOT_CLASSIFIER_TOKEN".to_string()
}

fn default_classifier_labels() -> Vec<String> {
    phrases(&["Urgency", "Confirm-shaming", "Misdirection"])
}

fn default_threshold() -> f64 {
    0.5
}

fn default_http_timeout() -> u64 {
    20
}

/// Headless browser settings for live collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Explicit Chrome/Chromium binary; otherwise `CHROME_BINARY` or PATH lookup
    #[serde(default)]
    pub chrome_binary: Option<PathBuf>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            chrome_binary: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            page_timeout_secs: default_page_timeout(),
        }
    }
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_page_timeout() -> u64 {
    30
}

/// Generative narrative service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_narrative_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_narrative_model")]
    pub model: String,

    /// Environment variable holding the API key; no key disables the service
    #[serde(default = "default_narrative_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: default_narrative_endpoint(),
            model: default_narrative_model(),
            api_key_env: default_narrative_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_narrative_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_narrative_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_narrative_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    4000
}

/// Report output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Formats written next to the captured artifacts
    #[serde(default = "default_formats")]
    pub formats: Vec<OutputFormat>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            formats: default_formats(),
        }
    }
}

fn default_formats() -> Vec<OutputFormat> {
    vec![OutputFormat::Json, OutputFormat::Markdown]
}

/// Load configuration from a path, falling back to defaults when absent
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!("Config file not found at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;

    debug!(?config, "Loaded configuration");
    Ok(config)
}

/// Write default configuration to a file
pub fn write_default_config(path: &Path) -> Result<()> {
    let config = Config::default();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content =
        toml::to_string_pretty(&config).map_err(|e| FairnessError::Config(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}
