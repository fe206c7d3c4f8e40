// SPDX-License-Identifier: PMPL-1.0-or-later
//! Collector gateway.
//!
//! Produces the normalised [`InputBundle`] every audit reads: a screenshot
//! (always present), optional markup and the visible text extracted from it.
//! Two modes exist:
//!
//! - **Live**: a [`PageFetcher`] (headless Chrome by default) renders the page
//!   and writes `screenshot.png` and `page_dom.html` into the storage directory.
//! - **Static image**: an existing screenshot is validated and copied into the
//!   storage directory; the bundle carries no markup.
//!
//! Artifacts are written before the bundle is returned and never touched again,
//! so audits can read them without coordination.

pub mod chrome;
pub mod text;

use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub use chrome::ChromeFetcher;

/// File name of the captured screenshot inside the storage directory
pub const SCREENSHOT_FILE: &str = "screenshot.png";
/// File name of a JPEG screenshot loaded from disk
pub const JPEG_SCREENSHOT_FILE: &str = "screenshot.jpg";
/// File name of the captured markup inside the storage directory
pub const MARKUP_FILE: &str = "page_dom.html";

/// Where the audit subject comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Fetch and render a live address
    Live,
    /// Load a pre-captured screenshot
    StaticImage,
}

impl std::fmt::Display for InputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputMode::Live => write!(f, "live"),
            InputMode::StaticImage => write!(f, "static_image"),
        }
    }
}

/// Collection failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollectionError {
    #[error("browser automation unavailable: {0}")]
    AutomationUnavailable(String),

    #[error("fetching {url} failed: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("unreadable image {}: {reason}", path.display())]
    InvalidImage { path: PathBuf, reason: String },

    #[error("artifact storage error: {0}")]
    Storage(String),
}

/// Discriminant of a [`CollectionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionErrorKind {
    AutomationUnavailable,
    FetchFailed,
    FileNotFound,
    InvalidImage,
    Storage,
}

impl CollectionError {
    pub fn kind(&self) -> CollectionErrorKind {
        match self {
            CollectionError::AutomationUnavailable(_) => CollectionErrorKind::AutomationUnavailable,
            CollectionError::FetchFailed { .. } => CollectionErrorKind::FetchFailed,
            CollectionError::FileNotFound(_) => CollectionErrorKind::FileNotFound,
            CollectionError::InvalidImage { .. } => CollectionErrorKind::InvalidImage,
            CollectionError::Storage(_) => CollectionErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for CollectionError {
    fn from(e: std::io::Error) -> Self {
        CollectionError::Storage(e.to_string())
    }
}

/// Options for one collection
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Directory the artifacts are written to
    pub storage_dir: PathBuf,
    /// Previously captured screenshot to fall back on when automation is unavailable
    pub fallback_image: Option<PathBuf>,
}

impl CollectOptions {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            fallback_image: None,
        }
    }

    pub fn with_fallback_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.fallback_image = Some(path.into());
        self
    }

    /// A previously captured image usable for image-only continuation
    pub fn previous_capture(&self) -> Option<PathBuf> {
        self.fallback_image
            .clone()
            .filter(|p| p.is_file())
            .or_else(|| {
                [SCREENSHOT_FILE, JPEG_SCREENSHOT_FILE]
                    .into_iter()
                    .map(|name| self.storage_dir.join(name))
                    .find(|p| p.is_file())
            })
    }
}

/// What a bundle can support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub image: bool,
    pub markup: bool,
    pub text: bool,
}

/// Normalised audit subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBundle {
    /// Screenshot on disk, always present
    pub image_path: PathBuf,
    /// Captured markup, absent for image-only subjects
    #[serde(default, skip_serializing)]
    pub markup: Option<String>,
    /// Where the markup was persisted
    pub markup_path: Option<PathBuf>,
    /// Visible text extracted from the markup
    #[serde(default, skip_serializing)]
    pub text: Option<String>,
    /// Address the bundle was derived from
    pub source: Option<String>,
    /// Storage directory holding the artifacts
    pub storage_dir: PathBuf,
}

impl InputBundle {
    /// Image-only bundle
    pub fn from_image(image_path: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_path: image_path.into(),
            markup: None,
            markup_path: None,
            text: None,
            source: None,
            storage_dir: storage_dir.into(),
        }
    }

    /// Attach markup and derive its visible text
    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        let markup = markup.into();
        let visible = text::extract_visible_text(&markup);
        self.text = if visible.trim().is_empty() { None } else { Some(visible) };
        self.markup = Some(markup);
        self
    }

    pub fn with_markup_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.markup_path = Some(path.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            image: true,
            markup: self.markup.is_some(),
            text: self.text.as_deref().is_some_and(|t| !t.trim().is_empty()),
        }
    }
}

/// A page rendered by a fetcher
#[derive(Debug, Clone)]
pub struct CapturedPage {
    pub screenshot_path: PathBuf,
    pub markup: String,
}

/// Browser-automation seam for live collection
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Human-readable name of this fetcher
    fn name(&self) -> &str;

    /// Render `url`, writing the screenshot into `storage_dir`
    async fn fetch(&self, url: &str, storage_dir: &Path) -> Result<CapturedPage, CollectionError>;
}

/// Gateway producing [`InputBundle`]s
pub struct CollectorGateway {
    fetcher: Arc<dyn PageFetcher>,
    automation_down: AtomicBool,
}

impl CollectorGateway {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            automation_down: AtomicBool::new(false),
        }
    }

    /// Gateway using headless Chrome as configured
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ChromeFetcher::from_config(&config.collector)))
    }

    /// Whether live collection has been found permanently unavailable
    pub fn automation_unavailable(&self) -> bool {
        self.automation_down.load(Ordering::Relaxed)
    }

    /// Collect a bundle for `value` (an address or a file path)
    pub async fn collect(
        &self,
        mode: InputMode,
        value: &str,
        options: &CollectOptions,
    ) -> Result<InputBundle, CollectionError> {
        tokio::fs::create_dir_all(&options.storage_dir).await?;
        match mode {
            InputMode::Live => self.collect_live(value, options).await,
            InputMode::StaticImage => self.load_static(Path::new(value), options, None).await,
        }
    }

    async fn collect_live(
        &self,
        url: &str,
        options: &CollectOptions,
    ) -> Result<InputBundle, CollectionError> {
        if self.automation_unavailable() {
            debug!("Skipping live fetch: automation previously reported unavailable");
            return Err(CollectionError::AutomationUnavailable(format!(
                "{} was unavailable earlier in this process",
                self.fetcher.name()
            )));
        }

        info!("Fetching {} with {}", url, self.fetcher.name());
        let page = match self.fetcher.fetch(url, &options.storage_dir).await {
            Ok(page) => page,
            Err(err) => {
                if err.kind() == CollectionErrorKind::AutomationUnavailable {
                    warn!("Browser automation unavailable: {}", err);
                    self.automation_down.store(true, Ordering::Relaxed);
                }
                return Err(err);
            }
        };

        let markup_path = options.storage_dir.join(MARKUP_FILE);
        tokio::fs::write(&markup_path, &page.markup).await?;
        validate_image(&page.screenshot_path)?;

        let bundle = InputBundle::from_image(page.screenshot_path, &options.storage_dir)
            .with_markup(page.markup)
            .with_markup_path(markup_path)
            .with_source(url);
        debug!(capabilities = ?bundle.capabilities(), "Collected live bundle");
        Ok(bundle)
    }

    /// Load a screenshot from disk into the storage directory.
    ///
    /// `source` records the address an image-only continuation stands in for.
    pub async fn load_static(
        &self,
        path: &Path,
        options: &CollectOptions,
        source: Option<String>,
    ) -> Result<InputBundle, CollectionError> {
        if !path.is_file() {
            return Err(CollectionError::FileNotFound(path.to_path_buf()));
        }
        validate_image(path)?;

        tokio::fs::create_dir_all(&options.storage_dir).await?;
        let stored = options.storage_dir.join(stored_screenshot_name(path));
        if !same_file(path, &stored) {
            tokio::fs::copy(path, &stored).await?;
        }

        info!("Loaded screenshot {}", path.display());
        let mut bundle = InputBundle::from_image(stored, &options.storage_dir);
        if let Some(source) = source {
            bundle = bundle.with_source(source);
        }
        Ok(bundle)
    }
}

/// Storage name for a loaded screenshot; JPEGs keep their encoding
fn stored_screenshot_name(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => JPEG_SCREENSHOT_FILE,
        _ => SCREENSHOT_FILE,
    }
}

/// Check that the file decodes as an image without reading the pixels
fn validate_image(path: &Path) -> Result<(), CollectionError> {
    image::image_dimensions(path)
        .map(|_| ())
        .map_err(|e| CollectionError::InvalidImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
