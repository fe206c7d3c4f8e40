// SPDX-License-Identifier: PMPL-1.0-or-later
//! Contrast auditor - WCAG 1.4.3 Contrast (Minimum) over the rendered image
//!
//! A [`RegionDetector`] segments the screenshot into text-like regions and
//! measures each against its applicable threshold:
//! - 4.5:1 for normal text
//! - 3:1 for large text
//!
//! The score is the fraction of regions that pass. An image in which nothing
//! text-like was found is `Degraded(NoRegionsDetected)` with score 1.0, so a
//! blank capture is never mistaken for a clean one.

use super::{Auditor, EngineError};
use crate::collector::InputBundle;
use crate::config::ContrastConfig;
use crate::fleet::{Finding, FindingKind, Severity};
use crate::outcome::{AuditKind, AuditOutcome, DegradationReason, FailureReason};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Calculate relative luminance per WCAG 2.x
/// <https://www.w3.org/TR/WCAG21/#dfn-relative-luminance>
pub fn relative_luminance(r: u8, g: u8, b: u8) -> f64 {
    let srgb = [r, g, b].map(|c| {
        let v = c as f64 / 255.0;
        if v <= 0.04045 {
            v / 12.92
        } else {
            ((v + 0.055) / 1.055).powf(2.4)
        }
    });
    0.2126 * srgb[0] + 0.7152 * srgb[1] + 0.0722 * srgb[2]
}

/// Contrast ratio between two relative luminances, always >= 1.0
pub fn luminance_ratio(a: f64, b: f64) -> f64 {
    let (lighter, darker) = if a > b { (a, b) } else { (b, a) };
    (lighter + 0.05) / (darker + 0.05)
}

/// Contrast ratio between two colors
pub fn contrast_ratio(fg: (u8, u8, u8), bg: (u8, u8, u8)) -> f64 {
    luminance_ratio(
        relative_luminance(fg.0, fg.1, fg.2),
        relative_luminance(bg.0, bg.1, bg.2),
    )
}

/// One detected region and its measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMeasurement {
    /// Pixel region, e.g. `x=0,y=32,w=96,h=32`
    pub locator: String,
    pub measured_ratio: f64,
    pub required_ratio: f64,
    /// Whether the large-text threshold applied
    #[serde(default)]
    pub large_text: bool,
}

impl RegionMeasurement {
    pub fn passes(&self) -> bool {
        self.measured_ratio >= self.required_ratio
    }
}

/// Image-heuristic engine seam
pub trait RegionDetector: Send + Sync {
    /// Human-readable name of this detector
    fn name(&self) -> &str;

    /// Segment the image and measure every region
    fn detect(
        &self,
        image_path: &Path,
        config: &ContrastConfig,
    ) -> Result<Vec<RegionMeasurement>, EngineError>;
}

/// Payload of a contrast outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastData {
    pub detector: String,
    pub regions: Vec<RegionMeasurement>,
    pub passing: usize,
    /// Mean measured ratio; absent when nothing was detected
    pub average_ratio: Option<f64>,
    pub normal_text_ratio: f64,
    pub large_text_ratio: f64,
}

impl ContrastData {
    pub fn failing(&self) -> impl Iterator<Item = &RegionMeasurement> {
        self.regions.iter().filter(|r| !r.passes())
    }
}

/// Auditor for text/background contrast
pub struct ContrastAuditor {
    detector: Arc<dyn RegionDetector>,
    config: ContrastConfig,
}

impl ContrastAuditor {
    pub fn new(detector: Arc<dyn RegionDetector>, config: ContrastConfig) -> Self {
        Self { detector, config }
    }

    /// Auditor using the built-in [`TileContrastDetector`]
    pub fn from_config(config: &ContrastConfig) -> Self {
        Self::new(Arc::new(TileContrastDetector), config.clone())
    }

    fn finding(&self, region: &RegionMeasurement) -> Finding {
        let (rule_id, text_kind) = if region.large_text {
            ("contrast-large-text", "large text")
        } else {
            ("contrast-normal-text", "normal text")
        };
        let severity = if region.measured_ratio < self.config.large_text_ratio {
            Severity::Serious
        } else {
            Severity::Moderate
        };
        Finding::new(
            AuditKind::Contrast,
            FindingKind::LowContrast,
            rule_id,
            severity,
            &format!(
                "Contrast ratio {:.2}:1 is below the {:.1}:1 required for {}",
                region.measured_ratio, region.required_ratio, text_kind
            ),
        )
        .with_location(&region.locator)
        .with_ratios(region.measured_ratio, region.required_ratio)
        .with_suggestion(&format!(
            "Increase contrast between text and background to at least {:.1}:1",
            region.required_ratio
        ))
        .with_help_url("https://www.w3.org/WAI/WCAG21/Understanding/contrast-minimum.html")
    }
}

#[async_trait]
impl Auditor for ContrastAuditor {
    type Data = ContrastData;

    fn kind(&self) -> AuditKind {
        AuditKind::Contrast
    }

    async fn audit(&self, bundle: &InputBundle) -> AuditOutcome<ContrastData> {
        let detector = Arc::clone(&self.detector);
        let config = self.config.clone();
        let path = bundle.image_path.clone();

        let detected =
            tokio::task::spawn_blocking(move || detector.detect(&path, &config)).await;
        let regions = match detected {
            Ok(Ok(regions)) => regions,
            Ok(Err(e)) => {
                warn!("Region detector {} failed: {}", self.detector.name(), e);
                return AuditOutcome::failed_with(FailureReason::EngineError, e.to_string());
            }
            Err(e) => {
                warn!("Region detector task aborted: {}", e);
                return AuditOutcome::failed_with(FailureReason::EngineError, e.to_string());
            }
        };

        let passing = regions.iter().filter(|r| r.passes()).count();
        let average_ratio = if regions.is_empty() {
            None
        } else {
            Some(regions.iter().map(|r| r.measured_ratio).sum::<f64>() / regions.len() as f64)
        };
        let findings: Vec<Finding> = regions
            .iter()
            .filter(|r| !r.passes())
            .map(|r| self.finding(r))
            .collect();
        let total = regions.len();
        debug!(total, passing, "Contrast regions measured");

        let data = ContrastData {
            detector: self.detector.name().to_string(),
            regions,
            passing,
            average_ratio,
            normal_text_ratio: self.config.normal_text_ratio,
            large_text_ratio: self.config.large_text_ratio,
        };

        if total == 0 {
            debug!("No text regions detected");
            return AuditOutcome::degraded(data, 1.0, DegradationReason::NoRegionsDetected, findings);
        }
        AuditOutcome::success(data, passing as f64 / total as f64, findings)
    }
}

/// Built-in detector scanning the image in square tiles.
///
/// A tile whose luminance spread (98th minus 2nd percentile) reaches
/// `min_luminance_spread` holds text or UI ink; horizontally adjacent text
/// tiles in the same tile row merge into one region. Each region is measured
/// between its pooled 2nd and 98th luminance percentiles, and regions whose
/// ink is at least `large_text_min_height_px` tall use the large-text
/// threshold.
pub struct TileContrastDetector;

struct TileStats {
    luminances: Vec<f64>,
    ink_height: u32,
}

impl RegionDetector for TileContrastDetector {
    fn name(&self) -> &str {
        "tile-contrast"
    }

    fn detect(
        &self,
        image_path: &Path,
        config: &ContrastConfig,
    ) -> Result<Vec<RegionMeasurement>, EngineError> {
        let image = image::open(image_path)
            .map_err(|e| EngineError::Execution(format!("{}: {}", image_path.display(), e)))?
            .to_rgb8();
        let (width, height) = image.dimensions();
        let tile = config.tile_size_px.max(1);
        let mut regions = Vec::new();

        let mut y = 0;
        while y < height {
            let tile_h = tile.min(height - y);
            let mut run: Option<(u32, TileStats)> = None;

            let mut x = 0;
            while x < width {
                let tile_w = tile.min(width - x);
                let stats = tile_stats(&image, x, y, tile_w, tile_h, config.min_luminance_spread);

                match (stats, run.take()) {
                    (Some(stats), Some((start, mut acc))) => {
                        acc.luminances.extend(stats.luminances);
                        acc.ink_height = acc.ink_height.max(stats.ink_height);
                        run = Some((start, acc));
                    }
                    (Some(stats), None) => run = Some((x, stats)),
                    (None, Some((start, acc))) => {
                        regions.push(measure(start, y, x - start, tile_h, acc, config));
                    }
                    (None, None) => {}
                }
                x += tile_w;
            }
            if let Some((start, acc)) = run {
                regions.push(measure(start, y, width - start, tile_h, acc, config));
            }
            y += tile_h;
        }

        Ok(regions)
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Luminances of a tile, or `None` when the tile is flat background
fn tile_stats(
    image: &image::RgbImage,
    x0: u32,
    y0: u32,
    w: u32,
    h: u32,
    min_spread: f64,
) -> Option<TileStats> {
    let mut luminances = Vec::with_capacity((w * h) as usize);
    for y in y0..y0 + h {
        for x in x0..x0 + w {
            let [r, g, b] = image.get_pixel(x, y).0;
            luminances.push(relative_luminance(r, g, b));
        }
    }
    if luminances.is_empty() {
        return None;
    }

    let mut sorted = luminances.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let spread = percentile(&sorted, 0.98) - percentile(&sorted, 0.02);
    if spread < min_spread {
        return None;
    }

    // Background is the median; ink rows hold pixels far from it
    let background = percentile(&sorted, 0.5);
    let cutoff = spread / 2.0;
    let ink_rows: Vec<u32> = (0..h)
        .filter(|row| {
            let start = (row * w) as usize;
            luminances[start..start + w as usize]
                .iter()
                .any(|l| (l - background).abs() > cutoff)
        })
        .collect();
    let ink_height = match (ink_rows.first(), ink_rows.last()) {
        (Some(first), Some(last)) => last - first + 1,
        _ => 0,
    };

    Some(TileStats {
        luminances,
        ink_height,
    })
}

fn measure(x: u32, y: u32, w: u32, h: u32, mut acc: TileStats, config: &ContrastConfig) -> RegionMeasurement {
    acc.luminances.sort_by(|a, b| a.total_cmp(b));
    let measured_ratio = luminance_ratio(
        percentile(&acc.luminances, 0.02),
        percentile(&acc.luminances, 0.98),
    );
    let large_text = acc.ink_height >= config.large_text_min_height_px;
    RegionMeasurement {
        locator: format!("x={},y={},w={},h={}", x, y, w, h),
        measured_ratio,
        required_ratio: if large_text {
            config.large_text_ratio
        } else {
            config.normal_text_ratio
        },
        large_text,
    }
}
