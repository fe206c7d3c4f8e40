// SPDX-License-Identifier: PMPL-1.0-or-later
//! Headless Chrome page fetcher.
//!
//! Drives a Chrome/Chromium binary in headless mode twice per page: once with
//! `--screenshot` to render the viewport and once with `--dump-dom` to capture
//! the serialised DOM after scripts ran.
//!
//! Binary resolution order:
//! 1. `collector.chrome_binary` from the configuration
//! 2. the `CHROME_BINARY` environment variable
//! 3. well-known names on `PATH`

use super::{CapturedPage, CollectionError, PageFetcher, SCREENSHOT_FILE};
use crate::config::CollectorConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Binary names probed on `PATH`
const CANDIDATE_BINARIES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Flags that keep headless Chrome usable in containers and CI
const SANDBOX_SAFE_FLAGS: &[&str] = &[
    "--headless=new",
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--hide-scrollbars",
];

/// Page fetcher backed by a headless Chrome process
pub struct ChromeFetcher {
    binary: Option<PathBuf>,
    window: (u32, u32),
    timeout: Duration,
}

impl ChromeFetcher {
    pub fn from_config(config: &CollectorConfig) -> Self {
        let binary = config
            .chrome_binary
            .clone()
            .filter(|p| p.is_file())
            .or_else(resolve_chrome_binary);
        Self {
            binary,
            window: (config.window_width, config.window_height),
            timeout: Duration::from_secs(config.page_timeout_secs),
        }
    }

    /// Use an explicit binary, bypassing resolution
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    fn base_command(&self, binary: &Path) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(SANDBOX_SAFE_FLAGS)
            .arg(format!("--window-size={},{}", self.window.0, self.window.1))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, url: &str) -> Result<Vec<u8>, CollectionError> {
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CollectionError::AutomationUnavailable(e.to_string()));
            }
            Ok(Err(e)) => {
                return Err(CollectionError::FetchFailed {
                    url: url.to_string(),
                    reason: format!("failed to launch Chrome: {}", e),
                });
            }
            Err(_) => {
                return Err(CollectionError::FetchFailed {
                    url: url.to_string(),
                    reason: format!("page load exceeded {}s", self.timeout.as_secs()),
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CollectionError::FetchFailed {
                url: url.to_string(),
                reason: format!(
                    "Chrome exited with {:?}: {}",
                    output.status.code(),
                    stderr.lines().last().unwrap_or("").trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl PageFetcher for ChromeFetcher {
    fn name(&self) -> &str {
        "headless-chrome"
    }

    async fn fetch(&self, url: &str, storage_dir: &Path) -> Result<CapturedPage, CollectionError> {
        let binary = self.binary.as_deref().ok_or_else(|| {
            CollectionError::AutomationUnavailable(
                "no Chrome binary found; set CHROME_BINARY or collector.chrome_binary".to_string(),
            )
        })?;

        let screenshot_path = storage_dir.join(SCREENSHOT_FILE);
        info!("Rendering {} with {}", url, binary.display());

        let mut shot = self.base_command(binary);
        shot.arg(format!("--screenshot={}", screenshot_path.display()))
            .arg(url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        self.run(shot, url).await?;

        if !screenshot_path.is_file() {
            return Err(CollectionError::FetchFailed {
                url: url.to_string(),
                reason: "Chrome exited without writing a screenshot".to_string(),
            });
        }

        let mut dom = self.base_command(binary);
        dom.arg("--dump-dom")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let stdout = self.run(dom, url).await?;
        let markup = String::from_utf8_lossy(&stdout).into_owned();
        debug!("Captured {} bytes of DOM from {}", markup.len(), url);

        Ok(CapturedPage {
            screenshot_path,
            markup,
        })
    }
}

/// Locate a Chrome binary from `CHROME_BINARY` or `PATH`
pub fn resolve_chrome_binary() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os("CHROME_BINARY") {
        let path = PathBuf::from(explicit);
        if path.is_file() {
            return Some(path);
        }
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .flat_map(|dir| CANDIDATE_BINARIES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectionErrorKind;

    #[tokio::test]
    async fn test_missing_binary_is_automation_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut fetcher = ChromeFetcher::from_config(&CollectorConfig::default());
        fetcher.binary = None;
        let err = fetcher.fetch("https://example.org", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), CollectionErrorKind::AutomationUnavailable);
    }

    #[tokio::test]
    async fn test_nonexistent_binary_is_automation_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let fetcher = ChromeFetcher::from_config(&CollectorConfig::default())
            .with_binary("/nonexistent/chrome-binary");
        let err = fetcher.fetch("https://example.org", dir.path()).await.unwrap_err();
        assert_eq!(err.kind(), CollectionErrorKind::AutomationUnavailable);
    }

    #[test]
    fn test_window_size_from_config() {
        let config = CollectorConfig {
            window_width: 1280,
            window_height: 720,
            ..CollectorConfig::default()
        };
        let fetcher = ChromeFetcher::from_config(&config);
        assert_eq!(fetcher.window, (1280, 720));
        assert_eq!(fetcher.timeout, Duration::from_secs(30));
    }
}
