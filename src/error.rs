// SPDX-License-Identifier: PMPL-1.0-or-later
//! Error types for fairnessbot

use crate::fusion::FusionError;
use thiserror::Error;

/// Main error type for fairnessbot
#[derive(Error, Debug)]
pub enum FairnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fusion failed: {0}")]
    Fusion(#[from] FusionError),
}

pub type Result<T> = std::result::Result<T, FairnessError>;
