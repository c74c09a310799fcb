//! Runtime configuration for the stamping pipeline
//!
//! Values come from defaults, then `STAMP_*` environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::StampError;
use crate::normalize::ClampMode;

/// 16 MiB, the upload limit of the web front end
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StampConfig {
    /// Directory holding the seal PNGs
    pub artwork_dir: PathBuf,
    /// Substitute a generated seal for missing artwork at startup
    pub allow_placeholder: bool,
    pub clamp_mode: ClampMode,
    /// Batch worker threads, 0 means one per CPU
    pub batch_workers: usize,
    pub max_document_bytes: usize,
}

impl Default for StampConfig {
    fn default() -> Self {
        Self {
            artwork_dir: PathBuf::from("static/images"),
            allow_placeholder: false,
            clamp_mode: ClampMode::Lenient,
            batch_workers: 0,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}

impl StampConfig {
    /// Load configuration from environment variables
    ///
    /// Expected variables (all optional):
    /// - STAMP_ARTWORK_DIR: directory with seal images
    /// - STAMP_ALLOW_PLACEHOLDER: "true"/"false"/"1"/"0"
    /// - STAMP_CLAMP_MODE: "lenient" or "strict"
    /// - STAMP_BATCH_WORKERS: worker thread count
    /// - STAMP_MAX_DOCUMENT_BYTES: per-document size limit
    pub fn from_env() -> Result<Self, StampError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StampError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("STAMP_ARTWORK_DIR") {
            config.artwork_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("STAMP_ALLOW_PLACEHOLDER") {
            config.allow_placeholder = parse_bool("STAMP_ALLOW_PLACEHOLDER", &raw)?;
        }
        if let Some(raw) = lookup("STAMP_CLAMP_MODE") {
            config.clamp_mode = match raw.trim().to_lowercase().as_str() {
                "lenient" => ClampMode::Lenient,
                "strict" => ClampMode::Strict,
                _ => {
                    return Err(StampError::InvalidConfig(format!(
                        "STAMP_CLAMP_MODE: unknown mode {}",
                        raw
                    )))
                }
            };
        }
        if let Some(raw) = lookup("STAMP_BATCH_WORKERS") {
            config.batch_workers = parse_usize("STAMP_BATCH_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("STAMP_MAX_DOCUMENT_BYTES") {
            config.max_document_bytes = parse_usize("STAMP_MAX_DOCUMENT_BYTES", &raw)?;
            if config.max_document_bytes == 0 {
                return Err(StampError::InvalidConfig(
                    "STAMP_MAX_DOCUMENT_BYTES must be positive".to_string(),
                ));
            }
        }

        Ok(config)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, StampError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(StampError::InvalidConfig(format!("{}: not a boolean: {}", key, raw))),
    }
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, StampError> {
    raw.trim()
        .parse()
        .map_err(|_| StampError::InvalidConfig(format!("{}: not a number: {}", key, raw)))
}
