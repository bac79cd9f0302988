//! Input video models.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Structural properties of a downloaded file, or the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ValidationResult {
    /// Whether the file passed every structural check
    pub is_valid: bool,
    /// Video codec name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate as reported by the probe (e.g. "30/1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<String>,
    /// Duration in seconds
    pub duration: f64,
    /// Whether an audio stream is present
    #[serde(default)]
    pub has_audio: bool,
    /// Human-readable rejection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    /// A rejected file.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Rejection reason, or a generic message when none was recorded.
    pub fn reason(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown validation failure")
    }
}

/// One source video of a job.
///
/// Created on download, immutable once validated and discarded together
/// with the job's scratch directory.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InputVideo {
    /// Position in the job's input list
    pub index: usize,
    /// Network location the file was fetched from
    pub source_url: String,
    /// Local scratch path
    pub local_path: PathBuf,
    /// Probe result, set once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl InputVideo {
    pub fn new(index: usize, source_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            source_url: source_url.into(),
            local_path: local_path.into(),
            validation: None,
        }
    }

    /// Attach the validation result, consuming the unvalidated input.
    pub fn validated(mut self, validation: ValidationResult) -> Self {
        self.validation = Some(validation);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.is_valid)
    }

    /// Duration reported by validation, zero if not validated.
    pub fn duration(&self) -> f64 {
        self.validation.as_ref().map(|v| v.duration).unwrap_or(0.0)
    }
}
