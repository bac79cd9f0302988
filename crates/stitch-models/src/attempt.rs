//! Records of individual normalization and compression attempts.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tagged outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt produced a usable output via `method`
    Succeeded { method: String },
    /// The attempt failed for `reason`
    Failed { reason: String },
}

impl AttemptOutcome {
    pub fn succeeded(method: impl Into<String>) -> Self {
        Self::Succeeded {
            method: method.into(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded { .. })
    }
}

/// One strategy tried while producing a canonical stream for a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizationAttempt {
    /// Strategy name (`fast_copy` or a re-encode tier name)
    pub method: String,
    /// Encoder preset, absent for stream copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// Target CRF, absent for stream copies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crf: Option<u8>,
    /// Corrective filters added on top of the fit filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_filters: Vec<String>,
    pub outcome: AttemptOutcome,
}

/// One iteration of the size-constraint loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompressionAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    pub crf: u8,
    /// Maximum video bitrate in kbit/s
    pub bitrate_cap_kbps: u32,
    /// Size of the working file before the attempt
    pub input_size: u64,
    /// Size of the candidate, if the encode produced one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resulting_size: Option<u64>,
    /// Whether the candidate replaced the working file
    pub accepted: bool,
    /// Encode failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let json = serde_json::to_value(AttemptOutcome::succeeded("fast_copy")).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["method"], "fast_copy");

        let json = serde_json::to_value(AttemptOutcome::failed("timeout")).unwrap();
        assert_eq!(json["status"], "failed");
        assert!(!AttemptOutcome::failed("timeout").is_success());
    }
}
