//! Job outcome reporting.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{CompressionAttempt, JobId, JobStage, NormalizationAttempt};

/// How one input reached its canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoPath {
    /// Position in the input list
    pub index: usize,
    /// Source location
    pub source_url: String,
    /// Strategy that produced the canonical stream
    pub method: String,
    /// Every strategy tried, in order
    pub attempts: Vec<NormalizationAttempt>,
}

impl VideoPath {
    pub fn used_fast_path(&self) -> bool {
        self.method == "fast_copy"
    }
}

/// Summary of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub job_id: JobId,
    /// Final artifact on local disk
    pub output_path: PathBuf,
    /// Final artifact size in bytes
    pub final_size: u64,
    /// Ceiling the artifact was constrained to
    pub size_ceiling: u64,
    /// Sum of input durations in seconds
    pub total_input_duration: f64,
    /// Per-input path, in input order
    pub videos: Vec<VideoPath>,
    /// Size-constraint loop iterations
    pub compression_attempts: Vec<CompressionAttempt>,
    /// Whether the post-mux corrective pass ran
    pub corrective_pass_applied: bool,
    /// Non-fatal conditions worth surfacing
    pub warnings: Vec<String>,
    pub stage_history: Vec<JobStage>,
    /// Object-store key, if the artifact was uploaded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn within_ceiling(&self) -> bool {
        self.final_size <= self.size_ceiling
    }

    pub fn fast_path_count(&self) -> usize {
        self.videos.iter().filter(|v| v.used_fast_path()).count()
    }
}

/// Structured error surfaced to the caller of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobFailure {
    pub job_id: JobId,
    /// Error category (e.g. `validation_error`)
    pub category: String,
    pub message: String,
    /// Whether the caller may retry (possibly with a different key)
    pub retryable: bool,
    /// Stage the job was in when it failed
    pub stage: JobStage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AttemptOutcome;

    #[test]
    fn test_fast_path_count() {
        let path = |method: &str| VideoPath {
            index: 0,
            source_url: "https://a/1".into(),
            method: method.into(),
            attempts: vec![NormalizationAttempt {
                method: method.into(),
                preset: None,
                crf: None,
                extra_filters: vec![],
                outcome: AttemptOutcome::succeeded(method),
            }],
        };
        let now = Utc::now();
        let report = JobReport {
            job_id: JobId::from_string("job-1"),
            output_path: PathBuf::from("/out/final.mp4"),
            final_size: 10,
            size_ceiling: 20,
            total_input_duration: 3.0,
            videos: vec![path("fast_copy"), path("standard"), path("fast_copy")],
            compression_attempts: vec![],
            corrective_pass_applied: false,
            warnings: vec![],
            stage_history: vec![JobStage::Pending, JobStage::Done],
            uploaded_key: None,
            started_at: now,
            finished_at: now,
        };
        assert_eq!(report.fast_path_count(), 2);
        assert!(report.within_ceiling());
    }
}
