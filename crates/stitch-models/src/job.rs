//! Job definitions and the per-job stage machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::{AspectPreset, InputVideo, TargetProfile};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of a job.
///
/// Stages advance strictly in declaration order; `Uploading` may be skipped
/// when no object store is configured. Any non-terminal stage may move to
/// `Failed`. There is no way out of `Done` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    #[default]
    Pending,
    Downloading,
    Validating,
    NormalizingOrFastCopying,
    /// Video concatenation; the audio track is finished alongside it.
    ConcatenatingVideo,
    CompressingIfOversized,
    Muxing,
    Uploading,
    Done,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Downloading => "downloading",
            JobStage::Validating => "validating",
            JobStage::NormalizingOrFastCopying => "normalizing_or_fast_copying",
            JobStage::ConcatenatingVideo => "concatenating_video",
            JobStage::CompressingIfOversized => "compressing_if_oversized",
            JobStage::Muxing => "muxing",
            JobStage::Uploading => "uploading",
            JobStage::Done => "done",
            JobStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStage::Done | JobStage::Failed)
    }

    /// The stage that normally follows this one.
    pub fn next(&self) -> Option<JobStage> {
        match self {
            JobStage::Pending => Some(JobStage::Downloading),
            JobStage::Downloading => Some(JobStage::Validating),
            JobStage::Validating => Some(JobStage::NormalizingOrFastCopying),
            JobStage::NormalizingOrFastCopying => Some(JobStage::ConcatenatingVideo),
            JobStage::ConcatenatingVideo => Some(JobStage::CompressingIfOversized),
            JobStage::CompressingIfOversized => Some(JobStage::Muxing),
            JobStage::Muxing => Some(JobStage::Uploading),
            JobStage::Uploading => Some(JobStage::Done),
            JobStage::Done | JobStage::Failed => None,
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(&self, to: JobStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        if to == JobStage::Failed {
            return true;
        }
        // Local-only jobs go straight from muxing to done.
        if *self == JobStage::Muxing && to == JobStage::Done {
            return true;
        }
        self.next() == Some(to)
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Violations of the job state invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobStateError {
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition { from: JobStage, to: JobStage },

    #[error("Canonical output count {actual} does not match input count {expected}")]
    OutputCountMismatch { expected: usize, actual: usize },
}

/// A job as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRequest {
    /// Ordered source video locations
    pub sources: Vec<String>,

    /// Output shape
    #[serde(default)]
    pub aspect: AspectPreset,

    /// File name of the final artifact
    pub output_filename: String,

    /// Object-store key; defaults to the output file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_key: Option<String>,
}

impl JobRequest {
    /// Minimum number of sources a job needs.
    pub const MIN_SOURCES: usize = 2;

    /// Validate the request.
    pub fn validate(&self) -> Result<(), String> {
        if self.sources.len() < Self::MIN_SOURCES {
            return Err(format!(
                "At least {} sources are required, got {}",
                Self::MIN_SOURCES,
                self.sources.len()
            ));
        }

        for (idx, source) in self.sources.iter().enumerate() {
            let parsed = url::Url::parse(source)
                .map_err(|e| format!("Source {} is not a valid URL: {}", idx, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(format!(
                    "Source {} must use http or https, got {}",
                    idx,
                    parsed.scheme()
                ));
            }
        }

        let name = self.output_filename.trim();
        if name.is_empty() {
            return Err("Output filename is required".to_string());
        }
        if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
            return Err(format!("Output filename must be a plain file name: {}", name));
        }

        if let Some(key) = &self.destination_key {
            if key.trim().is_empty() {
                return Err("Destination key must not be empty".to_string());
            }
            if key.starts_with('/') || key.split('/').any(|part| part == "..") {
                return Err(format!(
                    "Destination key must be relative without '..' segments: {}",
                    key
                ));
            }
        }

        Ok(())
    }

    /// Object-store key the artifact is delivered to.
    pub fn destination_key(&self) -> String {
        self.destination_key
            .clone()
            .unwrap_or_else(|| self.output_filename.trim().to_string())
    }
}

/// A job owned by exactly one execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingJob {
    /// Job identifier
    pub id: JobId,
    /// Inputs in request order
    pub inputs: Vec<InputVideo>,
    /// Target profile, fixed for the job
    pub profile: TargetProfile,
    /// Scratch directory exclusively owned by this job
    pub scratch_dir: PathBuf,
    /// Current stage
    pub stage: JobStage,
    /// Every stage entered, in order
    pub stage_history: Vec<JobStage>,
    /// Per-video canonical outputs, index-aligned with `inputs`
    pub canonical_outputs: Vec<PathBuf>,
}

impl ProcessingJob {
    pub fn new(id: JobId, profile: TargetProfile, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            inputs: Vec::new(),
            profile,
            scratch_dir: scratch_dir.into(),
            stage: JobStage::Pending,
            stage_history: vec![JobStage::Pending],
            canonical_outputs: Vec::new(),
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: JobStage) -> Result<(), JobStateError> {
        if !self.stage.can_transition_to(next) {
            return Err(JobStateError::InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.stage_history.push(next);
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = JobStage::Failed;
            self.stage_history.push(JobStage::Failed);
        }
    }

    /// Store the canonical outputs; they must line up one-to-one with the inputs.
    pub fn set_canonical_outputs(&mut self, outputs: Vec<PathBuf>) -> Result<(), JobStateError> {
        if outputs.len() != self.inputs.len() {
            return Err(JobStateError::OutputCountMismatch {
                expected: self.inputs.len(),
                actual: outputs.len(),
            });
        }
        self.canonical_outputs = outputs;
        Ok(())
    }

    /// Sum of validated input durations, in seconds.
    pub fn total_input_duration(&self) -> f64 {
        self.inputs.iter().map(|i| i.duration()).sum()
    }
}
