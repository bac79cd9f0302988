//! Worker error types.

use thiserror::Error;

use stitch_media::MediaError;
use stitch_models::{JobFailure, JobId, JobStage, JobStateError};
use stitch_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Job-level failures. Every variant aborts the job.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Download of input {index} ({url}) failed: {source}")]
    Download {
        index: usize,
        url: String,
        #[source]
        source: MediaError,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Normalization of input {index} failed: {message}")]
    Normalization { index: usize, message: String },

    #[error("Concatenation failed: {0}")]
    Concat(#[source] MediaError),

    #[error("Mux failed: {0}")]
    Mux(#[source] MediaError),

    #[error("Upload to {key} failed: {source}")]
    Upload {
        key: String,
        conflict: bool,
        #[source]
        source: StorageError,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job state error: {0}")]
    State(#[from] JobStateError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn upload(key: impl Into<String>, source: StorageError) -> Self {
        Self::Upload {
            key: key.into(),
            conflict: source.is_conflict(),
            source,
        }
    }

    /// Stable snake_case category surfaced to callers.
    pub fn category(&self) -> &'static str {
        match self {
            WorkerError::Download { .. } => "download_error",
            WorkerError::Validation(_) => "validation_error",
            WorkerError::Normalization { .. } => "normalization_error",
            WorkerError::Concat(_) => "concat_error",
            WorkerError::Mux(_) => "mux_error",
            WorkerError::Upload { conflict: true, .. } => "upload_conflict",
            WorkerError::Upload { .. } => "upload_error",
            WorkerError::ConfigError(_) => "config_error",
            WorkerError::State(_) | WorkerError::Internal(_) => "internal_error",
            WorkerError::Media(_) => "media_error",
            WorkerError::Storage(_) => "storage_error",
            WorkerError::Io(_) => "io_error",
        }
    }

    /// Check if a caller may retry the job.
    ///
    /// Upload conflicts are retryable with a different destination key.
    /// Blocked sources, corrupt inputs, rejected keys and bad configuration
    /// are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Download { source, .. } => {
                !matches!(source, MediaError::BlockedSource { .. })
            }
            WorkerError::Upload { source, .. } | WorkerError::Storage(source) => !matches!(
                source,
                StorageError::InvalidKey(_) | StorageError::ConfigError(_)
            ),
            WorkerError::Media(e) => e.is_timeout(),
            _ => false,
        }
    }

    pub fn is_upload_conflict(&self) -> bool {
        matches!(self, WorkerError::Upload { conflict: true, .. })
    }

    /// Structured failure for a job that was in `stage` when this error hit.
    pub fn to_failure(&self, job_id: &JobId, stage: JobStage) -> JobFailure {
        JobFailure {
            job_id: job_id.clone(),
            category: self.category().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            stage,
        }
    }
}
