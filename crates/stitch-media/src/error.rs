//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Output {path} is too small ({size} bytes, minimum {min})")]
    OutputTooSmall { path: PathBuf, size: u64, min: u64 },

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Source {url} returned {content_type} instead of media; it is likely private or blocked")]
    BlockedSource { url: String, content_type: String },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    /// Create a download failure error.
    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured engine error output, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            MediaError::FfmpegFailed { stderr, .. } | MediaError::FfprobeFailed { stderr, .. } => {
                stderr.as_deref()
            }
            _ => None,
        }
    }

    /// Short reason suitable for attempt records: the message plus the
    /// last line of captured stderr.
    pub fn reason(&self) -> String {
        match self.stderr().and_then(|s| s.lines().rev().find(|l| !l.trim().is_empty())) {
            Some(last) => format!("{}: {}", self, last.trim()),
            None => self.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_includes_last_stderr_line() {
        let err = MediaError::ffmpeg_failed(
            "exit status 1",
            Some("frame=1\nInvalid data found when processing input\n\n".to_string()),
            Some(1),
        );
        assert_eq!(
            err.reason(),
            "FFmpeg command failed: exit status 1: Invalid data found when processing input"
        );
    }

    #[test]
    fn test_reason_without_stderr() {
        assert_eq!(
            MediaError::Timeout(60).reason(),
            "Operation timed out after 60 seconds"
        );
        assert!(MediaError::Timeout(60).is_timeout());
    }
}
