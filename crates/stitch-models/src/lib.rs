//! Shared data models for the Stitch pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Target profiles and aspect presets
//! - Input videos and validation results
//! - Jobs, job requests and the job stage state machine
//! - Normalization and compression attempt records
//! - Job reports and structured failures

pub mod attempt;
pub mod encoding;
pub mod job;
pub mod profile;
pub mod report;
pub mod video;

// Re-export common types
pub use attempt::{AttemptOutcome, CompressionAttempt, NormalizationAttempt};
pub use encoding::AudioFormat;
pub use job::{JobId, JobRequest, JobStage, JobStateError, ProcessingJob};
pub use profile::{AspectPreset, AspectPresetParseError, TargetProfile};
pub use report::{JobFailure, JobReport, VideoPath};
pub use video::{InputVideo, ValidationResult};
