//! Video stitching worker.
//!
//! This crate provides:
//! - The job pipeline: download, validate, canonicalize, concatenate,
//!   compress, mux and deliver
//! - Environment-driven configuration
//! - Per-job structured logging and job metrics
//! - A background sweeper for abandoned scratch space and engine processes

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod sweeper;

pub use config::{EngineTimeouts, PipelineConfig, SweeperConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::Pipeline;
pub use sweeper::{ScratchSweeper, SweepStats};
