#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and media stages for the Stitch pipeline.
//!
//! This crate provides:
//! - A process abstraction with timeout, cancellation and kill semantics
//! - Type-safe FFmpeg command building and a swappable engine runner
//! - Input validation via FFprobe and the fast-path decision
//! - The fast-copy path and the three-tier normalization cascade
//! - Audio extraction and concatenation
//! - Video concatenation, the size-constraint loop and the final mux
//! - Streaming source downloads

pub mod audio;
pub mod command;
pub mod compress;
pub mod concat;
pub mod decision;
pub mod download;
pub mod error;
pub mod fs_utils;
pub mod metrics;
pub mod mux;
pub mod normalize;
pub mod probe;
pub mod process;
pub mod runner;

pub use audio::{concat_audio, extract_audio, AudioSource};
pub use command::FfmpegCommand;
pub use compress::{compress_to_ceiling, CompressionOutcome, CompressionPolicy};
pub use concat::{concat_videos, write_concat_list};
pub use decision::is_fast_path_eligible;
pub use download::Downloader;
pub use error::{MediaError, MediaResult};
pub use fs_utils::move_file;
pub use mux::{mux, mux_within_ceiling, MuxOutcome};
pub use normalize::{
    canonicalize, fast_copy, normalize_with_retries, run_strategies, NormalizationPlan,
    NormalizationTier, Strategy, StrategyReport, FAST_COPY_METHOD,
};
pub use probe::{media_duration, validate};
pub use process::{ExitResult, ProcessHandle};
pub use runner::{CommandRunner, Engine, FfmpegRunner, Invocation, Program};
