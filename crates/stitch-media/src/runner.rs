//! Engine invocation seam.
//!
//! Every media stage talks to FFmpeg/FFprobe through [`Engine`], which wraps
//! a [`CommandRunner`]. Production uses [`FfmpegRunner`]; tests substitute a
//! scripted runner.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::debug;

use stitch_models::encoding::MIN_OUTPUT_FILE_SIZE;

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::file_size;
use crate::metrics;
use crate::process::{ExitResult, ProcessHandle};

/// External program an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Program {
    Ffmpeg,
    Ffprobe,
}

impl Program {
    pub fn binary(&self) -> &'static str {
        match self {
            Program::Ffmpeg => "ffmpeg",
            Program::Ffprobe => "ffprobe",
        }
    }

    fn not_found(&self) -> MediaError {
        match self {
            Program::Ffmpeg => MediaError::FfmpegNotFound,
            Program::Ffprobe => MediaError::FfprobeNotFound,
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// One bounded engine run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: Program,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl Invocation {
    /// Path of the output file, by FFmpeg convention the last argument.
    pub fn output_path(&self) -> Option<&Path> {
        self.args.last().map(Path::new)
    }
}

/// Runs engine invocations to completion.
///
/// Implementations must honor `timeout` and `cancel`, and never leave a
/// process running once `run` returns.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> MediaResult<ExitResult>;
}

/// Runs the real binaries found in `PATH`.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner;

impl FfmpegRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for FfmpegRunner {
    async fn run(&self, invocation: Invocation) -> MediaResult<ExitResult> {
        let program = invocation.program;
        which::which(program.binary()).map_err(|_| program.not_found())?;

        debug!("Running {}: {} {}", program, program.binary(), invocation.args.join(" "));

        let mut handle = ProcessHandle::start(program.binary(), &invocation.args)?;
        handle
            .wait_or_cancel(invocation.timeout, invocation.cancel)
            .await
    }
}

/// Media engine facade shared by all stages of a job.
#[derive(Clone)]
pub struct Engine {
    runner: Arc<dyn CommandRunner>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Arc::new(FfmpegRunner::new()))
    }
}

impl Engine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            cancel: None,
        }
    }

    /// Attach a cancellation signal; every later invocation observes it.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel_rx);
        self
    }

    async fn invoke(
        &self,
        program: Program,
        args: Vec<String>,
        timeout: Duration,
    ) -> MediaResult<ExitResult> {
        let started = Instant::now();
        let result = self
            .runner
            .run(Invocation {
                program,
                args,
                timeout,
                cancel: self.cancel.clone(),
            })
            .await;

        let outcome = match &result {
            Ok(exit) if exit.success() => "success",
            Ok(_) => "failed",
            Err(e) if e.is_timeout() => "timeout",
            Err(MediaError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        metrics::record_engine_invocation(program.binary(), outcome, started.elapsed().as_secs_f64());

        result
    }

    /// Run FFprobe and return its stdout.
    pub async fn ffprobe(&self, args: Vec<String>, timeout: Duration) -> MediaResult<String> {
        let exit = self.invoke(Program::Ffprobe, args, timeout).await?;
        if !exit.success() {
            return Err(MediaError::FfprobeFailed {
                message: format!("FFprobe exited with status {:?}", exit.code),
                stderr: Some(exit.stderr),
            });
        }
        Ok(exit.stdout)
    }

    /// Run an FFmpeg command that produces a video file.
    ///
    /// Succeeds only when the process exits with status 0 and the output
    /// file exists with at least [`MIN_OUTPUT_FILE_SIZE`] bytes. Returns the
    /// output size.
    pub async fn transcode(&self, cmd: &FfmpegCommand, timeout: Duration) -> MediaResult<u64> {
        self.transcode_min(cmd, timeout, MIN_OUTPUT_FILE_SIZE).await
    }

    /// [`Engine::transcode`] with an explicit minimum output size.
    pub async fn transcode_min(
        &self,
        cmd: &FfmpegCommand,
        timeout: Duration,
        min_size: u64,
    ) -> MediaResult<u64> {
        let exit = self.invoke(Program::Ffmpeg, cmd.build_args(), timeout).await?;
        if !exit.success() {
            return Err(MediaError::ffmpeg_failed(
                format!("FFmpeg exited with status {:?}", exit.code),
                Some(exit.stderr),
                exit.code,
            ));
        }

        let output = cmd.output();
        let size = file_size(output).await.unwrap_or(0);
        if size < min_size {
            return Err(MediaError::OutputTooSmall {
                path: output.to_path_buf(),
                size,
                min: min_size,
            });
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes `size` bytes to the output path and exits with `code`.
    struct WritingRunner {
        size: usize,
        code: i32,
        seen: Mutex<Vec<Invocation>>,
    }

    #[async_trait]
    impl CommandRunner for WritingRunner {
        async fn run(&self, invocation: Invocation) -> MediaResult<ExitResult> {
            if let Some(path) = invocation.output_path() {
                tokio::fs::write(path, vec![0u8; self.size]).await?;
            }
            self.seen.lock().unwrap().push(invocation);
            Ok(ExitResult {
                code: Some(self.code),
                stdout: String::new(),
                stderr: "boom".to_string(),
            })
        }
    }

    fn engine(size: usize, code: i32) -> (Engine, Arc<WritingRunner>) {
        let runner = Arc::new(WritingRunner {
            size,
            code,
            seen: Mutex::new(Vec::new()),
        });
        (Engine::new(runner.clone()), runner)
    }

    #[tokio::test]
    async fn test_transcode_success_returns_size() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let (engine, runner) = engine(4096, 0);

        let size = engine
            .transcode(&FfmpegCommand::new("in.mp4", &out), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(size, 4096);

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, Program::Ffmpeg);
        assert_eq!(seen[0].timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transcode_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let (engine, _) = engine(4096, 1);

        let err = engine
            .transcode(&FfmpegCommand::new("in.mp4", &out), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FfmpegFailed { exit_code: Some(1), .. }));
        assert_eq!(err.stderr(), Some("boom"));
    }

    #[tokio::test]
    async fn test_transcode_tiny_output_is_failure() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        let (engine, _) = engine(10, 0);

        let err = engine
            .transcode(&FfmpegCommand::new("in.mp4", &out), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::OutputTooSmall { size: 10, .. }));

        let size = engine
            .transcode_min(&FfmpegCommand::new("in.mp4", &out), Duration::from_secs(5), 8)
            .await
            .unwrap();
        assert_eq!(size, 10);
    }

    #[tokio::test]
    async fn test_cancel_receiver_is_forwarded() {
        let dir = TempDir::new().unwrap();
        let (_tx, rx) = watch::channel(false);
        let (engine, runner) = engine(4096, 0);
        let engine = engine.with_cancel(rx);

        engine
            .transcode(
                &FfmpegCommand::new("in.mp4", dir.path().join("o.mp4")),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert!(runner.seen.lock().unwrap()[0].cancel.is_some());
    }
}
