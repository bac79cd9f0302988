//! Subprocess handle with timeout and kill semantics.
//!
//! Business logic never touches `tokio::process` directly; it starts a
//! [`ProcessHandle`], waits on it with a deadline (and optionally a
//! cancellation signal) and gets back an [`ExitResult`].

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};

/// Captured output is truncated to this many trailing bytes.
const MAX_CAPTURED_OUTPUT: usize = 256 * 1024;

/// Result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitResult {
    /// Exit code, `None` if terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExitResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running subprocess.
///
/// The child is spawned with `kill_on_drop`, so dropping the handle (for
/// example when the future awaiting it is cancelled) terminates the process.
pub struct ProcessHandle {
    program: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl ProcessHandle {
    /// Spawn `program` with `args`.
    pub fn start(program: &str, args: &[String]) -> MediaResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        debug!(program, pid = ?child.id(), "Spawned process");

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        Ok(Self {
            program: program.to_string(),
            child,
            stdout,
            stderr,
        })
    }

    /// OS process id, if still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for exit, killing the process once `timeout` elapses.
    pub async fn wait(&mut self, timeout: Duration) -> MediaResult<ExitResult> {
        self.wait_or_cancel(timeout, None).await
    }

    /// Wait for exit, killing the process on timeout or when `cancel` turns true.
    pub async fn wait_or_cancel(
        &mut self,
        timeout: Duration,
        cancel: Option<watch::Receiver<bool>>,
    ) -> MediaResult<ExitResult> {
        let outcome = tokio::select! {
            status = self.child.wait() => WaitOutcome::Exited(status?),
            _ = tokio::time::sleep(timeout) => WaitOutcome::TimedOut,
            _ = cancelled(cancel) => WaitOutcome::Cancelled,
        };

        match outcome {
            WaitOutcome::Exited(status) => {
                let stdout = collect(self.stdout.take()).await;
                let stderr = collect(self.stderr.take()).await;
                Ok(ExitResult {
                    code: status.code(),
                    stdout,
                    stderr,
                })
            }
            WaitOutcome::TimedOut => {
                warn!(
                    "{} timed out after {} seconds, killing process",
                    self.program,
                    timeout.as_secs()
                );
                self.kill().await?;
                Err(MediaError::Timeout(timeout.as_secs()))
            }
            WaitOutcome::Cancelled => {
                info!("{} cancelled, killing process", self.program);
                self.kill().await?;
                Err(MediaError::Cancelled)
            }
        }
    }

    /// Forcibly terminate the process and reap it.
    pub async fn kill(&mut self) -> MediaResult<()> {
        match self.child.kill().await {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Resolves once the cancel flag is set; never resolves without a receiver
/// or after the sender is gone.
async fn cancelled(cancel: Option<watch::Receiver<bool>>) {
    if let Some(mut rx) = cancel {
        if rx.wait_for(|flag| *flag).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

fn drain<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf).await;
        buf
    })
}

async fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    let bytes = match handle {
        Some(h) => h.await.unwrap_or_default(),
        None => Vec::new(),
    };
    let start = bytes.len().saturating_sub(MAX_CAPTURED_OUTPUT);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let mut handle = ProcessHandle::start("sh", &sh("echo out; echo err >&2; exit 3")).unwrap();
        let result = handle.wait(Duration::from_secs(10)).await.unwrap();
        assert_eq!(result.code, Some(3));
        assert!(!result.success());
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let mut handle = ProcessHandle::start("sh", &sh("sleep 30")).unwrap();
        let err = handle.wait(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, MediaError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancel_signal_kills_process() {
        let (tx, rx) = watch::channel(false);
        let mut handle = ProcessHandle::start("sh", &sh("sleep 30")).unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let err = handle
            .wait_or_cancel(Duration::from_secs(30), Some(rx))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let mut handle = ProcessHandle::start("sh", &sh("exit 0")).unwrap();
        let result = handle
            .wait_or_cancel(Duration::from_secs(10), Some(rx))
            .await
            .unwrap();
        assert!(result.success());
    }
}
