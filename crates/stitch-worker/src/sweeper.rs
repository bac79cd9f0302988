//! Background cleanup of abandoned scratch directories and orphaned engine
//! processes left behind by crashed or killed jobs.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::metrics;

/// Engine binaries the sweeper looks for.
const ENGINE_COMMANDS: [&str; 2] = ["ffmpeg", "ffprobe"];

/// Result of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub removed_dirs: usize,
    pub killed_processes: usize,
}

/// A running engine process as seen in `/proc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProcess {
    pub pid: i32,
    pub ppid: i32,
    pub command: String,
}

impl EngineProcess {
    /// Reparented to init, so no job is waiting on it.
    pub fn is_orphaned(&self) -> bool {
        self.ppid == 1
    }
}

/// Parse one `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or
/// parentheses, so the fields after it are located from the last `)`.
pub fn parse_proc_stat(line: &str) -> Option<EngineProcess> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if close < open {
        return None;
    }

    let pid = line[..open].trim().parse().ok()?;
    let command = line[open + 1..close].to_string();
    let mut rest = line[close + 1..].split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;

    Some(EngineProcess { pid, ppid, command })
}

/// Engine processes listed under `proc_root`.
pub async fn list_engine_processes(proc_root: &Path) -> Vec<EngineProcess> {
    let mut found = Vec::new();
    let mut entries = match tokio::fs::read_dir(proc_root).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read {}: {}", proc_root.display(), e);
            return found;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }

        // Processes exit between listing and reading
        let Ok(stat) = tokio::fs::read_to_string(entry.path().join("stat")).await else {
            continue;
        };
        if let Some(process) = parse_proc_stat(&stat) {
            if ENGINE_COMMANDS.contains(&process.command.as_str()) {
                found.push(process);
            }
        }
    }

    found
}

/// Periodic scratch and process sweeper.
#[derive(Debug, Clone)]
pub struct ScratchSweeper {
    scratch_root: PathBuf,
    proc_root: PathBuf,
    config: SweeperConfig,
}

impl ScratchSweeper {
    pub fn new(scratch_root: impl Into<PathBuf>, config: SweeperConfig) -> Self {
        Self {
            scratch_root: scratch_root.into(),
            proc_root: PathBuf::from("/proc"),
            config,
        }
    }

    /// Read processes from somewhere other than `/proc`.
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Run in the background until `shutdown` turns true.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting scratch sweeper (interval {:?}, safety window {:?})",
            self.config.interval, self.config.safety_window
        );
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender can never signal again
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received, stopping sweeper");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let stats = self.sweep_once().await;
                    if stats != SweepStats::default() {
                        info!(
                            removed_dirs = stats.removed_dirs,
                            killed_processes = stats.killed_processes,
                            "Sweep finished"
                        );
                    }
                }
            }
        }
    }

    /// One pass over scratch directories and engine processes.
    pub async fn sweep_once(&self) -> SweepStats {
        let stats = SweepStats {
            removed_dirs: self.remove_stale_dirs().await,
            killed_processes: self.kill_orphans().await,
        };
        metrics::record_sweep(stats.removed_dirs, stats.killed_processes);
        stats
    }

    async fn remove_stale_dirs(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.scratch_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Cannot read scratch root {}: {}", self.scratch_root.display(), e);
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(metadata) = entry.metadata().await else { continue };
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|mtime| now.duration_since(mtime).ok())
                .unwrap_or(Duration::ZERO);
            if age < self.config.safety_window {
                continue;
            }

            let path = entry.path();
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => {
                    info!("Removed stale scratch directory {} (age {:?})", path.display(), age);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }

        removed
    }

    async fn kill_orphans(&self) -> usize {
        let processes = list_engine_processes(&self.proc_root).await;
        if processes.len() <= self.config.process_threshold {
            return 0;
        }

        warn!(
            "{} engine processes running (threshold {}), killing orphans",
            processes.len(),
            self.config.process_threshold
        );
        processes
            .iter()
            .filter(|p| p.is_orphaned())
            .filter(|p| kill_process(p))
            .count()
    }
}

#[cfg(unix)]
fn kill_process(process: &EngineProcess) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(process.pid), Signal::SIGKILL) {
        Ok(()) => {
            info!(pid = process.pid, command = %process.command, "Killed orphaned engine process");
            true
        }
        Err(e) => {
            warn!(pid = process.pid, "Failed to kill orphaned engine process: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_process(_process: &EngineProcess) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_proc_stat() {
        let p = parse_proc_stat("4242 (ffmpeg) S 1 4242 4242 0 -1 4194304").unwrap();
        assert_eq!(p.pid, 4242);
        assert_eq!(p.ppid, 1);
        assert_eq!(p.command, "ffmpeg");
        assert!(p.is_orphaned());

        let odd = parse_proc_stat("77 (tmux: server (1)) R 300 77").unwrap();
        assert_eq!(odd.command, "tmux: server (1)");
        assert_eq!(odd.ppid, 300);

        assert!(parse_proc_stat("garbage").is_none());
    }

    #[tokio::test]
    async fn test_list_engine_processes_filters_by_command() {
        let proc_root = TempDir::new().unwrap();
        for (pid, stat) in [
            ("10", "10 (ffmpeg) S 1 10"),
            ("11", "11 (bash) S 1 11"),
            ("12", "12 (ffprobe) S 99 12"),
        ] {
            let dir = proc_root.path().join(pid);
            std::fs::create_dir(&dir).unwrap();
            std::fs::write(dir.join("stat"), stat).unwrap();
        }
        std::fs::create_dir(proc_root.path().join("self")).unwrap();

        let mut found = list_engine_processes(proc_root.path()).await;
        found.sort_by_key(|p| p.pid);
        let pids: Vec<i32> = found.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![10, 12]);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_stale_dirs() {
        let scratch = TempDir::new().unwrap();
        let job_dir = scratch.path().join("job-1");
        std::fs::create_dir(&job_dir).unwrap();
        std::fs::write(job_dir.join("concat.mp4"), b"data").unwrap();
        let empty_proc = TempDir::new().unwrap();

        let cautious = ScratchSweeper::new(
            scratch.path(),
            SweeperConfig {
                safety_window: Duration::from_secs(3600),
                ..SweeperConfig::default()
            },
        )
        .with_proc_root(empty_proc.path());
        assert_eq!(cautious.sweep_once().await.removed_dirs, 0);
        assert!(job_dir.exists());

        let eager = ScratchSweeper::new(
            scratch.path(),
            SweeperConfig {
                safety_window: Duration::ZERO,
                ..SweeperConfig::default()
            },
        )
        .with_proc_root(empty_proc.path());
        let stats = eager.sweep_once().await;
        assert_eq!(stats.removed_dirs, 1);
        assert_eq!(stats.killed_processes, 0);
        assert!(!job_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_scratch_root_is_not_an_error() {
        let sweeper = ScratchSweeper::new("/nonexistent/stitch-scratch", SweeperConfig::default())
            .with_proc_root("/nonexistent/proc");
        assert_eq!(sweeper.sweep_once().await, SweepStats::default());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let scratch = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = ScratchSweeper::new(scratch.path(), SweeperConfig::default())
            .with_proc_root(scratch.path())
            .spawn(rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_when_shutdown_sender_dropped() {
        let scratch = TempDir::new().unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = ScratchSweeper::new(scratch.path(), SweeperConfig::default())
            .with_proc_root(scratch.path())
            .spawn(rx);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
