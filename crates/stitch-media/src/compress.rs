//! Size-constraint loop over the concatenated video-only artifact.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use stitch_models::encoding::{CANONICAL_PIXEL_FORMAT, CANONICAL_VIDEO_ENCODER};
use stitch_models::CompressionAttempt;

use crate::command::FfmpegCommand;
use crate::error::MediaResult;
use crate::fs_utils::{file_size, remove_if_exists};
use crate::metrics;
use crate::runner::Engine;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Knobs of the size-constraint loop and the post-mux corrective pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPolicy {
    /// CRF the loop starts from
    pub initial_crf: u8,
    pub max_attempts: u32,
    /// CRF is never raised beyond this
    pub crf_max: u8,
    /// CRF increment after the first attempt
    pub crf_step: u8,
    /// First-attempt CRF for inputs more than 3x, 2x, 1.5x and at most
    /// 1.5x over the ceiling
    pub bucket_crfs: [u8; 4],
    /// Fixed CRF of the single post-mux corrective pass
    pub corrective_crf: u8,
    /// x264 preset for every size-driven encode
    pub preset: String,
    /// Attempt timeout before scaling by input size
    pub base_timeout: Duration,
    /// Added per MiB of input
    pub timeout_per_mb: Duration,
    /// Upper bound of any single attempt
    pub max_timeout: Duration,
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self {
            initial_crf: 23,
            max_attempts: 4,
            crf_max: 40,
            crf_step: 3,
            bucket_crfs: [32, 30, 28, 26],
            corrective_crf: 30,
            preset: "veryfast".to_string(),
            base_timeout: Duration::from_secs(120),
            timeout_per_mb: Duration::from_secs(6),
            max_timeout: Duration::from_secs(900),
        }
    }
}

impl CompressionPolicy {
    /// CRF for `attempt` (1-based).
    ///
    /// The first attempt is bucketed by how far over the ceiling the input
    /// is; later attempts step up from the previous CRF. Never above
    /// `crf_max`.
    pub fn choose_crf(&self, attempt: u32, over_ratio: f64, previous_crf: u8) -> u8 {
        let crf = if attempt <= 1 {
            let [severe, high, moderate, mild] = self.bucket_crfs;
            if over_ratio > 3.0 {
                severe
            } else if over_ratio > 2.0 {
                high
            } else if over_ratio > 1.5 {
                moderate
            } else {
                mild
            }
        } else {
            previous_crf.saturating_add(self.crf_step)
        };
        crf.min(self.crf_max)
    }

    /// Maximum video bitrate (kbit/s) for a CRF; lower as CRF rises.
    pub fn bitrate_cap_kbps(&self, crf: u8) -> u32 {
        match crf {
            0..=23 => 5000,
            24..=26 => 4000,
            27..=28 => 3000,
            29..=30 => 2500,
            31..=32 => 2000,
            33..=35 => 1500,
            _ => 1000,
        }
    }

    /// Timeout for encoding a file of `input_size` bytes.
    pub fn attempt_timeout(&self, input_size: u64) -> Duration {
        let mb = u32::try_from(input_size / BYTES_PER_MB).unwrap_or(u32::MAX);
        let scaled = self
            .base_timeout
            .saturating_add(self.timeout_per_mb.saturating_mul(mb));
        scaled.min(self.max_timeout)
    }
}

/// Result of the size-constraint loop.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    /// Smallest artifact produced (the input itself if nothing was accepted)
    pub output: PathBuf,
    pub final_size: u64,
    pub attempts: Vec<CompressionAttempt>,
    pub within_ceiling: bool,
}

impl CompressionOutcome {
    /// Whether any attempt ran.
    pub fn compressed(&self) -> bool {
        !self.attempts.is_empty()
    }
}

/// Encode `input` muted at `crf` with a bitrate cap.
pub fn compression_command(
    input: &Path,
    output: &Path,
    crf: u8,
    bitrate_cap_kbps: u32,
    preset: &str,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .map("0:v:0")
        .video_codec(CANONICAL_VIDEO_ENCODER)
        .preset(preset)
        .crf(crf)
        .max_bitrate_kbps(bitrate_cap_kbps)
        .output_args(["-pix_fmt", CANONICAL_PIXEL_FORMAT])
        .no_audio()
        .faststart()
}

/// Force `input` under `ceiling` bytes.
///
/// Runs at most `max_attempts` encodes, each from the current smallest
/// file. A failed encode or a candidate that is not smaller leaves the
/// working file untouched, so accepted sizes never increase. Exhausting
/// the loop while still oversized is reported, not raised. Candidates
/// are written into `work_dir`.
pub async fn compress_to_ceiling(
    engine: &Engine,
    input: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    ceiling: u64,
    policy: &CompressionPolicy,
) -> MediaResult<CompressionOutcome> {
    let input = input.as_ref();
    let work_dir = work_dir.as_ref();

    let mut working = input.to_path_buf();
    let mut size = file_size(input).await?;
    let mut crf = policy.initial_crf;
    let mut attempt = 0u32;
    let mut attempts = Vec::new();

    while size > ceiling && attempt < policy.max_attempts && crf <= policy.crf_max {
        attempt += 1;
        let ratio = size as f64 / ceiling.max(1) as f64;
        let next_crf = policy.choose_crf(attempt, ratio, crf);
        if attempt > 1 && next_crf <= crf {
            // Already at the CRF ceiling.
            break;
        }
        crf = next_crf;
        let cap = policy.bitrate_cap_kbps(crf);

        let candidate = work_dir.join(format!("compressed_{}.mp4", attempt));
        let cmd = compression_command(&working, &candidate, crf, cap, &policy.preset);
        let timeout = policy.attempt_timeout(size);

        info!(attempt, crf, bitrate_cap_kbps = cap, size, ceiling, "Compression attempt");

        let mut record = CompressionAttempt {
            attempt,
            crf,
            bitrate_cap_kbps: cap,
            input_size: size,
            resulting_size: None,
            accepted: false,
            error: None,
        };

        match engine.transcode(&cmd, timeout).await {
            Ok(new_size) if new_size < size => {
                if working != input {
                    let _ = remove_if_exists(&working).await;
                }
                working = candidate;
                size = new_size;
                record.resulting_size = Some(new_size);
                record.accepted = true;
            }
            Ok(new_size) => {
                warn!(attempt, crf, new_size, size, "Candidate not smaller, discarding");
                let _ = remove_if_exists(&candidate).await;
                record.resulting_size = Some(new_size);
            }
            Err(e) => {
                warn!(attempt, crf, "Compression attempt failed: {}", e.reason());
                let _ = remove_if_exists(&candidate).await;
                record.error = Some(e.reason());
            }
        }

        metrics::record_compression_attempt(record.accepted);
        attempts.push(record);
    }

    let within_ceiling = size <= ceiling;
    if !within_ceiling {
        warn!(size, ceiling, attempts = attempts.len(), "Still over size ceiling after compression");
    }

    Ok(CompressionOutcome {
        output: working,
        final_size: size,
        attempts,
        within_ceiling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempt_buckets() {
        let policy = CompressionPolicy::default();
        assert_eq!(policy.choose_crf(1, 3.5, 23), 32);
        assert_eq!(policy.choose_crf(1, 2.4, 23), 30);
        assert_eq!(policy.choose_crf(1, 1.6, 23), 28);
        assert_eq!(policy.choose_crf(1, 1.1, 23), 26);
    }

    #[test]
    fn test_later_attempts_step_and_clamp() {
        let policy = CompressionPolicy::default();
        assert_eq!(policy.choose_crf(2, 5.0, 32), 35);
        assert_eq!(policy.choose_crf(3, 5.0, 38), 40);
        assert_eq!(policy.choose_crf(4, 5.0, 40), 40);
    }

    #[test]
    fn test_bitrate_cap_falls_as_crf_rises() {
        let policy = CompressionPolicy::default();
        let caps: Vec<u32> = (20..=45).map(|crf| policy.bitrate_cap_kbps(crf)).collect();
        assert!(caps.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_attempt_timeout_scales_and_clamps() {
        let policy = CompressionPolicy::default();
        assert_eq!(policy.attempt_timeout(0), Duration::from_secs(120));
        assert_eq!(policy.attempt_timeout(10 * BYTES_PER_MB), Duration::from_secs(180));
        assert_eq!(policy.attempt_timeout(10_000 * BYTES_PER_MB), Duration::from_secs(900));
    }

    #[test]
    fn test_command_is_muted_and_capped() {
        let args = compression_command(Path::new("in.mp4"), Path::new("out.mp4"), 30, 2500, "veryfast")
            .build_args();
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"2500k".to_string()));
        assert!(args.contains(&"30".to_string()));
    }

    #[tokio::test]
    async fn test_under_ceiling_is_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("concat.mp4");
        tokio::fs::write(&input, vec![0u8; 4096]).await.unwrap();

        let outcome = compress_to_ceiling(
            &Engine::default(),
            &input,
            dir.path(),
            8192,
            &CompressionPolicy::default(),
        )
        .await
        .unwrap();

        assert!(!outcome.compressed());
        assert!(outcome.within_ceiling);
        assert_eq!(outcome.output, input);
        assert_eq!(outcome.final_size, 4096);
    }
}
