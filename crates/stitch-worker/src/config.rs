//! Worker configuration.
//!
//! Built once at start-up (or in tests) and passed into the pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use stitch_media::{CompressionPolicy, NormalizationPlan};
use stitch_models::profile::DEFAULT_SIZE_CEILING_BYTES;
use stitch_models::AudioFormat;
use stitch_storage::S3Config;
use tracing::debug;

/// Timeouts for every kind of engine invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTimeouts {
    pub probe: Duration,
    pub fast_copy: Duration,
    /// Standard, robust and conservative tiers
    pub normalization_tiers: [Duration; 3],
    pub audio: Duration,
    pub concat: Duration,
    pub mux: Duration,
    pub corrective: Duration,
}

impl Default for EngineTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(30),
            fast_copy: Duration::from_secs(60),
            normalization_tiers: [
                Duration::from_secs(300),
                Duration::from_secs(450),
                Duration::from_secs(600),
            ],
            audio: Duration::from_secs(180),
            concat: Duration::from_secs(120),
            mux: Duration::from_secs(300),
            corrective: Duration::from_secs(600),
        }
    }
}

impl EngineTimeouts {
    pub fn normalization_plan(&self) -> NormalizationPlan {
        NormalizationPlan::new(self.fast_copy, self.normalization_tiers)
    }
}

/// Background scratch sweeper settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// Time between sweeps
    pub interval: Duration,
    /// Directories younger than this are never touched
    pub safety_window: Duration,
    /// Orphaned engine processes are only killed above this count
    pub process_threshold: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(10 * 60),
            safety_window: Duration::from_secs(2 * 60 * 60),
            process_threshold: 4,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of every job's scratch directory
    pub scratch_root: PathBuf,
    /// Where final artifacts are placed
    pub output_dir: PathBuf,
    /// Hard upper bound for the final artifact
    pub size_ceiling_bytes: u64,
    /// Maximum concurrent engine processes per job
    pub max_parallel_processes: usize,
    /// Per-source download timeout
    pub download_timeout: Duration,
    /// Allowed audio/video duration drift before a warning is recorded
    pub av_sync_tolerance_secs: f64,
    /// Higher source rate still accepted on the fast path
    pub tolerated_frame_rate: Option<u32>,
    /// Canonical audio format
    pub audio: AudioFormat,
    pub timeouts: EngineTimeouts,
    pub compression: CompressionPolicy,
    pub sweeper: SweeperConfig,
    /// Object store; without it jobs finish locally
    pub storage: Option<S3Config>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_root: PathBuf::from("/tmp/stitch"),
            output_dir: PathBuf::from("./output"),
            size_ceiling_bytes: DEFAULT_SIZE_CEILING_BYTES,
            max_parallel_processes: 4,
            download_timeout: Duration::from_secs(600),
            av_sync_tolerance_secs: 0.5,
            tolerated_frame_rate: None,
            audio: AudioFormat::default(),
            timeouts: EngineTimeouts::default(),
            compression: CompressionPolicy::default(),
            sweeper: SweeperConfig::default(),
            storage: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn env_secs(name: &str, default: Duration) -> Duration {
    env_parse::<u64>(name)
        .map(Duration::from_secs)
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Create config from environment variables.
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let t = defaults.timeouts.clone();
        let c = defaults.compression.clone();
        let s = defaults.sweeper.clone();

        let storage = match S3Config::from_env() {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                debug!("Object store disabled: {}", e);
                None
            }
        };

        Self {
            scratch_root: std::env::var("STITCH_SCRATCH_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            output_dir: std::env::var("STITCH_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            size_ceiling_bytes: env_parse("STITCH_SIZE_CEILING_BYTES")
                .unwrap_or(defaults.size_ceiling_bytes),
            max_parallel_processes: env_parse::<usize>("STITCH_MAX_PARALLEL_PROCESSES")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_parallel_processes),
            download_timeout: env_secs("STITCH_DOWNLOAD_TIMEOUT_SECS", defaults.download_timeout),
            av_sync_tolerance_secs: env_parse::<f64>("STITCH_AV_SYNC_TOLERANCE_SECS")
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(defaults.av_sync_tolerance_secs),
            tolerated_frame_rate: env_parse("STITCH_TOLERATED_FRAME_RATE"),
            audio: defaults.audio,
            timeouts: EngineTimeouts {
                probe: env_secs("STITCH_PROBE_TIMEOUT_SECS", t.probe),
                fast_copy: env_secs("STITCH_FAST_COPY_TIMEOUT_SECS", t.fast_copy),
                normalization_tiers: [
                    env_secs("STITCH_TIER1_TIMEOUT_SECS", t.normalization_tiers[0]),
                    env_secs("STITCH_TIER2_TIMEOUT_SECS", t.normalization_tiers[1]),
                    env_secs("STITCH_TIER3_TIMEOUT_SECS", t.normalization_tiers[2]),
                ],
                audio: env_secs("STITCH_AUDIO_TIMEOUT_SECS", t.audio),
                concat: env_secs("STITCH_CONCAT_TIMEOUT_SECS", t.concat),
                mux: env_secs("STITCH_MUX_TIMEOUT_SECS", t.mux),
                corrective: env_secs("STITCH_CORRECTIVE_TIMEOUT_SECS", t.corrective),
            },
            compression: CompressionPolicy {
                initial_crf: env_parse("STITCH_COMPRESSION_INITIAL_CRF").unwrap_or(c.initial_crf),
                max_attempts: env_parse("STITCH_COMPRESSION_MAX_ATTEMPTS").unwrap_or(c.max_attempts),
                crf_max: env_parse("STITCH_COMPRESSION_CRF_MAX").unwrap_or(c.crf_max),
                crf_step: env_parse("STITCH_COMPRESSION_CRF_STEP").unwrap_or(c.crf_step),
                corrective_crf: env_parse("STITCH_CORRECTIVE_CRF").unwrap_or(c.corrective_crf),
                base_timeout: env_secs("STITCH_COMPRESSION_BASE_TIMEOUT_SECS", c.base_timeout),
                max_timeout: env_secs("STITCH_COMPRESSION_MAX_TIMEOUT_SECS", c.max_timeout),
                ..c
            },
            sweeper: SweeperConfig {
                enabled: env_parse("STITCH_SWEEPER_ENABLED").unwrap_or(s.enabled),
                interval: env_secs("STITCH_SWEEPER_INTERVAL_SECS", s.interval),
                safety_window: env_secs("STITCH_SWEEPER_SAFETY_WINDOW_SECS", s.safety_window),
                process_threshold: env_parse("STITCH_SWEEPER_PROCESS_THRESHOLD")
                    .unwrap_or(s.process_threshold),
            },
            storage,
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), String> {
        if self.size_ceiling_bytes == 0 {
            return Err("Size ceiling must be positive".to_string());
        }
        if self.max_parallel_processes == 0 {
            return Err("At least one parallel process is required".to_string());
        }
        if self.compression.max_attempts == 0 {
            return Err("Compression needs at least one attempt".to_string());
        }
        if self.compression.initial_crf > self.compression.crf_max {
            return Err(format!(
                "Initial CRF {} exceeds CRF ceiling {}",
                self.compression.initial_crf, self.compression.crf_max
            ));
        }
        if self.compression.crf_max > 51 {
            return Err(format!("CRF ceiling {} is above 51", self.compression.crf_max));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.size_ceiling_bytes, 49 * 1024 * 1024);
        assert_eq!(config.max_parallel_processes, 4);
        assert_eq!(config.compression.max_attempts, 4);
        assert_eq!(config.timeouts.fast_copy, Duration::from_secs(60));
        assert!(config.storage.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalization_plan_uses_configured_timeouts() {
        let mut timeouts = EngineTimeouts::default();
        timeouts.normalization_tiers[2] = Duration::from_secs(999);
        let plan = timeouts.normalization_plan();
        assert_eq!(plan.tiers[2].timeout, Duration::from_secs(999));
        assert_eq!(plan.fast_copy_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validate_rejects_inverted_crf_range() {
        let mut config = PipelineConfig::default();
        config.compression.initial_crf = 45;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.max_parallel_processes = 0;
        assert!(config.validate().is_err());
    }
}
