//! Per-video canonicalization: the fast-copy path and the re-encode cascade.
//!
//! Both paths are expressed as [`Strategy`] values. A single executor,
//! [`run_strategies`], walks an ordered list until one succeeds and returns
//! a tagged [`StrategyReport`] instead of propagating intermediate errors.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use stitch_models::encoding::{CANONICAL_PIXEL_FORMAT, CANONICAL_VIDEO_ENCODER};
use stitch_models::{AttemptOutcome, NormalizationAttempt, TargetProfile};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;
use crate::metrics;
use crate::runner::Engine;

/// Method name recorded for the stream-copy path.
pub const FAST_COPY_METHOD: &str = "fast_copy";

/// Default stream-copy timeout.
pub const DEFAULT_FAST_COPY_TIMEOUT: Duration = Duration::from_secs(60);

/// One re-encode tier of the normalization cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationTier {
    /// Name recorded in attempt reports
    pub name: String,
    /// x264 preset
    pub preset: String,
    pub crf: u8,
    /// Filters appended after the fit and frame-rate filters
    pub extra_filters: Vec<String>,
    /// Demuxer/decoder options placed before `-i`
    pub extra_input_args: Vec<String>,
    pub timeout: Duration,
}

impl NormalizationTier {
    /// Fast preset, good quality.
    pub fn standard(timeout: Duration) -> Self {
        Self {
            name: "standard".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            extra_filters: Vec::new(),
            extra_input_args: Vec::new(),
            timeout,
        }
    }

    /// More encoder effort, forced pixel format.
    pub fn robust(timeout: Duration) -> Self {
        Self {
            name: "robust".to_string(),
            preset: "medium".to_string(),
            crf: 26,
            extra_filters: vec![format!("format={}", CANONICAL_PIXEL_FORMAT)],
            extra_input_args: Vec::new(),
            timeout,
        }
    }

    /// Slowest preset, timestamp reset and tolerant decoding for damaged sources.
    pub fn conservative(timeout: Duration) -> Self {
        Self {
            name: "conservative".to_string(),
            preset: "slow".to_string(),
            crf: 28,
            extra_filters: vec![
                format!("format={}", CANONICAL_PIXEL_FORMAT),
                "setpts=PTS-STARTPTS".to_string(),
            ],
            extra_input_args: ["-fflags", "+genpts+discardcorrupt", "-err_detect", "ignore_err"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            timeout,
        }
    }

    /// Fit-to-box, frame-rate and corrective filters as one `-vf` chain.
    pub fn filter_chain(&self, profile: &TargetProfile) -> String {
        let mut filters = vec![profile.fit_filter(), format!("fps={}", profile.frame_rate)];
        filters.extend(self.extra_filters.iter().cloned());
        filters.join(",")
    }

    fn command(&self, input: &Path, output: &Path, profile: &TargetProfile) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .input_args(self.extra_input_args.iter().cloned())
            .map("0:v:0")
            .video_filter(self.filter_chain(profile))
            .video_codec(CANONICAL_VIDEO_ENCODER)
            .preset(self.preset.clone())
            .crf(self.crf)
            .output_args(["-pix_fmt", CANONICAL_PIXEL_FORMAT])
            .frame_rate(profile.frame_rate)
            .no_audio()
            .faststart()
    }
}

/// Ordered tiers; each strictly more conservative than the one before.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationPlan {
    pub fast_copy_timeout: Duration,
    pub tiers: [NormalizationTier; 3],
}

impl Default for NormalizationPlan {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAST_COPY_TIMEOUT,
            [
                Duration::from_secs(300),
                Duration::from_secs(450),
                Duration::from_secs(600),
            ],
        )
    }
}

impl NormalizationPlan {
    /// Build the plan with per-tier timeouts.
    pub fn new(fast_copy_timeout: Duration, tier_timeouts: [Duration; 3]) -> Self {
        Self {
            fast_copy_timeout,
            tiers: [
                NormalizationTier::standard(tier_timeouts[0]),
                NormalizationTier::robust(tier_timeouts[1]),
                NormalizationTier::conservative(tier_timeouts[2]),
            ],
        }
    }

    /// Strategies for one video: fast copy first when eligible, then every tier.
    pub fn strategies(&self, fast_path_eligible: bool) -> Vec<Strategy> {
        let mut strategies = Vec::with_capacity(self.tiers.len() + 1);
        if fast_path_eligible {
            strategies.push(Strategy::FastCopy {
                timeout: self.fast_copy_timeout,
            });
        }
        strategies.extend(self.tiers.iter().cloned().map(Strategy::Reencode));
        strategies
    }
}

/// One way of producing a canonical video-only stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Lossless remux with timestamp regeneration
    FastCopy { timeout: Duration },
    /// Full re-encode at a cascade tier
    Reencode(NormalizationTier),
}

impl Strategy {
    pub fn name(&self) -> &str {
        match self {
            Strategy::FastCopy { .. } => FAST_COPY_METHOD,
            Strategy::Reencode(tier) => &tier.name,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Strategy::FastCopy { timeout } => *timeout,
            Strategy::Reencode(tier) => tier.timeout,
        }
    }

    async fn execute(
        &self,
        engine: &Engine,
        input: &Path,
        output: &Path,
        profile: &TargetProfile,
    ) -> MediaResult<u64> {
        match self {
            Strategy::FastCopy { timeout } => fast_copy(engine, input, output, *timeout).await,
            Strategy::Reencode(tier) => {
                engine
                    .transcode(&tier.command(input, output, profile), tier.timeout)
                    .await
            }
        }
    }

    fn record(&self, outcome: AttemptOutcome) -> NormalizationAttempt {
        match self {
            Strategy::FastCopy { .. } => NormalizationAttempt {
                method: FAST_COPY_METHOD.to_string(),
                preset: None,
                crf: None,
                extra_filters: Vec::new(),
                outcome,
            },
            Strategy::Reencode(tier) => NormalizationAttempt {
                method: tier.name.clone(),
                preset: Some(tier.preset.clone()),
                crf: Some(tier.crf),
                extra_filters: tier.extra_filters.clone(),
                outcome,
            },
        }
    }
}

/// Tagged result of walking a strategy list.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyReport {
    /// `Succeeded` with the winning method, or `Failed` with the last reason
    pub outcome: AttemptOutcome,
    /// Every attempt made, in order
    pub attempts: Vec<NormalizationAttempt>,
}

impl StrategyReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Winning method, if any.
    pub fn method(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Succeeded { method } => Some(method),
            AttemptOutcome::Failed { .. } => None,
        }
    }

    /// Reasons of every failed attempt joined for diagnostics.
    pub fn failure_summary(&self) -> String {
        self.attempts
            .iter()
            .filter_map(|a| match &a.outcome {
                AttemptOutcome::Failed { reason } => Some(format!("{}: {}", a.method, reason)),
                AttemptOutcome::Succeeded { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn fast_copy_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .input_args(["-fflags", "+genpts"])
        .map("0:v:0")
        .video_codec("copy")
        .no_audio()
        .output_args(["-avoid_negative_ts", "make_zero"])
        .faststart()
}

/// Lossless container-level remux of the video stream.
pub async fn fast_copy(
    engine: &Engine,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
) -> MediaResult<u64> {
    engine
        .transcode(&fast_copy_command(input.as_ref(), output.as_ref()), timeout)
        .await
}

/// Try `strategies` in order until one produces a valid output.
///
/// Failed attempts, timeouts included, move on to the next strategy and
/// leave no partial output behind. Cancellation stops the walk.
pub async fn run_strategies(
    engine: &Engine,
    strategies: &[Strategy],
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &TargetProfile,
) -> StrategyReport {
    let input = input.as_ref();
    let output = output.as_ref();
    let mut attempts = Vec::with_capacity(strategies.len());
    let mut last_reason = "no strategies to try".to_string();

    for strategy in strategies {
        let _ = remove_if_exists(output).await;

        debug!(
            input = %input.display(),
            method = strategy.name(),
            timeout_secs = strategy.timeout().as_secs(),
            "Trying strategy"
        );
        match strategy.execute(engine, input, output, profile).await {
            Ok(size) => {
                info!(
                    input = %input.display(),
                    method = strategy.name(),
                    size,
                    "Canonical stream produced"
                );
                metrics::record_normalization_attempt(strategy.name(), true);
                let outcome = AttemptOutcome::succeeded(strategy.name());
                attempts.push(strategy.record(outcome.clone()));
                return StrategyReport { outcome, attempts };
            }
            Err(e) => {
                let reason = e.reason();
                warn!(
                    input = %input.display(),
                    method = strategy.name(),
                    "Strategy failed: {}",
                    reason
                );
                metrics::record_normalization_attempt(strategy.name(), false);
                attempts.push(strategy.record(AttemptOutcome::failed(reason.clone())));
                let _ = remove_if_exists(output).await;
                last_reason = reason;

                if matches!(e, MediaError::Cancelled) {
                    break;
                }
            }
        }
    }

    StrategyReport {
        outcome: AttemptOutcome::failed(last_reason),
        attempts,
    }
}

/// Re-encode through the three-tier cascade only.
pub async fn normalize_with_retries(
    engine: &Engine,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &TargetProfile,
    plan: &NormalizationPlan,
) -> StrategyReport {
    run_strategies(engine, &plan.strategies(false), input, output, profile).await
}

/// Produce the canonical stream for one video, fast path first when eligible.
pub async fn canonicalize(
    engine: &Engine,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    profile: &TargetProfile,
    fast_path_eligible: bool,
    plan: &NormalizationPlan,
) -> StrategyReport {
    run_strategies(engine, &plan.strategies(fast_path_eligible), input, output, profile).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ExitResult;
    use crate::runner::{CommandRunner, Invocation};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Fails the first `failures` invocations, then writes a valid output.
    struct FlakyRunner {
        failures: usize,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl CommandRunner for FlakyRunner {
        async fn run(&self, invocation: Invocation) -> MediaResult<ExitResult> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(invocation.args.clone());
                calls.len()
            };
            if call <= self.failures {
                if call == 1 {
                    return Err(MediaError::Timeout(invocation.timeout.as_secs()));
                }
                return Ok(ExitResult {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            if let Some(path) = invocation.output_path() {
                tokio::fs::write(path, vec![1u8; 2048]).await?;
            }
            Ok(ExitResult {
                code: Some(0),
                ..Default::default()
            })
        }
    }

    fn engine(failures: usize) -> (Engine, Arc<FlakyRunner>) {
        let runner = Arc::new(FlakyRunner {
            failures,
            calls: Mutex::new(Vec::new()),
        });
        (Engine::new(runner.clone()), runner)
    }

    #[test]
    fn test_tiers_escalate() {
        let plan = NormalizationPlan::default();
        let [standard, robust, conservative] = &plan.tiers;
        assert!(standard.crf < robust.crf && robust.crf < conservative.crf);
        assert!(standard.timeout < robust.timeout && robust.timeout < conservative.timeout);
        assert!(standard.extra_filters.len() < conservative.extra_filters.len());
    }

    #[test]
    fn test_filter_chain_fits_and_forces_rate() {
        let tier = NormalizationTier::conservative(Duration::from_secs(1));
        let chain = tier.filter_chain(&TargetProfile::default());
        assert!(chain.starts_with("scale=1080:1920"));
        assert!(chain.contains(",fps=30,"));
        assert!(chain.ends_with("setpts=PTS-STARTPTS"));
    }

    #[test]
    fn test_strategy_order() {
        let plan = NormalizationPlan::default();
        let names: Vec<_> = plan
            .strategies(true)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, ["fast_copy", "standard", "robust", "conservative"]);
        assert_eq!(plan.strategies(false).len(), 3);
    }

    #[test]
    fn test_reencode_drops_audio() {
        let tier = NormalizationTier::standard(Duration::from_secs(1));
        let args = tier
            .command(Path::new("in.mp4"), Path::new("out.mp4"), &TargetProfile::default())
            .build_args();
        assert!(args.contains(&"-an".to_string()));
        assert!(args.contains(&"libx264".to_string()));
    }

    #[tokio::test]
    async fn test_fast_copy_failure_falls_back_to_first_tier() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("canon.mp4");
        let (engine, runner) = engine(1);

        let report = canonicalize(
            &engine,
            dir.path().join("in.mp4"),
            &out,
            &TargetProfile::default(),
            true,
            &NormalizationPlan::default(),
        )
        .await;

        assert_eq!(report.method(), Some("standard"));
        assert_eq!(report.attempts.len(), 2);
        assert_eq!(report.attempts[0].method, "fast_copy");
        assert!(!report.attempts[0].outcome.is_success());
        assert!(runner.calls.lock().unwrap()[0].contains(&"copy".to_string()));
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_fast_copy_remuxes_video_only() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("canon.mp4");
        let (engine, runner) = engine(0);

        let size = fast_copy(&engine, dir.path().join("in.mp4"), &out, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(size, 2048);
        let args = runner.calls.lock().unwrap()[0].clone();
        assert!(args.contains(&"+genpts".to_string()));
        assert!(args.contains(&"make_zero".to_string()));
        assert!(args.contains(&"-an".to_string()));
        assert_eq!(args.last(), Some(&out.to_string_lossy().to_string()));
    }

    #[tokio::test]
    async fn test_cascade_reaches_last_tier() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(2);

        let report = normalize_with_retries(
            &engine,
            dir.path().join("in.mp4"),
            dir.path().join("canon.mp4"),
            &TargetProfile::default(),
            &NormalizationPlan::default(),
        )
        .await;

        assert_eq!(report.method(), Some("conservative"));
        assert_eq!(report.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_all_tiers_failing_is_reported() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("canon.mp4");
        let (engine, _) = engine(10);

        let report = normalize_with_retries(
            &engine,
            dir.path().join("in.mp4"),
            &out,
            &TargetProfile::default(),
            &NormalizationPlan::default(),
        )
        .await;

        assert!(!report.is_success());
        assert_eq!(report.attempts.len(), 3);
        assert!(report.failure_summary().contains("conservative"));
        assert!(!out.exists());
    }
}
