//! Job orchestration.
//!
//! A [`Pipeline`] drives one [`ProcessingJob`] through its stages:
//! download, validate, canonicalize each video (fast copy or the
//! normalization cascade) while the audio track is built alongside,
//! concatenate, compress to the size ceiling, mux, and optionally upload.
//! Any fatal error fails the job, stops its engine processes and removes
//! its scratch directory.

use chrono::Utc;
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tracing::Instrument;

use stitch_media::fs_utils::remove_dir_if_exists;
use stitch_media::{
    canonicalize, compress_to_ceiling, concat_audio, concat_videos, extract_audio,
    is_fast_path_eligible, media_duration, move_file, mux_within_ceiling, validate, AudioSource,
    Downloader, Engine, NormalizationPlan, FAST_COPY_METHOD,
};
use stitch_models::{
    CompressionAttempt, InputVideo, JobFailure, JobId, JobReport, JobRequest, JobStage,
    ProcessingJob, TargetProfile, VideoPath,
};
use stitch_storage::{deliver, unique_destination_key, ObjectStore};

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Everything a job accumulates for its report.
#[derive(Debug, Default)]
struct JobProgress {
    videos: Vec<VideoPath>,
    compression_attempts: Vec<CompressionAttempt>,
    corrective_pass_applied: bool,
    warnings: Vec<String>,
    output_path: PathBuf,
    final_size: u64,
    uploaded_key: Option<String>,
}

impl JobProgress {
    fn warn(&mut self, logger: &JobLogger, message: String) {
        logger.log_warning(&message);
        self.warnings.push(message);
    }
}

/// Output of the per-input video fan-out.
struct CanonicalVideo {
    path: PathBuf,
    record: VideoPath,
}

/// Output of the audio track.
struct AudioTrack {
    path: PathBuf,
    /// Inputs that had no audio stream
    silent_inputs: Vec<usize>,
}

/// Single-job transcoding pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    engine: Engine,
    downloader: Downloader,
    store: Option<Arc<dyn ObjectStore>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, engine: Engine, downloader: Downloader) -> Self {
        Self {
            config,
            engine,
            downloader,
            store: None,
        }
    }

    /// Deliver finished artifacts to `store`.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Target profile for a request.
    pub fn profile_for(&self, request: &JobRequest) -> TargetProfile {
        let profile = TargetProfile::for_preset(request.aspect, self.config.size_ceiling_bytes);
        match self.config.tolerated_frame_rate {
            Some(rate) => profile.with_tolerated_frame_rate(rate),
            None => profile,
        }
    }

    /// Run a job under a fresh id.
    pub async fn run(&self, request: &JobRequest) -> Result<JobReport, JobFailure> {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "stitch");
        self.run_job(job_id, request, &logger).await
    }

    /// Run a job to completion.
    ///
    /// The job's scratch directory is removed whatever the outcome.
    pub async fn run_job(
        &self,
        job_id: JobId,
        request: &JobRequest,
        logger: &JobLogger,
    ) -> Result<JobReport, JobFailure> {
        let started_at = Utc::now();
        let started = Instant::now();

        if let Err(message) = request.validate() {
            let err = WorkerError::validation(message);
            logger.log_error(&err.to_string());
            metrics::record_job_failed(err.category());
            return Err(err.to_failure(&job_id, JobStage::Pending));
        }

        let scratch_dir = self.config.scratch_root.join(job_id.as_str());
        let mut job = ProcessingJob::new(job_id, self.profile_for(request), &scratch_dir);
        let mut progress = JobProgress::default();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let engine = self.engine.clone().with_cancel(cancel_rx);

        logger.log_start(&format!(
            "{} sources, profile {}",
            request.sources.len(),
            job.profile
        ));

        let result = self
            .execute(&mut job, &mut progress, &engine, request, logger)
            .instrument(logger.create_span())
            .await;

        if result.is_err() {
            let _ = cancel_tx.send(true);
        }
        if let Err(e) = remove_dir_if_exists(&scratch_dir).await {
            logger.log_warning(&format!(
                "Failed to remove scratch directory {}: {}",
                scratch_dir.display(),
                e
            ));
        }

        match result {
            Ok(()) => {
                let report = JobReport {
                    job_id: job.id.clone(),
                    output_path: progress.output_path,
                    final_size: progress.final_size,
                    size_ceiling: job.profile.size_ceiling_bytes,
                    total_input_duration: job.total_input_duration(),
                    videos: progress.videos,
                    compression_attempts: progress.compression_attempts,
                    corrective_pass_applied: progress.corrective_pass_applied,
                    warnings: progress.warnings,
                    stage_history: job.stage_history.clone(),
                    uploaded_key: progress.uploaded_key,
                    started_at,
                    finished_at: Utc::now(),
                };
                metrics::record_job_completed(started.elapsed().as_secs_f64());
                logger.log_completion(&format!(
                    "{} ({} bytes, {} of {} inputs fast-copied)",
                    report.output_path.display(),
                    report.final_size,
                    report.fast_path_count(),
                    report.videos.len()
                ));
                Ok(report)
            }
            Err(e) => {
                let stage = job.stage;
                job.fail();
                logger.log_error(&format!("{} (stage {})", e, stage));
                metrics::record_job_failed(e.category());
                Err(e.to_failure(&job.id, stage))
            }
        }
    }

    async fn execute(
        &self,
        job: &mut ProcessingJob,
        progress: &mut JobProgress,
        engine: &Engine,
        request: &JobRequest,
        logger: &JobLogger,
    ) -> WorkerResult<()> {
        let timeouts = &self.config.timeouts;
        let ceiling = job.profile.size_ceiling_bytes;
        let scratch = job.scratch_dir.clone();
        let permits = Semaphore::new(self.config.max_parallel_processes);

        tokio::fs::create_dir_all(&scratch).await?;

        enter(job, JobStage::Downloading, logger)?;
        let inputs = self.download_all(&request.sources, &scratch).await?;

        enter(job, JobStage::Validating, logger)?;
        job.inputs = self.validate_all(engine, inputs, &permits).await?;
        let rejected: Vec<String> = job
            .inputs
            .iter()
            .filter(|input| !input.is_valid())
            .map(|input| {
                format!(
                    "input {} ({}): {}",
                    input.index,
                    input.source_url,
                    input
                        .validation
                        .as_ref()
                        .map(|v| v.reason())
                        .unwrap_or("not validated")
                )
            })
            .collect();
        if !rejected.is_empty() {
            return Err(WorkerError::validation(rejected.join("; ")));
        }

        enter(job, JobStage::NormalizingOrFastCopying, logger)?;
        let plan = timeouts.normalization_plan();
        let (videos, audio) = tokio::try_join!(
            self.video_track(engine, &job.inputs, &job.profile, &scratch, &plan, &permits, logger),
            self.audio_track(engine, &job.inputs, &scratch, &permits),
        )?;

        let (paths, records): (Vec<_>, Vec<_>) =
            videos.into_iter().map(|v| (v.path, v.record)).unzip();
        job.set_canonical_outputs(paths)?;
        progress.videos = records;
        for index in &audio.silent_inputs {
            progress.warn(logger, format!("Input {} has no audio; silence inserted", index));
        }

        enter(job, JobStage::ConcatenatingVideo, logger)?;
        let concatenated = scratch.join("concat.mp4");
        concat_videos(
            engine,
            &job.canonical_outputs,
            scratch.join("video_list.txt"),
            &concatenated,
            timeouts.concat,
        )
        .await
        .map_err(WorkerError::Concat)?;
        self.check_av_drift(engine, &concatenated, &audio.path, progress, logger)
            .await;

        enter(job, JobStage::CompressingIfOversized, logger)?;
        let compression =
            compress_to_ceiling(engine, &concatenated, &scratch, ceiling, &self.config.compression)
                .await?;
        progress.compression_attempts = compression.attempts.clone();
        if !compression.within_ceiling {
            metrics::record_size_ceiling_miss();
            progress.warn(
                logger,
                format!(
                    "Video is {} bytes after {} compression attempts, over the {} byte ceiling",
                    compression.final_size,
                    compression.attempts.len(),
                    ceiling
                ),
            );
        }

        enter(job, JobStage::Muxing, logger)?;
        let muxed = mux_within_ceiling(
            engine,
            &compression.output,
            &audio.path,
            &scratch,
            &self.config.audio,
            ceiling,
            &self.config.compression,
            timeouts.mux,
            timeouts.corrective,
        )
        .await
        .map_err(WorkerError::Mux)?;
        progress.corrective_pass_applied = muxed.corrective_applied;
        for warning in muxed.warnings {
            progress.warn(logger, warning);
        }

        // Delivered from scratch so a failed upload leaves nothing in output_dir.
        if let Some(store) = &self.store {
            enter(job, JobStage::Uploading, logger)?;
            let key = self
                .upload(
                    store.as_ref(),
                    &muxed.output,
                    &request.destination_key(),
                    logger,
                )
                .await?;
            progress.uploaded_key = Some(key);
        }

        let final_path = self.config.output_dir.join(request.output_filename.trim());
        move_file(&muxed.output, &final_path).await?;
        progress.output_path = final_path;
        progress.final_size = muxed.size;

        enter(job, JobStage::Done, logger)?;
        Ok(())
    }

    async fn download_all(&self, sources: &[String], scratch: &Path) -> WorkerResult<Vec<InputVideo>> {
        let downloads = sources.iter().enumerate().map(|(index, url)| async move {
            let dest = scratch.join(format!("source_{}.video", index));
            self.downloader
                .download(url, &dest)
                .await
                .map_err(|source| WorkerError::Download {
                    index,
                    url: url.clone(),
                    source,
                })?;
            Ok::<_, WorkerError>(InputVideo::new(index, url.clone(), dest))
        });
        try_join_all(downloads).await
    }

    async fn validate_all(
        &self,
        engine: &Engine,
        inputs: Vec<InputVideo>,
        permits: &Semaphore,
    ) -> WorkerResult<Vec<InputVideo>> {
        let probe_timeout = self.config.timeouts.probe;
        let probes = inputs.into_iter().map(|input| async move {
            let _permit = acquire(permits).await?;
            let validation = validate(engine, &input.local_path, probe_timeout).await;
            Ok::<_, WorkerError>(input.validated(validation))
        });
        try_join_all(probes).await
    }

    /// Canonical video-only stream per input, in input order.
    #[allow(clippy::too_many_arguments)]
    async fn video_track(
        &self,
        engine: &Engine,
        inputs: &[InputVideo],
        profile: &TargetProfile,
        scratch: &Path,
        plan: &NormalizationPlan,
        permits: &Semaphore,
        logger: &JobLogger,
    ) -> WorkerResult<Vec<CanonicalVideo>> {
        let tasks = inputs.iter().map(|input| async move {
            let validation = input
                .validation
                .as_ref()
                .ok_or_else(|| WorkerError::internal("input was not validated"))?;
            let eligible = is_fast_path_eligible(validation, profile);
            let output = scratch.join(format!("canonical_{}.mp4", input.index));

            let _permit = acquire(permits).await?;
            let report =
                canonicalize(engine, &input.local_path, &output, profile, eligible, plan).await;

            let Some(method) = report.method().map(str::to_string) else {
                return Err(WorkerError::Normalization {
                    index: input.index,
                    message: report.failure_summary(),
                });
            };

            let fast = method == FAST_COPY_METHOD;
            metrics::record_fast_path(fast);
            if eligible && !fast {
                logger.log_progress(&format!(
                    "Input {} fell back from fast copy to {}",
                    input.index, method
                ));
            }

            Ok::<_, WorkerError>(CanonicalVideo {
                path: output,
                record: VideoPath {
                    index: input.index,
                    source_url: input.source_url.clone(),
                    method,
                    attempts: report.attempts,
                },
            })
        });
        try_join_all(tasks).await
    }

    /// Canonical audio per input, joined in input order.
    async fn audio_track(
        &self,
        engine: &Engine,
        inputs: &[InputVideo],
        scratch: &Path,
        permits: &Semaphore,
    ) -> WorkerResult<AudioTrack> {
        let timeouts = &self.config.timeouts;
        let format = &self.config.audio;

        let tasks = inputs.iter().map(|input| async move {
            let validation = input
                .validation
                .as_ref()
                .ok_or_else(|| WorkerError::internal("input was not validated"))?;
            let output = scratch.join(format!("audio_{}.m4a", input.index));

            let _permit = acquire(permits).await?;
            let source =
                extract_audio(engine, &input.local_path, validation, &output, format, timeouts.audio)
                    .await?;
            Ok::<_, WorkerError>((output, source == AudioSource::Silence))
        });
        let tracks = try_join_all(tasks).await?;

        let silent_inputs = tracks
            .iter()
            .zip(inputs)
            .filter(|((_, silent), _)| *silent)
            .map(|(_, input)| input.index)
            .collect();
        let paths: Vec<PathBuf> = tracks.into_iter().map(|(path, _)| path).collect();

        let output = scratch.join("audio.m4a");
        let _permit = acquire(permits).await?;
        concat_audio(
            engine,
            &paths,
            scratch.join("audio_list.txt"),
            &output,
            timeouts.concat,
        )
        .await?;

        Ok(AudioTrack {
            path: output,
            silent_inputs,
        })
    }

    /// Record a warning when the joined tracks differ in length by more than
    /// the configured tolerance. The mux trims to the shorter track.
    async fn check_av_drift(
        &self,
        engine: &Engine,
        video: &Path,
        audio: &Path,
        progress: &mut JobProgress,
        logger: &JobLogger,
    ) {
        let timeout = self.config.timeouts.probe;
        let tolerance = self.config.av_sync_tolerance_secs;

        match tokio::join!(
            media_duration(engine, video, timeout),
            media_duration(engine, audio, timeout)
        ) {
            (Ok(video_secs), Ok(audio_secs)) => {
                let drift = (video_secs - audio_secs).abs();
                if drift > tolerance {
                    progress.warn(
                        logger,
                        format!(
                            "Audio/video drift of {:.3}s exceeds {:.3}s tolerance (video {:.3}s, audio {:.3}s)",
                            drift, tolerance, video_secs, audio_secs
                        ),
                    );
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                progress.warn(logger, format!("Could not measure audio/video drift: {}", e));
            }
        }
    }

    /// Deliver, retrying once under a fresh key on conflict. Returns the key used.
    async fn upload(
        &self,
        store: &dyn ObjectStore,
        path: &Path,
        key: &str,
        logger: &JobLogger,
    ) -> WorkerResult<String> {
        match deliver(store, path, key).await {
            Ok(()) => Ok(key.to_string()),
            Err(e) if e.is_conflict() => {
                metrics::record_upload_conflict();
                let retry_key = unique_destination_key(key);
                logger.log_warning(&format!(
                    "Upload conflict at {}, retrying as {}",
                    key, retry_key
                ));
                deliver(store, path, &retry_key)
                    .await
                    .map_err(|e| WorkerError::upload(retry_key.clone(), e))?;
                Ok(retry_key)
            }
            Err(e) => Err(WorkerError::upload(key, e)),
        }
    }
}

fn enter(job: &mut ProcessingJob, stage: JobStage, logger: &JobLogger) -> WorkerResult<()> {
    job.advance(stage)?;
    logger.log_stage(stage);
    Ok(())
}

async fn acquire(permits: &Semaphore) -> WorkerResult<SemaphorePermit<'_>> {
    permits
        .acquire()
        .await
        .map_err(|_| WorkerError::internal("process limiter closed"))
}
