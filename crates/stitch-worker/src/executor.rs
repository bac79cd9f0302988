//! Job executor.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use stitch_media::{Downloader, Engine};
use stitch_models::{JobFailure, JobId, JobReport, JobRequest};
use stitch_storage::S3Client;

use crate::config::PipelineConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::pipeline::Pipeline;
use crate::sweeper::ScratchSweeper;

/// Owns the pipeline and the background sweeper for one worker process.
pub struct JobExecutor {
    pipeline: Pipeline,
    shutdown: watch::Sender<bool>,
}

impl JobExecutor {
    /// Create an executor running the real engine binaries.
    pub async fn new(config: PipelineConfig) -> WorkerResult<Self> {
        let downloader = Downloader::new(config.download_timeout);
        Self::with_engine(config, Engine::default(), downloader).await
    }

    /// Create an executor over a specific engine and downloader.
    pub async fn with_engine(
        config: PipelineConfig,
        engine: Engine,
        downloader: Downloader,
    ) -> WorkerResult<Self> {
        config.validate().map_err(WorkerError::config_error)?;

        tokio::fs::create_dir_all(&config.scratch_root).await?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let storage = config.storage.clone();
        let mut pipeline = Pipeline::new(config, engine, downloader);
        if let Some(storage) = storage {
            info!("Delivering artifacts to bucket {}", storage.bucket_name);
            pipeline = pipeline.with_store(Arc::new(S3Client::new(storage)));
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self { pipeline, shutdown })
    }

    pub fn config(&self) -> &PipelineConfig {
        self.pipeline.config()
    }

    /// Start the scratch sweeper if it is enabled.
    pub fn start_sweeper(&self) -> Option<JoinHandle<()>> {
        let config = self.pipeline.config();
        if !config.sweeper.enabled {
            return None;
        }
        let sweeper = ScratchSweeper::new(&config.scratch_root, config.sweeper.clone());
        Some(sweeper.spawn(self.shutdown.subscribe()))
    }

    /// Run one job to completion.
    pub async fn execute(&self, request: &JobRequest) -> Result<JobReport, JobFailure> {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "stitch");
        self.pipeline.run_job(job_id, request, &logger).await
    }

    /// Signal shutdown to background tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            scratch_root: dir.path().join("scratch"),
            output_dir: dir.path().join("out"),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_new_prepares_directories() {
        let dir = TempDir::new().unwrap();
        let executor = JobExecutor::new(config(&dir)).await.unwrap();
        assert!(dir.path().join("scratch").is_dir());
        assert!(dir.path().join("out").is_dir());
        assert!(executor.config().storage.is_none());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.size_ceiling_bytes = 0;

        let err = JobExecutor::new(config).await.err().unwrap();
        assert_eq!(err.category(), "config_error");
    }

    #[tokio::test]
    async fn test_disabled_sweeper_is_not_started() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.sweeper.enabled = false;

        let executor = JobExecutor::new(config).await.unwrap();
        assert!(executor.start_sweeper().is_none());
    }
}
