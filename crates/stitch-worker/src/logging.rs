//! Structured job logging.
//!
//! One [`JobLogger`] is created per job and handed to the pipeline. Every
//! line carries the job id, and warnings and errors also carry the stage
//! the job was in.

use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, error, info, warn, Span};

use stitch_models::{JobId, JobStage};

#[derive(Debug)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    /// Current stage and when it was entered
    stage: Mutex<Option<(JobStage, Instant)>>,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            stage: Mutex::new(None),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Record entry into `stage`, logging how long the previous one took.
    pub fn log_stage(&self, stage: JobStage) {
        let previous = match self.stage.lock() {
            Ok(mut current) => current.replace((stage, Instant::now())),
            Err(_) => None,
        };

        if let Some((finished, entered)) = previous {
            debug!(
                job_id = %self.job_id,
                stage = %finished,
                elapsed_ms = entered.elapsed().as_millis() as u64,
                "Stage finished"
            );
        }
        info!(job_id = %self.job_id, stage = %stage, "Entering stage {}", stage);
    }

    /// Stage most recently passed to [`JobLogger::log_stage`].
    pub fn current_stage(&self) -> Option<JobStage> {
        self.stage
            .lock()
            .ok()
            .and_then(|current| current.map(|(stage, _)| stage))
    }

    fn stage_label(&self) -> String {
        self.current_stage()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string())
    }

    pub fn log_progress(&self, message: &str) {
        info!(job_id = %self.job_id, "Job progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            stage = %self.stage_label(),
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %self.stage_label(),
            "Job failed: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span wrapping everything the job runs.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, operation = %self.operation)
    }
}
