//! Job-level metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "stitch_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "stitch_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "stitch_job_duration_seconds";
    pub const FAST_PATH_TOTAL: &str = "stitch_fast_path_total";
    pub const SIZE_CEILING_MISSES_TOTAL: &str = "stitch_size_ceiling_misses_total";
    pub const UPLOAD_CONFLICTS_TOTAL: &str = "stitch_upload_conflicts_total";
    pub const SWEEPER_REMOVED_DIRS_TOTAL: &str = "stitch_sweeper_removed_dirs_total";
    pub const SWEEPER_KILLED_PROCESSES_TOTAL: &str = "stitch_sweeper_killed_processes_total";
}

/// Record job completed.
pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record job failed.
pub fn record_job_failed(category: &str) {
    let labels = [("category", category.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record the per-input path decision.
pub fn record_fast_path(hit: bool) {
    let labels = [("result", if hit { "hit" } else { "miss" }.to_string())];
    counter!(names::FAST_PATH_TOTAL, &labels).increment(1);
}

pub fn record_size_ceiling_miss() {
    counter!(names::SIZE_CEILING_MISSES_TOTAL).increment(1);
}

pub fn record_upload_conflict() {
    counter!(names::UPLOAD_CONFLICTS_TOTAL).increment(1);
}

/// Record one sweeper pass.
pub fn record_sweep(removed_dirs: usize, killed_processes: usize) {
    counter!(names::SWEEPER_REMOVED_DIRS_TOTAL).increment(removed_dirs as u64);
    counter!(names::SWEEPER_KILLED_PROCESSES_TOTAL).increment(killed_processes as u64);
}
