//! Media-stage metrics.
//!
//! Only the `metrics` facade is used here; whichever recorder the host
//! process installs (if any) receives the values.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const ENGINE_INVOCATIONS_TOTAL: &str = "stitch_engine_invocations_total";
    pub const ENGINE_DURATION_SECONDS: &str = "stitch_engine_duration_seconds";
    pub const NORMALIZATION_ATTEMPTS_TOTAL: &str = "stitch_normalization_attempts_total";
    pub const COMPRESSION_ATTEMPTS_TOTAL: &str = "stitch_compression_attempts_total";
    pub const DOWNLOAD_BYTES_TOTAL: &str = "stitch_download_bytes_total";
    pub const DOWNLOAD_DURATION_SECONDS: &str = "stitch_download_duration_seconds";
}

/// Record one engine invocation.
pub fn record_engine_invocation(program: &str, outcome: &str, duration_secs: f64) {
    let labels = [
        ("program", program.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(names::ENGINE_INVOCATIONS_TOTAL, &labels).increment(1);
    histogram!(names::ENGINE_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record one normalization strategy attempt.
pub fn record_normalization_attempt(method: &str, succeeded: bool) {
    let labels = [
        ("method", method.to_string()),
        ("outcome", outcome_label(succeeded).to_string()),
    ];
    counter!(names::NORMALIZATION_ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record one compression loop iteration.
pub fn record_compression_attempt(accepted: bool) {
    let labels = [("outcome", if accepted { "accepted" } else { "rejected" }.to_string())];
    counter!(names::COMPRESSION_ATTEMPTS_TOTAL, &labels).increment(1);
}

/// Record a finished download.
pub fn record_download(bytes: u64, duration_secs: f64) {
    counter!(names::DOWNLOAD_BYTES_TOTAL).increment(bytes);
    histogram!(names::DOWNLOAD_DURATION_SECONDS).record(duration_secs);
}

fn outcome_label(succeeded: bool) -> &'static str {
    if succeeded {
        "succeeded"
    } else {
        "failed"
    }
}
