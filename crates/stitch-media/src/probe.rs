//! Structural validation of downloaded files via FFprobe.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use stitch_models::encoding::MIN_INPUT_FILE_SIZE;
use stitch_models::ValidationResult;

use crate::error::{MediaError, MediaResult};
use crate::fs_utils::file_size;
use crate::runner::Engine;

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    nb_read_packets: Option<String>,
}

impl FfprobeStream {
    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }
}

fn probe_args(path: &Path, count_packets: bool) -> Vec<String> {
    let mut args = vec!["-v".to_string(), "error".to_string()];
    if count_packets {
        args.push("-count_packets".to_string());
    }
    args.extend(
        ["-show_format", "-show_streams", "-print_format", "json"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push(path.to_string_lossy().to_string());
    args
}

/// Validate a downloaded file.
///
/// Checks, in order: the file exists and has at least
/// [`MIN_INPUT_FILE_SIZE`] bytes; the probe succeeds and reports a video
/// stream; that stream has a codec name, nonzero dimensions and a nonzero
/// decoded-packet count. Never fails: every problem becomes an invalid
/// result carrying the reason.
pub async fn validate(engine: &Engine, path: impl AsRef<Path>, timeout: Duration) -> ValidationResult {
    let path = path.as_ref();

    let size = match file_size(path).await {
        Ok(size) => size,
        Err(MediaError::FileNotFound(_)) => {
            return ValidationResult::invalid(format!("File not found: {}", path.display()))
        }
        Err(e) => return ValidationResult::invalid(format!("Cannot stat file: {}", e)),
    };
    if size < MIN_INPUT_FILE_SIZE {
        return ValidationResult::invalid(format!(
            "File too small: {} bytes (minimum {})",
            size, MIN_INPUT_FILE_SIZE
        ));
    }

    let stdout = match engine.ffprobe(probe_args(path, true), timeout).await {
        Ok(out) => out,
        Err(e) => return ValidationResult::invalid(format!("Probe failed: {}", e.reason())),
    };

    let result = parse_validation(&stdout);
    debug!(
        path = %path.display(),
        valid = result.is_valid,
        codec = ?result.codec,
        width = result.width,
        height = result.height,
        "Validated input"
    );
    result
}

/// Turn FFprobe JSON into a validation result.
pub fn parse_validation(json: &str) -> ValidationResult {
    let probe: FfprobeOutput = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => return ValidationResult::invalid(format!("Unreadable probe output: {}", e)),
    };

    let Some(video) = probe.streams.iter().find(|s| s.is("video")) else {
        return ValidationResult::invalid("No video stream found");
    };

    let Some(codec) = video.codec_name.clone().filter(|c| !c.is_empty()) else {
        return ValidationResult::invalid("Video stream has no codec name");
    };

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return ValidationResult::invalid(format!("Invalid dimensions: {}x{}", width, height));
    }

    let packets = video
        .nb_read_packets
        .as_deref()
        .and_then(|p| p.parse::<u64>().ok())
        .unwrap_or(0);
    if packets == 0 {
        return ValidationResult::invalid("Video stream has no decodable packets");
    }

    let frame_rate = video
        .r_frame_rate
        .clone()
        .filter(|r| r != "0/0")
        .or_else(|| video.avg_frame_rate.clone().filter(|r| r != "0/0"));

    let duration = probe
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_deref()))
        .or_else(|| parse_seconds(video.duration.as_deref()))
        .or_else(|| {
            // One packet per frame for video streams
            frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .filter(|fps| *fps > 0.0)
                .map(|fps| packets as f64 / fps)
        })
        .unwrap_or(0.0);

    ValidationResult {
        is_valid: true,
        codec: Some(codec),
        width,
        height,
        frame_rate,
        duration,
        has_audio: probe.streams.iter().any(|s| s.is("audio")),
        error: None,
    }
}

/// Container duration of any media file, in seconds.
pub async fn media_duration(engine: &Engine, path: impl AsRef<Path>, timeout: Duration) -> MediaResult<f64> {
    let path = path.as_ref();
    let stdout = engine.ffprobe(probe_args(path, false), timeout).await?;
    let probe: FfprobeOutput = serde_json::from_str(&stdout)?;

    probe
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_deref()))
        .or_else(|| {
            probe
                .streams
                .iter()
                .find_map(|s| parse_seconds(s.duration.as_deref()))
        })
        .ok_or_else(|| MediaError::InvalidVideo(format!("No duration for {}", path.display())))
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v >= 0.0)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
pub fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
        None
    } else {
        s.parse().ok()
    }
}
