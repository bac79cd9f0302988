//! Final mux of video and audio, with one corrective pass when container
//! overhead pushes the artifact back over the ceiling.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use stitch_models::encoding::{CANONICAL_PIXEL_FORMAT, CANONICAL_VIDEO_ENCODER};
use stitch_models::AudioFormat;

use crate::command::FfmpegCommand;
use crate::compress::CompressionPolicy;
use crate::error::MediaResult;
use crate::fs_utils::remove_if_exists;
use crate::runner::Engine;

/// Result of muxing plus the optional corrective pass.
#[derive(Debug, Clone)]
pub struct MuxOutcome {
    /// Artifact to deliver
    pub output: PathBuf,
    pub size: u64,
    /// Whether the corrective pass produced the delivered artifact
    pub corrective_applied: bool,
    /// Non-fatal conditions to surface in the report
    pub warnings: Vec<String>,
}

/// Copy the video stream, encode audio to the canonical format and trim
/// to the shorter track.
pub fn mux_command(video: &Path, audio: &Path, output: &Path, format: &AudioFormat) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .add_input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .output_args(format.to_ffmpeg_args())
        .shortest()
        .faststart()
}

/// Re-encode video at a fixed CRF, copying the audio stream.
pub fn corrective_command(
    input: &Path,
    output: &Path,
    crf: u8,
    bitrate_cap_kbps: u32,
    preset: &str,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .map("0:v:0")
        .map("0:a:0?")
        .video_codec(CANONICAL_VIDEO_ENCODER)
        .preset(preset)
        .crf(crf)
        .max_bitrate_kbps(bitrate_cap_kbps)
        .output_args(["-pix_fmt", CANONICAL_PIXEL_FORMAT])
        .audio_codec("copy")
        .faststart()
}

/// Combine the video-only artifact with the joined audio track.
pub async fn mux(
    engine: &Engine,
    video: impl AsRef<Path>,
    audio: impl AsRef<Path>,
    output: impl AsRef<Path>,
    format: &AudioFormat,
    timeout: Duration,
) -> MediaResult<u64> {
    let cmd = mux_command(video.as_ref(), audio.as_ref(), output.as_ref(), format);
    let size = engine.transcode(&cmd, timeout).await?;
    info!(size, "Muxed final artifact");
    Ok(size)
}

/// Mux, then apply exactly one corrective pass if the result exceeds
/// `ceiling`.
///
/// Mux failures are returned. A failed or unhelpful corrective pass is not:
/// the muxed file is kept and a warning recorded.
#[allow(clippy::too_many_arguments)]
pub async fn mux_within_ceiling(
    engine: &Engine,
    video: impl AsRef<Path>,
    audio: impl AsRef<Path>,
    work_dir: impl AsRef<Path>,
    format: &AudioFormat,
    ceiling: u64,
    policy: &CompressionPolicy,
    mux_timeout: Duration,
    corrective_timeout: Duration,
) -> MediaResult<MuxOutcome> {
    let work_dir = work_dir.as_ref();
    let muxed = work_dir.join("muxed.mp4");
    let size = mux(engine, video, audio, &muxed, format, mux_timeout).await?;

    let mut outcome = MuxOutcome {
        output: muxed.clone(),
        size,
        corrective_applied: false,
        warnings: Vec::new(),
    };

    if size <= ceiling {
        return Ok(outcome);
    }

    let crf = policy.corrective_crf.min(policy.crf_max);
    let cap = policy.bitrate_cap_kbps(crf);
    let corrected = work_dir.join("corrected.mp4");
    info!(size, ceiling, crf, "Muxed artifact over ceiling, applying corrective pass");

    let cmd = corrective_command(&muxed, &corrected, crf, cap, &policy.preset);
    match engine.transcode(&cmd, corrective_timeout).await {
        Ok(new_size) if new_size < size => {
            let _ = remove_if_exists(&muxed).await;
            outcome.output = corrected;
            outcome.size = new_size;
            outcome.corrective_applied = true;
        }
        Ok(new_size) => {
            let _ = remove_if_exists(&corrected).await;
            outcome.warnings.push(format!(
                "Corrective pass did not shrink the artifact ({} -> {} bytes); kept muxed output",
                size, new_size
            ));
        }
        Err(e) => {
            warn!("Corrective pass failed: {}", e.reason());
            let _ = remove_if_exists(&corrected).await;
            outcome
                .warnings
                .push(format!("Corrective pass failed: {}", e.reason()));
        }
    }

    if outcome.size > ceiling {
        outcome.warnings.push(format!(
            "Final artifact is {} bytes, over the {} byte ceiling",
            outcome.size, ceiling
        ));
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], needle: &str) -> usize {
        args.iter().position(|a| a == needle).unwrap()
    }

    #[test]
    fn test_mux_copies_video_and_trims() {
        let args = mux_command(
            Path::new("v.mp4"),
            Path::new("a.m4a"),
            Path::new("out.mp4"),
            &AudioFormat::default(),
        )
        .build_args();

        assert_eq!(args[position(&args, "-c:v") + 1], "copy");
        assert_eq!(args[position(&args, "-c:a") + 1], "aac");
        assert!(args.contains(&"-shortest".to_string()));
        assert!(args.contains(&"1:a:0".to_string()));
    }

    #[test]
    fn test_corrective_copies_audio() {
        let args = corrective_command(Path::new("m.mp4"), Path::new("c.mp4"), 30, 2500, "veryfast")
            .build_args();
        assert_eq!(args[position(&args, "-c:a") + 1], "copy");
        assert_eq!(args[position(&args, "-crf") + 1], "30");
    }
}
