//! Audio track: per-input extraction into one canonical format, then a
//! stream-copy join.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use stitch_models::encoding::MIN_AUDIO_OUTPUT_SIZE;
use stitch_models::{AudioFormat, ValidationResult};

use crate::command::FfmpegCommand;
use crate::concat::concat_files;
use crate::error::{MediaError, MediaResult};
use crate::runner::Engine;

/// How an input's canonical audio track was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    /// Re-encoded from the input's first audio stream
    Extracted,
    /// Silence generated for an input without audio
    Silence,
}

fn extract_command(
    input: &Path,
    output: &Path,
    duration: f64,
    format: &AudioFormat,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(input, output)
        .map("0:a:0")
        .no_video()
        .output_args(format.to_ffmpeg_args());

    // Pad short tracks and trim long ones to the video's length.
    if duration > 0.0 {
        cmd.output_args(["-af", "apad"]).duration(duration)
    } else {
        cmd
    }
}

fn silence_command(output: &Path, duration: f64, format: &AudioFormat) -> FfmpegCommand {
    let source = format!(
        "anullsrc=r={}:cl={}",
        format.sample_rate,
        format.channel_layout()
    );
    FfmpegCommand::from_source(source, output)
        .input_args(["-f", "lavfi"])
        .output_args(format.to_ffmpeg_args())
        .duration(duration)
}

/// Produce the canonical audio track for one input.
///
/// Inputs whose probe reports no audio get silence of the input's
/// duration so the joined track still spans every input. Without a known
/// duration there is nothing to size the silence by, which is an error.
pub async fn extract_audio(
    engine: &Engine,
    input: impl AsRef<Path>,
    validation: &ValidationResult,
    output: impl AsRef<Path>,
    format: &AudioFormat,
    timeout: Duration,
) -> MediaResult<AudioSource> {
    let input = input.as_ref();
    let output = output.as_ref();

    let (cmd, source) = if validation.has_audio {
        (
            extract_command(input, output, validation.duration, format),
            AudioSource::Extracted,
        )
    } else if validation.duration <= 0.0 {
        return Err(MediaError::InvalidVideo(format!(
            "Cannot size silence for {}: duration unknown",
            input.display()
        )));
    } else {
        debug!(input = %input.display(), "No audio stream, generating silence");
        (
            silence_command(output, validation.duration, format),
            AudioSource::Silence,
        )
    };

    engine
        .transcode_min(&cmd, timeout, MIN_AUDIO_OUTPUT_SIZE)
        .await?;
    Ok(source)
}

/// Join per-input canonical tracks, in order, without re-encoding.
pub async fn concat_audio(
    engine: &Engine,
    tracks: &[PathBuf],
    list_path: impl AsRef<Path>,
    output: impl AsRef<Path>,
    timeout: Duration,
) -> MediaResult<u64> {
    let size = concat_files(engine, tracks, list_path, output, timeout, MIN_AUDIO_OUTPUT_SIZE).await?;
    info!(tracks = tracks.len(), size, "Concatenated audio tracks");
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], needle: &str) -> usize {
        args.iter().position(|a| a == needle).unwrap()
    }

    #[test]
    fn test_extract_uses_canonical_format() {
        let args = extract_command(
            Path::new("in.mp4"),
            Path::new("a.m4a"),
            12.0,
            &AudioFormat::default(),
        )
        .build_args();

        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(args[position(&args, "-c:a") + 1], "aac");
        assert_eq!(args[position(&args, "-ar") + 1], "44100");
        assert_eq!(args[position(&args, "-t") + 1], "12.000");
    }

    #[tokio::test]
    async fn test_silence_needs_a_duration() {
        let validation = ValidationResult {
            is_valid: true,
            has_audio: false,
            duration: 0.0,
            ..Default::default()
        };
        let err = extract_audio(
            &Engine::default(),
            "in.mp4",
            &validation,
            "a.m4a",
            &AudioFormat::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("duration unknown"));
    }

    #[test]
    fn test_silence_spans_input_duration() {
        let args = silence_command(Path::new("a.m4a"), 7.5, &AudioFormat::default()).build_args();

        assert_eq!(args[position(&args, "-i") + 1], "anullsrc=r=44100:cl=stereo");
        assert!(position(&args, "lavfi") < position(&args, "-i"));
        assert_eq!(args[position(&args, "-t") + 1], "7.500");
    }
}
