//! Canonical encoding parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Codec name every canonical video stream must report (as ffprobe names it).
pub const CANONICAL_VIDEO_CODEC: &str = "h264";
/// Encoder used to produce canonical video streams.
pub const CANONICAL_VIDEO_ENCODER: &str = "libx264";
/// Canonical frame rate (fps).
pub const CANONICAL_FRAME_RATE: u32 = 30;
/// Pixel format forced by the conservative normalization tiers.
pub const CANONICAL_PIXEL_FORMAT: &str = "yuv420p";

/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default audio sample rate (Hz)
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 44_100;
/// Default audio channel count
pub const DEFAULT_AUDIO_CHANNELS: u8 = 2;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";

/// Inputs smaller than this are rejected before probing.
pub const MIN_INPUT_FILE_SIZE: u64 = 1000;
/// Engine outputs smaller than this count as failed invocations.
pub const MIN_OUTPUT_FILE_SIZE: u64 = 1000;
/// Audio-only outputs (silent tracks in particular) are legitimately small.
pub const MIN_AUDIO_OUTPUT_SIZE: u64 = 256;

/// Canonical audio format shared by every per-video audio track.
///
/// All tracks are re-encoded into this one format so they can be
/// joined later with a stream copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AudioFormat {
    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub codec: String,

    /// Sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Channel count
    #[serde(default = "default_channels")]
    pub channels: u8,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub bitrate: String,
}

fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_sample_rate() -> u32 {
    DEFAULT_AUDIO_SAMPLE_RATE
}
fn default_channels() -> u8 {
    DEFAULT_AUDIO_CHANNELS
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            codec: DEFAULT_AUDIO_CODEC.to_string(),
            sample_rate: DEFAULT_AUDIO_SAMPLE_RATE,
            channels: DEFAULT_AUDIO_CHANNELS,
            bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
        }
    }
}

impl AudioFormat {
    /// Channel layout name understood by the `anullsrc` source.
    pub fn channel_layout(&self) -> &'static str {
        match self.channels {
            1 => "mono",
            _ => "stereo",
        }
    }

    /// Convert to FFmpeg output arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.codec.clone(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-b:a".to_string(),
            self.bitrate.clone(),
        ]
    }
}
