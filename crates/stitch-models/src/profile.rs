//! Target profiles and the aspect presets they are selected from.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::encoding::{CANONICAL_FRAME_RATE, CANONICAL_VIDEO_CODEC};

/// Default output size ceiling (49 MiB), the upload limit of the delivery platform.
pub const DEFAULT_SIZE_CEILING_BYTES: u64 = 49 * 1024 * 1024;

/// Fixed set of output shapes a job can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AspectPreset {
    /// 9:16, 1080x1920
    #[default]
    Portrait,
    /// 16:9, 1920x1080
    Landscape,
    /// 1:1, 1080x1080
    Square,
    /// 4:5, 1080x1350
    Vertical45,
}

impl AspectPreset {
    /// All presets, in declaration order.
    pub const ALL: [AspectPreset; 4] = [
        AspectPreset::Portrait,
        AspectPreset::Landscape,
        AspectPreset::Square,
        AspectPreset::Vertical45,
    ];

    /// Pixel dimensions (width, height) of the preset.
    pub const fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectPreset::Portrait => (1080, 1920),
            AspectPreset::Landscape => (1920, 1080),
            AspectPreset::Square => (1080, 1080),
            AspectPreset::Vertical45 => (1080, 1350),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectPreset::Portrait => "portrait",
            AspectPreset::Landscape => "landscape",
            AspectPreset::Square => "square",
            AspectPreset::Vertical45 => "vertical45",
        }
    }
}

impl fmt::Display for AspectPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AspectPreset {
    type Err = AspectPresetParseError;

    /// Accepts either the preset name or its `W:H` ratio.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "portrait" | "9:16" => Ok(AspectPreset::Portrait),
            "landscape" | "16:9" => Ok(AspectPreset::Landscape),
            "square" | "1:1" => Ok(AspectPreset::Square),
            "vertical45" | "4:5" => Ok(AspectPreset::Vertical45),
            _ => Err(AspectPresetParseError::Unknown(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum AspectPresetParseError {
    #[error("Unknown aspect preset: {0}, expected one of portrait, landscape, square, vertical45")]
    Unknown(String),
}

/// The canonical visual profile every per-video output must conform to.
///
/// Selected once per job from an [`AspectPreset`] and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TargetProfile {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub frame_rate: u32,
    /// Higher source rate still accepted on the fast path, if downstream
    /// conversion is tolerated
    #[serde(default)]
    pub tolerated_frame_rate: Option<u32>,
    /// Required codec name (as reported by the probe)
    pub codec: String,
    /// Hard upper bound for the final artifact, in bytes
    pub size_ceiling_bytes: u64,
}

impl TargetProfile {
    /// Build the profile for a preset with the canonical codec and frame rate.
    pub fn for_preset(preset: AspectPreset, size_ceiling_bytes: u64) -> Self {
        let (width, height) = preset.dimensions();
        Self {
            width,
            height,
            frame_rate: CANONICAL_FRAME_RATE,
            tolerated_frame_rate: None,
            codec: CANONICAL_VIDEO_CODEC.to_string(),
            size_ceiling_bytes,
        }
    }

    /// Accept a higher source rate on the fast path.
    pub fn with_tolerated_frame_rate(mut self, rate: u32) -> Self {
        self.tolerated_frame_rate = Some(rate);
        self
    }

    /// Textual frame-rate expressions treated as equal to the target rate.
    pub fn accepted_frame_rates(&self) -> Vec<String> {
        let mut rates = vec![
            format!("{}/1", self.frame_rate),
            self.frame_rate.to_string(),
        ];
        if let Some(tolerated) = self.tolerated_frame_rate {
            rates.push(format!("{}/1", tolerated));
            rates.push(tolerated.to_string());
        }
        rates
    }

    /// Scale-then-pad filter fitting any source into the target box.
    ///
    /// Aspect ratio is preserved and the remainder is letterboxed in black.
    pub fn fit_filter(&self) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1",
            w = self.width,
            h = self.height
        )
    }
}

impl Default for TargetProfile {
    fn default() -> Self {
        Self::for_preset(AspectPreset::default(), DEFAULT_SIZE_CEILING_BYTES)
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}@{}fps/{}",
            self.width, self.height, self.frame_rate, self.codec
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_parsing() {
        assert_eq!("portrait".parse::<AspectPreset>().unwrap(), AspectPreset::Portrait);
        assert_eq!("16:9".parse::<AspectPreset>().unwrap(), AspectPreset::Landscape);
        assert_eq!("SQUARE".parse::<AspectPreset>().unwrap(), AspectPreset::Square);
        assert!("21:9".parse::<AspectPreset>().is_err());
    }

    #[test]
    fn test_preset_dimensions() {
        for preset in AspectPreset::ALL {
            let profile = TargetProfile::for_preset(preset, DEFAULT_SIZE_CEILING_BYTES);
            assert_eq!((profile.width, profile.height), preset.dimensions());
            assert_eq!(profile.codec, "h264");
            assert_eq!(profile.frame_rate, 30);
        }
    }

    #[test]
    fn test_accepted_frame_rates() {
        let profile = TargetProfile::default();
        assert_eq!(profile.accepted_frame_rates(), vec!["30/1", "30"]);

        let tolerant = profile.with_tolerated_frame_rate(60);
        assert!(tolerant.accepted_frame_rates().contains(&"60/1".to_string()));
    }

    #[test]
    fn test_fit_filter() {
        let filter = TargetProfile::default().fit_filter();
        assert!(filter.starts_with("scale=1080:1920:force_original_aspect_ratio=decrease"));
        assert!(filter.contains("pad=1080:1920:(ow-iw)/2:(oh-ih)/2:color=black"));
    }

    #[test]
    fn test_preset_serde() {
        let json = serde_json::to_string(&AspectPreset::Vertical45).unwrap();
        assert_eq!(json, "\"vertical45\"");
    }
}
