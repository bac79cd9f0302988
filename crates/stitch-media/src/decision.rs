//! Fast-path eligibility.

use stitch_models::{TargetProfile, ValidationResult};

/// Whether a validated input can skip re-encoding.
///
/// True only when the input is valid and its codec, width, height and
/// frame-rate expression all match the profile exactly. Frame rates are
/// compared textually against the profile's accepted spellings.
pub fn is_fast_path_eligible(validation: &ValidationResult, target: &TargetProfile) -> bool {
    if !validation.is_valid {
        return false;
    }

    let codec_matches = validation.codec.as_deref() == Some(target.codec.as_str());
    let size_matches = validation.width == target.width && validation.height == target.height;
    let rate_matches = validation
        .frame_rate
        .as_deref()
        .is_some_and(|rate| target.accepted_frame_rates().iter().any(|r| r == rate));

    codec_matches && size_matches && rate_matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use stitch_models::profile::DEFAULT_SIZE_CEILING_BYTES;
    use stitch_models::AspectPreset;

    fn probe(codec: &str, width: u32, height: u32, rate: &str) -> ValidationResult {
        ValidationResult {
            is_valid: true,
            codec: Some(codec.to_string()),
            width,
            height,
            frame_rate: Some(rate.to_string()),
            duration: 10.0,
            has_audio: true,
            error: None,
        }
    }

    #[test]
    fn test_exact_match_is_eligible() {
        let target = TargetProfile::for_preset(AspectPreset::Portrait, DEFAULT_SIZE_CEILING_BYTES);
        assert!(is_fast_path_eligible(&probe("h264", 1080, 1920, "30/1"), &target));
        assert!(is_fast_path_eligible(&probe("h264", 1080, 1920, "30"), &target));
    }

    #[test]
    fn test_any_mismatch_is_ineligible() {
        let target = TargetProfile::for_preset(AspectPreset::Portrait, DEFAULT_SIZE_CEILING_BYTES);
        assert!(!is_fast_path_eligible(&probe("hevc", 1080, 1920, "30/1"), &target));
        assert!(!is_fast_path_eligible(&probe("h264", 1920, 1080, "30/1"), &target));
        assert!(!is_fast_path_eligible(&probe("h264", 1080, 1920, "30000/1001"), &target));
        assert!(!is_fast_path_eligible(&probe("h264", 1080, 1920, "60/1"), &target));
    }

    #[test]
    fn test_tolerated_rate() {
        let target = TargetProfile::for_preset(AspectPreset::Portrait, DEFAULT_SIZE_CEILING_BYTES)
            .with_tolerated_frame_rate(60);
        assert!(is_fast_path_eligible(&probe("h264", 1080, 1920, "60/1"), &target));
    }

    #[test]
    fn test_invalid_input_is_never_eligible() {
        let target = TargetProfile::default();
        let mut validation = probe("h264", 1080, 1920, "30/1");
        validation.is_valid = false;
        assert!(!is_fast_path_eligible(&validation, &target));
    }

    #[test]
    fn test_decision_is_deterministic() {
        let target = TargetProfile::for_preset(AspectPreset::Square, DEFAULT_SIZE_CEILING_BYTES);
        let validation = probe("h264", 1080, 1080, "30/1");
        let first = is_fast_path_eligible(&validation, &target);
        assert!((0..10).all(|_| is_fast_path_eligible(&validation, &target) == first));
    }
}
