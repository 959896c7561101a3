//! Baseline normalization of acquisition codes.

use crate::core::decoder::SampleVector;

/// Mid-scale acquisition code. Subtracting it centres the unsigned range on zero.
pub const BASELINE_OFFSET: i64 = 32768;

/// Full-scale span of the acquisition front end in millivolts.
const FULL_SCALE_MV: f64 = 5_000.0;

/// Number of codes across the full scale.
const CODE_SPAN: f64 = 65_536.0;

/// Shift every value by the baseline offset.
///
/// Not idempotent: each call subtracts the offset again.
pub fn normalize(matrix: &[SampleVector]) -> Vec<SampleVector> {
    matrix.iter().map(normalize_sample).collect()
}

/// Shift a single sample by the baseline offset.
pub fn normalize_sample(sample: &SampleVector) -> SampleVector {
    sample.map(|code| code - BASELINE_OFFSET)
}

/// Convert a raw acquisition code to millivolts.
pub fn to_millivolts(code: i64) -> f64 {
    offset_to_millivolts((code - BASELINE_OFFSET) as f64)
}

/// Convert an already centred value (normalized or filtered) to millivolts.
pub fn offset_to_millivolts(value: f64) -> f64 {
    value * FULL_SCALE_MV / CODE_SPAN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::CHANNELS;

    #[test]
    fn test_single_application_shifts_by_offset() {
        let input = vec![[4096; CHANNELS], [0, 1, 2, 3, 32768, 65535, 70000, 5]];
        let output = normalize(&input);

        for (before, after) in input.iter().zip(&output) {
            for (b, a) in before.iter().zip(after) {
                assert_eq!(b - a, 32768);
            }
        }
        assert_eq!(output[0], [-28672; CHANNELS]);
    }

    #[test]
    fn test_not_idempotent() {
        let input = vec![[32768; CHANNELS]];
        let once = normalize(&input);
        let twice = normalize(&once);
        assert_ne!(once, twice);
        assert_eq!(twice[0], [-32768; CHANNELS]);
    }

    #[test]
    fn test_millivolts() {
        assert_eq!(to_millivolts(32768), 0.0);
        assert!((to_millivolts(65536) - 2500.0).abs() < 1e-9);
        assert!((to_millivolts(0) + 2500.0).abs() < 1e-9);
        assert_eq!(offset_to_millivolts(-28672.0), to_millivolts(4096));
    }
}
