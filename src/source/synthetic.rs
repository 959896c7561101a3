//! Deterministic frame generator standing in for the acquisition device.

use crate::core::decoder::{SampleVector, CHANNELS, END_MARKER, START_MARKER};
use crate::core::normalize::BASELINE_OFFSET;
use crate::source::types::RawFrame;
use std::f64::consts::PI;

/// Groups per frame the device writes at a time.
pub const GROUPS_PER_FRAME: usize = 500;

/// Groups between two sequence boundaries.
pub const GROUPS_PER_SEQUENCE: usize = 50;

/// Synthetic 8-channel signal: slow ramp around mid-scale, mains hum and a
/// 10 Hz rhythm whose amplitude differs per channel.
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    sampling_rate_hz: f64,
    mains_hz: f64,
    groups_per_frame: usize,
    sample_index: u64,
}

impl SyntheticDevice {
    pub fn new(sampling_rate_hz: f64) -> Self {
        Self {
            sampling_rate_hz,
            mains_hz: 50.0,
            groups_per_frame: GROUPS_PER_FRAME,
            sample_index: 0,
        }
    }

    pub fn with_groups_per_frame(mut self, groups: usize) -> Self {
        self.groups_per_frame = groups.max(1);
        self
    }

    pub fn with_mains_hz(mut self, mains_hz: f64) -> Self {
        self.mains_hz = mains_hz;
        self
    }

    /// Total samples generated so far.
    pub fn samples_generated(&self) -> u64 {
        self.sample_index
    }

    /// Acquisition codes of the next sample.
    pub fn next_sample(&mut self) -> SampleVector {
        let n = self.sample_index;
        self.sample_index += 1;

        let t = n as f64 / self.sampling_rate_hz;
        let ramp = ((n % 1000) as f64 - 500.0) * 0.5;
        let hum = (2.0 * PI * self.mains_hz * t).sin() * 400.0;

        let mut sample = [0i64; CHANNELS];
        for (channel, code) in sample.iter_mut().enumerate() {
            let rhythm = (2.0 * PI * 10.0 * t + channel as f64 * 0.4).sin()
                * (150.0 + 25.0 * channel as f64);
            let value = BASELINE_OFFSET as f64 + ramp + hum + rhythm;
            *code = value.round().clamp(0.0, 65_535.0) as i64;
        }
        sample
    }

    /// Produce the next framed token.
    pub fn next_frame(&mut self) -> RawFrame {
        let groups: Vec<String> = (0..self.groups_per_frame)
            .map(|_| encode_group(&self.next_sample()))
            .collect();

        let sequences: Vec<String> = groups
            .chunks(GROUPS_PER_SEQUENCE)
            .map(|chunk| chunk.join(";"))
            .collect();

        format!("{START_MARKER}{}{END_MARKER}", sequences.join("fi"))
    }

    /// Produce `count` frames in order.
    pub fn frames(&mut self, count: usize) -> Vec<RawFrame> {
        (0..count).map(|_| self.next_frame()).collect()
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new(500.0)
    }
}

/// Encode one sample as the device does: uppercase hex fields joined by commas.
pub fn encode_group(sample: &SampleVector) -> String {
    sample
        .iter()
        .map(|code| format!("{code:X}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decoder::decode_with_report;

    #[test]
    fn test_frames_decode_cleanly() {
        let mut device = SyntheticDevice::default();
        let frame = device.next_frame();

        assert!(frame.starts_with('i'));
        assert!(frame.ends_with('f'));
        assert_eq!(frame.matches("fi").count(), GROUPS_PER_FRAME / GROUPS_PER_SEQUENCE - 1);

        let report = decode_with_report(&frame);
        assert_eq!(report.samples.len(), GROUPS_PER_FRAME);
        assert_eq!(report.dropped_groups, 0);
    }

    #[test]
    fn test_generator_is_deterministic() {
        let a = SyntheticDevice::default().with_groups_per_frame(120).frames(3);
        let b = SyntheticDevice::default().with_groups_per_frame(120).frames(3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_decoded_values_match_generated() {
        let mut reference = SyntheticDevice::default();
        let expected: Vec<SampleVector> = (0..75).map(|_| reference.next_sample()).collect();

        let mut device = SyntheticDevice::default().with_groups_per_frame(75);
        let decoded = decode_with_report(&device.next_frame()).samples;
        assert_eq!(decoded, expected);
        assert_eq!(device.samples_generated(), 75);
    }
}
