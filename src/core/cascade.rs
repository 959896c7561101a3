//! Per-channel filter cascade: notch, high-pass, low-pass, then block detrend.

use crate::core::biquad::{BiquadCoefficients, BiquadState};
use crate::core::decoder::{SampleVector, CHANNELS};
use crate::core::detrend::{detrend_blocks, DetrendMode, DEFAULT_BLOCK_SIZE};
use serde::{Deserialize, Serialize};

/// One filtered sample: one value per channel.
pub type FilteredVector = [f64; CHANNELS];

/// Number of IIR stages in the cascade.
pub const STAGES: usize = 3;

/// Stage order inside [`ChannelState::stages`].
pub const NOTCH_STAGE: usize = 0;
pub const HIGHPASS_STAGE: usize = 1;
pub const LOWPASS_STAGE: usize = 2;

/// Parameters the cascade is designed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CascadeDesign {
    pub sampling_rate_hz: f64,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub highpass_hz: f64,
    pub lowpass_hz: f64,
    pub block_size: usize,
    pub detrend_mode: DetrendMode,
}

impl Default for CascadeDesign {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 500.0,
            notch_hz: 50.0,
            notch_q: 30.0,
            highpass_hz: 0.5,
            lowpass_hz: 160.0,
            block_size: DEFAULT_BLOCK_SIZE,
            detrend_mode: DetrendMode::Mean,
        }
    }
}

/// Filter history of one channel, one state per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub stages: [BiquadState; STAGES],
}

/// Filter history of every channel of a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CascadeState {
    pub channels: [ChannelState; CHANNELS],
}

impl CascadeState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Designed cascade. Holds coefficients only; state lives with the caller.
#[derive(Debug, Clone)]
pub struct FilterCascade {
    design: CascadeDesign,
    coefficients: [BiquadCoefficients; STAGES],
}

impl FilterCascade {
    pub fn new(design: CascadeDesign) -> Self {
        let fs = design.sampling_rate_hz;
        let coefficients = [
            BiquadCoefficients::notch(design.notch_hz, fs, design.notch_q),
            BiquadCoefficients::highpass(design.highpass_hz, fs),
            BiquadCoefficients::lowpass(design.lowpass_hz, fs),
        ];
        Self {
            design,
            coefficients,
        }
    }

    pub fn design(&self) -> &CascadeDesign {
        &self.design
    }

    pub fn coefficients(&self) -> &[BiquadCoefficients; STAGES] {
        &self.coefficients
    }

    /// Run one channel value through the three IIR stages.
    #[inline]
    fn process_channel(&self, state: &mut ChannelState, x: f64) -> f64 {
        self.coefficients
            .iter()
            .zip(state.stages.iter_mut())
            .fold(x, |value, (coeffs, stage)| stage.process(coeffs, value))
    }

    /// Apply the IIR stages to normalised samples, advancing `state`.
    pub fn apply_iir(&self, input: &[SampleVector], state: &mut CascadeState) -> Vec<FilteredVector> {
        input
            .iter()
            .map(|sample| {
                let mut out = [0.0; CHANNELS];
                for (channel, value) in sample.iter().enumerate() {
                    out[channel] = self.process_channel(&mut state.channels[channel], *value as f64);
                }
                out
            })
            .collect()
    }

    /// Full cascade over a self-contained matrix.
    ///
    /// Blocks are aligned to the first sample of `input`; a trailing partial
    /// block is detrended with its own statistic.
    pub fn filter(&self, input: &[SampleVector], state: &mut CascadeState) -> Vec<FilteredVector> {
        let mut output = self.apply_iir(input, state);
        detrend_blocks(&mut output, self.design.block_size, self.design.detrend_mode);
        output
    }
}

impl Default for FilterCascade {
    fn default() -> Self {
        Self::new(CascadeDesign::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::biquad::Biquad;
    use crate::core::normalize::normalize;
    use std::f64::consts::PI;

    #[test]
    fn test_shape_is_preserved() {
        let cascade = FilterCascade::default();
        let mut state = CascadeState::default();
        let input = vec![[100; CHANNELS]; 73];
        let output = cascade.filter(&input, &mut state);
        assert_eq!(output.len(), 73);
    }

    #[test]
    fn test_stage_order_matches_manual_chain() {
        let cascade = FilterCascade::default();
        let mut state = CascadeState::default();
        let input: Vec<SampleVector> = (0..200)
            .map(|i| [((i * 13) % 97) as i64 - 40; CHANNELS])
            .collect();
        let output = cascade.apply_iir(&input, &mut state);

        let [notch, high, low] = *cascade.coefficients();
        let (mut n, mut h, mut l) = (Biquad::new(notch), Biquad::new(high), Biquad::new(low));
        for (sample, filtered) in input.iter().zip(&output) {
            let expected = l.process(h.process(n.process(sample[0] as f64)));
            assert_eq!(filtered[0], expected);
        }
        assert_eq!(state.channels[0].stages[LOWPASS_STAGE], *l.state());
    }

    #[test]
    fn test_channels_do_not_mix() {
        let cascade = FilterCascade::default();
        let mut state = CascadeState::default();
        let mut input = vec![[0i64; CHANNELS]; 100];
        for (i, sample) in input.iter_mut().enumerate() {
            sample[2] = ((i as f64 * 0.3).sin() * 1000.0) as i64;
        }
        let output = cascade.apply_iir(&input, &mut state);
        for sample in &output {
            for (channel, value) in sample.iter().enumerate() {
                if channel != 2 {
                    assert_eq!(*value, 0.0);
                }
            }
        }
        assert_eq!(state.channels[5], ChannelState::default());
    }

    #[test]
    fn test_constant_input_trends_to_zero() {
        let cascade = FilterCascade::default();
        let mut state = CascadeState::default();
        let input = normalize(&vec![[4096; CHANNELS]; 2000]);
        let output = cascade.filter(&input, &mut state);

        assert!(output.iter().flatten().all(|v| v.is_finite()));
        let last_block = &output[1950..];
        for sample in last_block {
            assert!(sample[0].abs() < 50.0, "residual {}", sample[0]);
        }
    }

    #[test]
    fn test_mains_hum_is_removed() {
        let cascade = FilterCascade::default();
        let mut state = CascadeState::default();
        let input: Vec<SampleVector> = (0..5000)
            .map(|i| {
                let hum = (2.0 * PI * 50.0 * i as f64 / 500.0).sin() * 2000.0;
                [hum.round() as i64; CHANNELS]
            })
            .collect();
        let output = cascade.filter(&input, &mut state);
        let tail_peak = output[4500..]
            .iter()
            .fold(0.0_f64, |acc, s| acc.max(s[0].abs()));
        assert!(tail_peak < 40.0, "hum residual {tail_peak}");
    }
}
