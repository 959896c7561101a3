//! Second-order IIR sections.
//!
//! Coefficients follow the RBJ audio-EQ cookbook and are normalised so that
//! `a0 = 1`. The recurrence is direct form I:
//!
//! ```text
//! y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
//! ```

use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_1_SQRT_2, PI};

/// Quality factor of a second-order Butterworth section.
pub const BUTTERWORTH_Q: f64 = FRAC_1_SQRT_2;

/// Kind of section a set of coefficients was designed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    /// Narrow band rejection around a centre frequency
    Notch,
    /// Second-order Butterworth high-pass
    HighPass,
    /// Second-order Butterworth low-pass
    LowPass,
}

/// Normalised biquad coefficients. Immutable once designed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// Design a section of the given kind.
    ///
    /// `q` is only used by the notch; Butterworth stages always use `1/√2`.
    pub fn design(kind: FilterKind, frequency_hz: f64, sampling_rate_hz: f64, q: f64) -> Self {
        match kind {
            FilterKind::Notch => Self::notch(frequency_hz, sampling_rate_hz, q),
            FilterKind::HighPass => Self::highpass(frequency_hz, sampling_rate_hz),
            FilterKind::LowPass => Self::lowpass(frequency_hz, sampling_rate_hz),
        }
    }

    /// Notch centred on `center_hz`.
    pub fn notch(center_hz: f64, sampling_rate_hz: f64, q: f64) -> Self {
        let (cos_w0, alpha) = warp(center_hz, sampling_rate_hz, q);
        Self::normalized(
            [1.0, -2.0 * cos_w0, 1.0],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    /// Butterworth high-pass with cutoff `cutoff_hz`.
    pub fn highpass(cutoff_hz: f64, sampling_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = warp(cutoff_hz, sampling_rate_hz, BUTTERWORTH_Q);
        let b = (1.0 + cos_w0) / 2.0;
        Self::normalized(
            [b, -(1.0 + cos_w0), b],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    /// Butterworth low-pass with cutoff `cutoff_hz`.
    pub fn lowpass(cutoff_hz: f64, sampling_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = warp(cutoff_hz, sampling_rate_hz, BUTTERWORTH_Q);
        let b = (1.0 - cos_w0) / 2.0;
        Self::normalized(
            [b, 1.0 - cos_w0, b],
            [1.0 + alpha, -2.0 * cos_w0, 1.0 - alpha],
        )
    }

    /// Identity section (passes input through).
    pub fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Gain of the section at DC (z = 1).
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    fn normalized(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Self {
            b0: b[0] / a0,
            b1: b[1] / a0,
            b2: b[2] / a0,
            a1: a[1] / a0,
            a2: a[2] / a0,
        }
    }
}

/// Returns `(cos(w0), alpha)` for a frequency and quality factor.
fn warp(frequency_hz: f64, sampling_rate_hz: f64, q: f64) -> (f64, f64) {
    let w0 = 2.0 * PI * frequency_hz / sampling_rate_hz;
    (w0.cos(), w0.sin() / (2.0 * q))
}

/// Running state of one section on one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BiquadState {
    pub x1: f64,
    pub x2: f64,
    pub y1: f64,
    pub y2: f64,
}

impl BiquadState {
    /// Filter one sample and rotate the history.
    #[inline]
    pub fn process(&mut self, coeffs: &BiquadCoefficients, x: f64) -> f64 {
        let y = coeffs.b0 * x + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;

        y
    }

    /// Zero the history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A section bundled with its own state, for single-channel use.
#[derive(Debug, Clone)]
pub struct Biquad {
    coeffs: BiquadCoefficients,
    state: BiquadState,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoefficients) -> Self {
        Self {
            coeffs,
            state: BiquadState::default(),
        }
    }

    pub fn process(&mut self, x: f64) -> f64 {
        self.state.process(&self.coeffs, x)
    }

    pub fn process_block(&mut self, input: &[f64]) -> Vec<f64> {
        input.iter().map(|&x| self.process(x)).collect()
    }

    pub fn coefficients(&self) -> &BiquadCoefficients {
        &self.coeffs
    }

    pub fn state(&self) -> &BiquadState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 500.0;

    fn sine(freq: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / FS).sin())
            .collect()
    }

    fn peak(samples: &[f64]) -> f64 {
        samples.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }

    fn rms(samples: &[f64]) -> f64 {
        (samples.iter().map(|v| v * v).sum::<f64>() / samples.len() as f64).sqrt()
    }

    #[test]
    fn test_notch_coefficients_match_formula() {
        let q = 30.0;
        let w0 = 2.0 * PI * 50.0 / FS;
        let alpha = w0.sin() / (2.0 * q);
        let a0 = 1.0 + alpha;
        let c = BiquadCoefficients::notch(50.0, FS, q);

        assert_eq!(c.b0, 1.0 / a0);
        assert_eq!(c.b1, -2.0 * w0.cos() / a0);
        assert_eq!(c.b2, 1.0 / a0);
        assert_eq!(c.a1, -2.0 * w0.cos() / a0);
        assert_eq!(c.a2, (1.0 - alpha) / a0);
    }

    #[test]
    fn test_butterworth_coefficients_match_formula() {
        let w0 = 2.0 * PI * 160.0 / FS;
        let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;
        let lp = BiquadCoefficients::lowpass(160.0, FS);
        assert_eq!(lp.b0, (1.0 - w0.cos()) / 2.0 / a0);
        assert_eq!(lp.b1, (1.0 - w0.cos()) / a0);
        assert_eq!(lp.a2, (1.0 - alpha) / a0);

        let w0 = 2.0 * PI * 0.5 / FS;
        let alpha = w0.sin() / (2.0 * FRAC_1_SQRT_2);
        let a0 = 1.0 + alpha;
        let hp = BiquadCoefficients::highpass(0.5, FS);
        assert_eq!(hp.b0, (1.0 + w0.cos()) / 2.0 / a0);
        assert_eq!(hp.b1, -(1.0 + w0.cos()) / a0);
        assert_eq!(hp.a1, -2.0 * w0.cos() / a0);
    }

    #[test]
    fn test_design_dispatch() {
        assert_eq!(
            BiquadCoefficients::design(FilterKind::Notch, 50.0, FS, 30.0),
            BiquadCoefficients::notch(50.0, FS, 30.0)
        );
        assert_eq!(
            BiquadCoefficients::design(FilterKind::LowPass, 160.0, FS, 99.0),
            BiquadCoefficients::lowpass(160.0, FS)
        );
    }

    #[test]
    fn test_highpass_rejects_dc() {
        // A 0.5 Hz cutoff settles slowly; a faster corner shows the same law in fewer samples.
        let mut filter = Biquad::new(BiquadCoefficients::highpass(20.0, FS));
        let output = filter.process_block(&vec![-28672.0; 500]);
        assert!(output.last().unwrap().abs() < 1.0);
        assert!(BiquadCoefficients::highpass(0.5, FS).dc_gain().abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut filter = Biquad::new(BiquadCoefficients::lowpass(160.0, FS));
        let v = 1234.5;
        let output = filter.process_block(&vec![v; 100]);
        assert!((output.last().unwrap() - v).abs() < 1e-6);
        assert!((BiquadCoefficients::lowpass(160.0, FS).dc_gain() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_notch_rejects_center_frequency() {
        let mut filter = Biquad::new(BiquadCoefficients::notch(50.0, FS, 30.0));
        let output = filter.process_block(&sine(50.0, 5000));
        let tail = &output[4000..];
        assert!(peak(tail) < 0.02, "residual {}", peak(tail));
    }

    #[test]
    fn test_notch_passes_octave_away() {
        for freq in [25.0, 100.0] {
            let mut filter = Biquad::new(BiquadCoefficients::notch(50.0, FS, 30.0));
            let input = sine(freq, 5000);
            let output = filter.process_block(&input);
            let gain = rms(&output[4000..]) / rms(&input[4000..]);
            assert!((gain - 1.0).abs() < 0.05, "{freq} Hz gain {gain}");
        }
    }

    #[test]
    fn test_state_rotation() {
        let coeffs = BiquadCoefficients::identity();
        let mut state = BiquadState::default();
        state.process(&coeffs, 1.0);
        state.process(&coeffs, 2.0);
        assert_eq!(state.x1, 2.0);
        assert_eq!(state.x2, 1.0);
        assert_eq!(state.y1, 2.0);
        assert_eq!(state.y2, 1.0);

        state.reset();
        assert_eq!(state, BiquadState::default());
    }
}
