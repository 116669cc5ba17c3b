//! Second-order Butterworth low-pass filter over a fixed number of channels.
//!
//! The filter is the bilinear transform of the analog Butterworth prototype with the
//! cutoff pre-warped, written in direct form I:
//!
//! ```text
//! y[n] = b0 x[n] + b1 x[n-1] + b2 x[n-2] - a1 y[n-1] - a2 y[n-2]
//! ```
//!
//! Histories are kept most-recent-first, so `y` is two dot products: the raw history
//! against `raw_coeff = [b0, b1, b2]` and the filtered history against
//! `filtered_coeff = [a1, a2]`. Every channel of the `N`-wide state vector is filtered
//! independently with the same coefficients.
//!
//! `update` works entirely on fixed-size arrays, so it never allocates and its cost is
//! constant per channel. It is safe to call from the acquisition thread.
//!
//! # Example
//!
//! ```
//! use utec_daq::data::butterworth::{ButterworthFilter, Cutoff};
//!
//! # fn main() -> Result<(), utec_daq::error::DaqError> {
//! // 30 Hz cutoff at a 1 kHz sample rate, two independent channels
//! let mut filter = ButterworthFilter::<2>::new(Cutoff::Hz { sampling_rate: 1000.0, cutoff: 30.0 })?;
//! let y = filter.update([1.0, -1.0]);
//! assert!(y[0] > 0.0 && y[1] < 0.0);
//! # Ok(())
//! # }
//! ```

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, SQRT_2};

/// Filter order. Only second order is supported.
pub const FILTER_ORDER: usize = 2;

/// Cutoff frequency of a low-pass filter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cutoff {
    /// Cycles per sample, valid in `(0, 0.5)`.
    Normalized(f64),
    /// Cutoff in Hz against a sampling rate in Hz.
    Hz {
        /// Sampling rate in Hz
        sampling_rate: f64,
        /// Cutoff frequency in Hz
        cutoff: f64,
    },
}

impl Cutoff {
    /// Reduce to cycles per sample, rejecting anything outside `(0, 0.5)`.
    pub fn normalized(self) -> AppResult<f64> {
        let fc = match self {
            Cutoff::Normalized(fc) => fc,
            Cutoff::Hz {
                sampling_rate,
                cutoff,
            } => cutoff / sampling_rate,
        };
        // NaN fails both comparisons
        if fc > 0.0 && fc < 0.5 {
            Ok(fc)
        } else {
            Err(DaqError::CutoffOutOfRange { fc })
        }
    }
}

/// Digital second-order Butterworth low-pass filter for `N` independent channels.
#[derive(Debug, Clone)]
pub struct ButterworthFilter<const N: usize> {
    /// Raw inputs, most recent first.
    raw_history: [[f64; N]; FILTER_ORDER + 1],
    /// Filter outputs, most recent first.
    filtered_history: [[f64; N]; FILTER_ORDER],
    /// Coefficient for the most recent sample first.
    raw_coeff: [f64; FILTER_ORDER + 1],
    filtered_coeff: [f64; FILTER_ORDER],
    normalized_cutoff: f64,
}

impl<const N: usize> ButterworthFilter<N> {
    /// Create a filter with zeroed history.
    pub fn new(cutoff: Cutoff) -> AppResult<Self> {
        let fc = cutoff.normalized()?;
        let (raw_coeff, filtered_coeff) = coefficients(fc);
        Ok(Self {
            raw_history: [[0.0; N]; FILTER_ORDER + 1],
            filtered_history: [[0.0; N]; FILTER_ORDER],
            raw_coeff,
            filtered_coeff,
            normalized_cutoff: fc,
        })
    }

    /// Change the cutoff. History is kept.
    ///
    /// On error the previous coefficients remain in effect.
    pub fn set_cutoff(&mut self, cutoff: Cutoff) -> AppResult<()> {
        let fc = cutoff.normalized()?;
        let (raw_coeff, filtered_coeff) = coefficients(fc);
        self.raw_coeff = raw_coeff;
        self.filtered_coeff = filtered_coeff;
        self.normalized_cutoff = fc;
        Ok(())
    }

    /// Fill every history slot with `x`, as if the input had been constant forever.
    pub fn initialize(&mut self, x: [f64; N]) {
        self.raw_history = [x; FILTER_ORDER + 1];
        self.filtered_history = [x; FILTER_ORDER];
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        self.initialize([0.0; N]);
    }

    /// Push one sample vector through the filter and return the filtered vector.
    pub fn update(&mut self, x: [f64; N]) -> [f64; N] {
        self.raw_history.copy_within(0..FILTER_ORDER, 1);
        self.raw_history[0] = x;

        let mut y = [0.0; N];
        for (channel, out) in y.iter_mut().enumerate() {
            let feedforward: f64 = self
                .raw_history
                .iter()
                .zip(&self.raw_coeff)
                .map(|(sample, coeff)| sample[channel] * coeff)
                .sum();
            let feedback: f64 = self
                .filtered_history
                .iter()
                .zip(&self.filtered_coeff)
                .map(|(sample, coeff)| sample[channel] * coeff)
                .sum();
            *out = feedforward - feedback;
        }

        self.filtered_history.copy_within(0..FILTER_ORDER - 1, 1);
        self.filtered_history[0] = y;
        y
    }

    /// Cutoff in cycles per sample.
    pub fn normalized_cutoff(&self) -> f64 {
        self.normalized_cutoff
    }

    /// `[b0, b1, b2]`
    pub fn raw_coeff(&self) -> [f64; FILTER_ORDER + 1] {
        self.raw_coeff
    }

    /// `[a1, a2]`
    pub fn filtered_coeff(&self) -> [f64; FILTER_ORDER] {
        self.filtered_coeff
    }
}

fn coefficients(fc: f64) -> ([f64; FILTER_ORDER + 1], [f64; FILTER_ORDER]) {
    let pre_warp = (PI * fc).tan();
    let inv = 1.0 / pre_warp;
    let inv_sq = inv * inv;
    let gain = inv_sq + SQRT_2 * inv + 1.0;

    let raw = [1.0 / gain, 2.0 / gain, 1.0 / gain];
    let filtered = [
        (2.0 - 2.0 * inv_sq) / gain,
        (inv_sq - SQRT_2 * inv + 1.0) / gain,
    ];
    (raw, filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use biquad::{Coefficients, ToHertz, Type, Q_BUTTERWORTH_F64};

    const TOLERANCE: f64 = 1e-12;

    fn lowpass<const N: usize>(fc: f64) -> ButterworthFilter<N> {
        ButterworthFilter::new(Cutoff::Normalized(fc)).unwrap()
    }

    #[test]
    fn test_cutoff_bounds() {
        assert!(Cutoff::Normalized(0.5).normalized().is_err());
        assert!(Cutoff::Normalized(-0.01).normalized().is_err());
        assert!(Cutoff::Normalized(0.0).normalized().is_err());
        assert!(Cutoff::Normalized(f64::NAN).normalized().is_err());
        assert_eq!(Cutoff::Normalized(0.1).normalized().unwrap(), 0.1);
    }

    #[test]
    fn test_hz_cutoff_is_reduced() {
        let fc = Cutoff::Hz {
            sampling_rate: 1000.0,
            cutoff: 30.0,
        }
        .normalized()
        .unwrap();
        assert!((fc - 0.03).abs() < TOLERANCE);

        let at_nyquist = Cutoff::Hz {
            sampling_rate: 1000.0,
            cutoff: 500.0,
        };
        assert!(matches!(
            at_nyquist.normalized(),
            Err(DaqError::CutoffOutOfRange { .. })
        ));
    }

    #[test]
    fn test_valid_cutoff_gives_finite_coefficients() {
        let filter = lowpass::<1>(0.1);
        assert!(filter.raw_coeff().iter().all(|c| c.is_finite()));
        assert!(filter.filtered_coeff().iter().all(|c| c.is_finite()));
        assert_eq!(filter.normalized_cutoff(), 0.1);
    }

    #[test]
    fn test_failed_reconfigure_keeps_coefficients() {
        let mut filter = lowpass::<1>(0.1);
        let raw = filter.raw_coeff();
        let filtered = filter.filtered_coeff();

        assert!(filter.set_cutoff(Cutoff::Normalized(0.5)).is_err());
        assert_eq!(filter.raw_coeff(), raw);
        assert_eq!(filter.filtered_coeff(), filtered);
        assert_eq!(filter.normalized_cutoff(), 0.1);

        filter.set_cutoff(Cutoff::Normalized(0.2)).unwrap();
        assert_ne!(filter.raw_coeff(), raw);
    }

    #[test]
    fn test_matches_rbj_butterworth_design() {
        // The cookbook low-pass at Q = 1/sqrt(2) is the same bilinear Butterworth design.
        let filter = lowpass::<1>(0.03);
        let reference = Coefficients::<f64>::from_params(
            Type::LowPass,
            1000.0_f64.hz(),
            30.0_f64.hz(),
            Q_BUTTERWORTH_F64,
        )
        .unwrap();

        let [b0, b1, b2] = filter.raw_coeff();
        let [a1, a2] = filter.filtered_coeff();
        assert!((b0 - reference.b0).abs() < 1e-9);
        assert!((b1 - reference.b1).abs() < 1e-9);
        assert!((b2 - reference.b2).abs() < 1e-9);
        assert!((a1 - reference.a1).abs() < 1e-9);
        assert!((a2 - reference.a2).abs() < 1e-9);
    }

    #[test]
    fn test_unity_dc_gain() {
        let mut filter = lowpass::<1>(0.03);
        let mut y = [0.0];
        for _ in 0..2000 {
            y = filter.update([5.0]);
        }
        assert!((y[0] - 5.0).abs() < 1e-9, "settled at {}", y[0]);
    }

    #[test]
    fn test_initialize_starts_in_steady_state() {
        let mut filter = lowpass::<2>(0.03);
        filter.initialize([3.0, -7.0]);
        let y = filter.update([3.0, -7.0]);
        assert!((y[0] - 3.0).abs() < 1e-9);
        assert!((y[1] + 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_channels_are_independent() {
        let mut pair = lowpass::<2>(0.1);
        let mut single = lowpass::<1>(0.1);
        for i in 0..50 {
            let x = (i as f64 * 0.3).sin();
            let y = pair.update([x, 1000.0 * (i % 3) as f64]);
            let z = single.update([x]);
            assert_eq!(y[0], z[0]);
        }
    }

    #[test]
    fn test_deterministic() {
        let input: Vec<f64> = (0..200).map(|i| ((i * 7919) % 101) as f64 - 50.0).collect();
        let run = || {
            let mut filter = lowpass::<1>(0.05);
            input.iter().map(|x| filter.update([*x])[0]).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_output_width_matches_state_width() {
        fn check<const N: usize>() {
            let mut filter = lowpass::<N>(0.2);
            for _ in 0..5 {
                assert_eq!(filter.update([1.0; N]).len(), N);
            }
        }
        check::<1>();
        check::<2>();
        check::<7>();
        check::<32>();
    }

    #[test]
    fn test_reset_clears_history() {
        let mut filter = lowpass::<1>(0.1);
        for _ in 0..10 {
            filter.update([100.0]);
        }
        filter.reset();
        assert_eq!(filter.update([0.0]), [0.0]);
    }
}
