//! Raw count to engineering unit conversions.
//!
//! Two kinds of rule exist:
//!
//! - [`LinearScale`]: stateless `raw * factor`, used for pressure, temperature, torque,
//!   force and the screwjack position.
//! - [`DerivativeChannel`]: differentiates an encoder counter against the previous
//!   sample and low-passes the result through its own [`ButterworthFilter`]. Used for the
//!   drill rotary speed and the screwjack linear speed.
//!
//! Calibration never rejects a raw value. The only fallible step is choosing a filter
//! cutoff when a derivative channel is built.

use crate::config::CalibrationSettings;
use crate::data::butterworth::{ButterworthFilter, Cutoff};
use crate::error::AppResult;

/// Centimeters per inch.
pub const CM_PER_INCH: f64 = 2.54;

/// Seconds per minute.
const SECONDS_PER_MINUTE: f64 = 60.0;

/// `calibrated = raw * factor`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearScale {
    factor: f64,
}

impl LinearScale {
    /// Scale by `factor` units per count.
    pub const fn new(factor: f64) -> Self {
        Self { factor }
    }

    /// Scale by `1 / divisor`, for sensors specified in counts per unit.
    pub fn divisor(divisor: f64) -> Self {
        Self::new(1.0 / divisor)
    }

    /// Units per count.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Convert one raw sample.
    #[inline]
    pub fn calibrate(&self, raw: f64) -> f64 {
        raw * self.factor
    }
}

impl CalibrationSettings {
    /// Shared by the HPU, drill and screwjack transducers.
    pub fn pressure(&self) -> LinearScale {
        LinearScale::new(self.pressure_bar_per_count)
    }

    /// Both bearing RTDs.
    pub fn temperature(&self) -> LinearScale {
        LinearScale::divisor(self.temperature_counts_per_degree)
    }

    /// Torque load cell.
    pub fn torque(&self) -> LinearScale {
        LinearScale::new(self.torque_nm_per_count)
    }

    /// Thrust load cell.
    pub fn force(&self) -> LinearScale {
        LinearScale::new(self.force_n_per_count)
    }

    /// Screwjack encoder counts to cm of travel.
    pub fn screwjack_position(&self) -> LinearScale {
        LinearScale::new(self.screwjack_cm_per_count())
    }

    /// Drill encoder count rate (counts/s) to RPM.
    pub fn drill_rpm_per_count_rate(&self) -> f64 {
        SECONDS_PER_MINUTE / (self.drill_pulses_per_rev * self.quadrature_factor)
    }

    /// Screwjack encoder count rate (counts/s) to cm/min.
    pub fn screwjack_cm_per_min_per_count_rate(&self) -> f64 {
        SECONDS_PER_MINUTE * self.screwjack_cm_per_count()
    }

    fn screwjack_cm_per_count(&self) -> f64 {
        CM_PER_INCH
            / (self.screwjack_threads_per_inch
                * self.screwjack_pulses_per_rev
                * self.quadrature_factor)
    }
}

/// Velocity estimate from a position counter.
///
/// The first sample only establishes the baseline, so the first output is zero no
/// matter how large the counter already is.
#[derive(Debug, Clone)]
pub struct DerivativeChannel {
    previous: Option<f64>,
    filter: ButterworthFilter<1>,
    sampling_rate: f64,
    rate_scale: f64,
}

impl DerivativeChannel {
    /// `rate_scale` converts counts per second to the output unit.
    pub fn new(sampling_rate: f64, rate_scale: f64, cutoff: Cutoff) -> AppResult<Self> {
        Ok(Self {
            previous: None,
            filter: ButterworthFilter::new(cutoff)?,
            sampling_rate,
            rate_scale,
        })
    }

    /// Drill shaft speed in RPM.
    pub fn rotary_speed(
        settings: &CalibrationSettings,
        sampling_rate: f64,
        cutoff: Cutoff,
    ) -> AppResult<Self> {
        Self::new(sampling_rate, settings.drill_rpm_per_count_rate(), cutoff)
    }

    /// Screwjack feed rate in cm/min.
    pub fn linear_speed(
        settings: &CalibrationSettings,
        sampling_rate: f64,
        cutoff: Cutoff,
    ) -> AppResult<Self> {
        Self::new(
            sampling_rate,
            settings.screwjack_cm_per_min_per_count_rate(),
            cutoff,
        )
    }

    /// Unfiltered rate since the previous sample. Updates the previous-sample memory.
    pub fn differentiate(&mut self, raw: f64) -> f64 {
        let previous = self.previous.unwrap_or(raw);
        self.previous = Some(raw);
        (raw - previous) * self.sampling_rate * self.rate_scale
    }

    /// Filtered rate, the value published for the channel.
    #[inline]
    pub fn update(&mut self, raw: f64) -> f64 {
        let rate = self.differentiate(raw);
        self.filter.update([rate])[0]
    }

    /// Whether a baseline sample has been seen.
    pub fn is_initialized(&self) -> bool {
        self.previous.is_some()
    }

    /// Drop the baseline and filter history.
    pub fn reset(&mut self) {
        self.previous = None;
        self.filter.reset();
    }
}
