//! Real-time acquisition context.
//!
//! [`Acquisition::tick`] is the control callback handed to
//! [`Fieldbus::run_periodic`](crate::hardware::Fieldbus::run_periodic). Each tick reads
//! the raw registers named by the [`Wiring`], applies the calibration of every channel,
//! advances the two speed filters, and publishes exactly one [`Measurement`].
//!
//! The tick path does not allocate, lock, log or perform I/O. Everything fallible
//! (filter cutoffs, wiring checks) happens in [`Acquisition::new`].

use crate::config::{CalibrationSettings, Settings};
use crate::data::calibration::{DerivativeChannel, LinearScale};
use crate::data::channel::Channel;
use crate::data::snapshot::{Measurement, SnapshotReader, SnapshotWriter};
use crate::error::{AppResult, DaqError};
use crate::hardware::{ProcessImage, RegisterAddress};
use serde::{Deserialize, Serialize};

/// Raw register each channel is computed from.
///
/// Defaults describe the rig's terminal order: encoders on the first EL5152, RTDs on
/// the EL3202, pressures on the two EL3062 and one EL3356 per load cell. The screwjack
/// position and speed share the screwjack encoder register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Wiring {
    /// Drill encoder counter
    pub drill_speed: RegisterAddress,
    /// Screwjack encoder counter, for position
    pub screwjack_position: RegisterAddress,
    /// Screwjack encoder counter, for speed
    pub screwjack_speed: RegisterAddress,
    /// Front bearing RTD
    pub front_bearing_temp: RegisterAddress,
    /// Rear bearing RTD
    pub rear_bearing_temp: RegisterAddress,
    /// Drill pressure transducer
    pub drill_pressure: RegisterAddress,
    /// HPU pressure transducer
    pub hpu_pressure: RegisterAddress,
    /// Screwjack pressure transducer
    pub screwjack_pressure: RegisterAddress,
    /// Torque load cell
    pub torque: RegisterAddress,
    /// Thrust load cell
    pub force: RegisterAddress,
}

impl Default for Wiring {
    fn default() -> Self {
        Self {
            drill_speed: RegisterAddress::new(1, 0),
            screwjack_position: RegisterAddress::new(1, 1),
            screwjack_speed: RegisterAddress::new(1, 1),
            front_bearing_temp: RegisterAddress::new(2, 0),
            rear_bearing_temp: RegisterAddress::new(2, 1),
            drill_pressure: RegisterAddress::new(4, 0),
            hpu_pressure: RegisterAddress::new(4, 1),
            screwjack_pressure: RegisterAddress::new(5, 0),
            torque: RegisterAddress::new(7, 0),
            force: RegisterAddress::new(8, 0),
        }
    }
}

impl Wiring {
    /// Register feeding `channel`.
    pub fn address(&self, channel: Channel) -> RegisterAddress {
        match channel {
            Channel::HpuPressure => self.hpu_pressure,
            Channel::DrillPressure => self.drill_pressure,
            Channel::ScrewjackPressure => self.screwjack_pressure,
            Channel::DrillSpeed => self.drill_speed,
            Channel::ScrewjackPosition => self.screwjack_position,
            Channel::ScrewjackSpeed => self.screwjack_speed,
            Channel::FrontBearingTemp => self.front_bearing_temp,
            Channel::RearBearingTemp => self.rear_bearing_temp,
            Channel::Torque => self.torque,
            Channel::Force => self.force,
        }
    }

    /// Every address must fit the process image.
    pub fn validate(&self) -> AppResult<()> {
        for channel in Channel::ALL {
            let address = self.address(channel);
            if !address.is_valid() {
                return Err(DaqError::Configuration(format!(
                    "wiring for {channel} points at position {} input {}, outside the process image",
                    address.position, address.index
                )));
            }
        }
        Ok(())
    }
}

/// Per-channel conversion applied on each tick.
#[derive(Debug, Clone)]
enum Conditioning {
    Linear(LinearScale),
    Derivative(DerivativeChannel),
}

impl Conditioning {
    fn for_channel(
        channel: Channel,
        calibration: &CalibrationSettings,
        settings: &Settings,
    ) -> AppResult<Self> {
        let sampling_rate = f64::from(settings.acquisition.sampling_rate_hz);
        let cutoff = settings.acquisition.speed_cutoff();
        Ok(match channel {
            Channel::HpuPressure | Channel::DrillPressure | Channel::ScrewjackPressure => {
                Conditioning::Linear(calibration.pressure())
            }
            Channel::FrontBearingTemp | Channel::RearBearingTemp => {
                Conditioning::Linear(calibration.temperature())
            }
            Channel::Torque => Conditioning::Linear(calibration.torque()),
            Channel::Force => Conditioning::Linear(calibration.force()),
            Channel::ScrewjackPosition => Conditioning::Linear(calibration.screwjack_position()),
            Channel::DrillSpeed => Conditioning::Derivative(DerivativeChannel::rotary_speed(
                calibration,
                sampling_rate,
                cutoff,
            )?),
            Channel::ScrewjackSpeed => Conditioning::Derivative(
                DerivativeChannel::linear_speed(calibration, sampling_rate, cutoff)?,
            ),
        })
    }

    #[inline]
    fn apply(&mut self, raw: f64) -> f64 {
        match self {
            Conditioning::Linear(scale) => scale.calibrate(raw),
            Conditioning::Derivative(derivative) => derivative.update(raw),
        }
    }
}

/// State owned by the acquisition thread.
pub struct Acquisition {
    addresses: [RegisterAddress; Channel::COUNT],
    conditioning: [Conditioning; Channel::COUNT],
    writer: SnapshotWriter,
    measurement: Measurement,
    ticks: u64,
}

impl Acquisition {
    /// Build the per-channel pipeline. Fails on an invalid cutoff or wiring.
    pub fn new(settings: &Settings, writer: SnapshotWriter) -> AppResult<Self> {
        settings.wiring.validate()?;
        let calibration = &settings.calibration;

        let mut conditioning = Vec::with_capacity(Channel::COUNT);
        for channel in Channel::ALL {
            conditioning.push(Conditioning::for_channel(channel, calibration, settings)?);
        }
        let conditioning: [Conditioning; Channel::COUNT] = conditioning
            .try_into()
            .map_err(|_| DaqError::Configuration("channel table size mismatch".to_string()))?;

        Ok(Self {
            addresses: Channel::ALL.map(|channel| settings.wiring.address(channel)),
            conditioning,
            writer,
            measurement: Measurement::new(0),
            ticks: 0,
        })
    }

    /// Control callback body: read, calibrate, filter, publish.
    pub fn tick(&mut self, image: &ProcessImage) {
        self.ticks += 1;
        self.measurement.set_tick(self.ticks);
        for channel in Channel::ALL {
            let i = channel.index();
            let raw = image.get(self.addresses[i]);
            let value = self.conditioning[i].apply(raw);
            self.measurement.set(channel, value);
        }
        self.writer.publish(&self.measurement);
    }

    /// A reader of the snapshot this context publishes to.
    pub fn reader(&self) -> SnapshotReader {
        self.writer.reader()
    }

    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The measurement published by the last tick.
    pub fn last_measurement(&self) -> &Measurement {
        &self.measurement
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::snapshot::snapshot_channel;

    fn acquisition(settings: &Settings) -> (Acquisition, SnapshotReader) {
        let (writer, reader) = snapshot_channel();
        (Acquisition::new(settings, writer).unwrap(), reader)
    }

    #[test]
    fn default_wiring_is_valid_and_shares_the_screwjack_encoder() {
        let wiring = Wiring::default();
        wiring.validate().unwrap();
        assert_eq!(
            wiring.address(Channel::ScrewjackPosition),
            wiring.address(Channel::ScrewjackSpeed)
        );
    }

    #[test]
    fn invalid_wiring_is_rejected() {
        let mut settings = Settings::default();
        settings.wiring.torque = RegisterAddress::new(3, 5);
        let (writer, _reader) = snapshot_channel();
        assert!(matches!(
            Acquisition::new(&settings, writer),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn invalid_cutoff_is_rejected() {
        let mut settings = Settings::default();
        settings.acquisition.speed_filter_cutoff_hz = 0.0;
        let (writer, _reader) = snapshot_channel();
        assert!(matches!(
            Acquisition::new(&settings, writer),
            Err(DaqError::CutoffOutOfRange { .. })
        ));
    }

    #[test]
    fn nothing_is_published_before_the_first_tick() {
        let (acq, reader) = acquisition(&Settings::default());
        assert_eq!(acq.ticks(), 0);
        assert!(reader.read().is_none());
    }

    #[test]
    fn one_tick_calibrates_every_linear_channel() {
        let settings = Settings::default();
        let (mut acq, reader) = acquisition(&settings);

        let mut image = ProcessImage::default();
        image.set(settings.wiring.hpu_pressure, 1000.0);
        image.set(settings.wiring.front_bearing_temp, 235.0);
        image.set(settings.wiring.torque, 100.0);
        image.set(settings.wiring.force, -2.0);
        image.set(settings.wiring.screwjack_position, 38400.0);
        acq.tick(&image);

        let m = reader.read().unwrap();
        assert_eq!(m.tick(), 1);
        assert!((m.get(Channel::HpuPressure) - 6.3125).abs() < 1e-9);
        assert!((m.get(Channel::FrontBearingTemp) - 23.5).abs() < 1e-9);
        assert!((m.get(Channel::Torque) - 11.29848).abs() < 1e-9);
        assert!((m.get(Channel::Force) + 17.79288).abs() < 1e-9);
        // 38400 counts = one inch of travel
        assert!((m.get(Channel::ScrewjackPosition) - 2.54).abs() < 1e-9);
        // first sample only establishes the speed baselines
        assert_eq!(m.get(Channel::DrillSpeed), 0.0);
        assert_eq!(m.get(Channel::ScrewjackSpeed), 0.0);
    }

    #[test]
    fn constant_encoder_rate_settles_to_speed() {
        let mut settings = Settings::default();
        settings.calibration.drill_pulses_per_rev = 1000.0;
        let (mut acq, reader) = acquisition(&settings);

        let mut image = ProcessImage::default();
        for step in 0..2000 {
            image.set(settings.wiring.drill_speed, 4.0 * f64::from(step));
            acq.tick(&image);
        }
        let m = reader.read().unwrap();
        assert_eq!(m.tick(), 2000);
        assert!((m.get(Channel::DrillSpeed) - 60.0).abs() < 1e-6);
        assert_eq!(acq.last_measurement(), &m);
    }

    #[test]
    fn each_tick_publishes_once() {
        let (mut acq, reader) = acquisition(&Settings::default());
        let image = ProcessImage::default();
        for expected in 1..=5 {
            acq.tick(&image);
            assert_eq!(reader.read().unwrap().tick(), expected);
        }
        assert_eq!(acq.reader().read().unwrap().tick(), 5);
    }
}
