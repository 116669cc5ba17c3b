//! Configuration System using Figment
//!
//! Strongly-typed configuration for the acquisition, telemetry and logging loops.
//! Configuration is layered from:
//! 1. Built-in defaults (the constants of the rig as wired today)
//! 2. A TOML file (default `config/utec_daq.toml`, optional)
//! 3. Environment variables prefixed with `UTEC_DAQ_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use utec_daq::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // UTEC_DAQ_TELEMETRY__PERIOD_MS=20 overrides telemetry.period_ms
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Sampling at {} Hz", settings.acquisition.sampling_rate_hz);
//! # Ok(())
//! # }
//! ```

use crate::acquisition::Wiring;
use crate::data::butterworth::Cutoff;
use crate::error::{AppResult, DaqError};
use crate::tracing_setup::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/utec_daq.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application settings
    pub application: ApplicationConfig,
    /// Real-time acquisition loop
    pub acquisition: AcquisitionConfig,
    /// Raw count to engineering unit constants
    pub calibration: CalibrationSettings,
    /// Raw register of each channel
    pub wiring: Wiring,
    /// Store publishing and control polling
    pub telemetry: TelemetryConfig,
    /// Key-value store backend
    pub store: StoreConfig,
    /// CSV session logger
    pub logging: LoggingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Console format (pretty, compact, json)
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "utec DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: OutputFormat::Compact,
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Control callback frequency in Hz; also the sampling rate of every channel.
    pub sampling_rate_hz: u32,
    /// Low-pass cutoff applied to the encoder-derived speeds, in Hz.
    pub speed_filter_cutoff_hz: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 1000,
            speed_filter_cutoff_hz: 30.0,
        }
    }
}

impl AcquisitionConfig {
    /// Cutoff of the speed filters expressed against the sampling rate.
    pub fn speed_cutoff(&self) -> Cutoff {
        Cutoff::Hz {
            sampling_rate: f64::from(self.sampling_rate_hz),
            cutoff: self.speed_filter_cutoff_hz,
        }
    }
}

/// Calibration constants for every wired channel.
///
/// Encoder constants describe the mechanics: the drill encoder's pulses per
/// revolution, the screwjack lead (threads per inch) and its encoder resolution,
/// and the terminal's quadrature evaluation factor (4-fold on the EL5152).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// bar per count, shared by all three pressure transducers
    pub pressure_bar_per_count: f64,
    /// RTD counts per degree Celsius
    pub temperature_counts_per_degree: f64,
    /// Nm per load-cell count
    pub torque_nm_per_count: f64,
    /// N per load-cell count
    pub force_n_per_count: f64,
    /// Drill shaft encoder pulses per revolution
    pub drill_pulses_per_rev: f64,
    /// Screwjack threads per inch
    pub screwjack_threads_per_inch: f64,
    /// Screwjack encoder pulses per revolution
    pub screwjack_pulses_per_rev: f64,
    /// Counts reported by the terminal per encoder pulse
    pub quadrature_factor: f64,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            pressure_bar_per_count: 0.0063125,
            temperature_counts_per_degree: 10.0,
            torque_nm_per_count: 0.1129848,
            force_n_per_count: 8.89644,
            drill_pulses_per_rev: 60.0,
            screwjack_threads_per_inch: 48.0,
            screwjack_pulses_per_rev: 200.0,
            quadrature_factor: 4.0,
        }
    }
}

impl CalibrationSettings {
    fn validate(&self) -> AppResult<()> {
        let constants = [
            ("pressure_bar_per_count", self.pressure_bar_per_count),
            ("temperature_counts_per_degree", self.temperature_counts_per_degree),
            ("torque_nm_per_count", self.torque_nm_per_count),
            ("force_n_per_count", self.force_n_per_count),
            ("drill_pulses_per_rev", self.drill_pulses_per_rev),
            ("screwjack_threads_per_inch", self.screwjack_threads_per_inch),
            ("screwjack_pulses_per_rev", self.screwjack_pulses_per_rev),
            ("quadrature_factor", self.quadrature_factor),
        ];
        for (name, value) in constants {
            if !value.is_finite() || value == 0.0 {
                return Err(DaqError::Configuration(format!(
                    "calibration.{name} must be finite and non-zero, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Telemetry/control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Cycle period in milliseconds
    pub period_ms: u64,
    /// Upper bound on one batched store write, in milliseconds
    pub write_timeout_ms: u64,
    /// Key namespace, the `utec` in `utec::read::pressure::hpu`
    pub namespace: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period_ms: 10,
            write_timeout_ms: 2000,
            namespace: "utec".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Cycle period
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }

    /// Batched write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Which key-value store the telemetry loop talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Redis server at `store.address`
    Redis,
    /// Process-local map, for bench setups without a server
    Memory,
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend selection
    pub backend: StoreBackend,
    /// `host:port` of the Redis server
    pub address: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            address: "127.0.0.1:6379".to_string(),
            connect_timeout_ms: 2000,
        }
    }
}

/// CSV session logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory session files are created in
    pub directory: PathBuf,
    /// Row period in milliseconds (10 ms = 100 Hz)
    pub sample_period_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            sample_period_ms: 10,
        }
    }
}

impl LoggingConfig {
    /// Row period
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

impl Settings {
    /// Load configuration from the default path and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("UTEC_DAQ_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// Effective configuration rendered as TOML, in the layout of the config file.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DaqError::Configuration(format!("Failed to render configuration: {e}")))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.acquisition.sampling_rate_hz == 0 {
            return Err(DaqError::Configuration(
                "acquisition.sampling_rate_hz must be positive".to_string(),
            ));
        }
        self.acquisition.speed_cutoff().normalized()?;

        self.calibration.validate()?;
        self.wiring.validate()?;

        if self.telemetry.period_ms == 0 {
            return Err(DaqError::Configuration(
                "telemetry.period_ms must be positive".to_string(),
            ));
        }
        if self.telemetry.namespace.trim().is_empty() {
            return Err(DaqError::Configuration(
                "telemetry.namespace must not be empty".to_string(),
            ));
        }

        let has_port = self
            .store
            .address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if self.store.backend == StoreBackend::Redis && !has_port {
            return Err(DaqError::Configuration(format!(
                "Invalid store.address '{}'. Expected host:port",
                self.store.address
            )));
        }

        if self.logging.sample_period_ms == 0 {
            return Err(DaqError::Configuration(
                "logging.sample_period_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.acquisition.sampling_rate_hz, 1000);
        assert_eq!(settings.telemetry.write_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("does/not/exist.toml").unwrap();
        assert_eq!(settings.telemetry.namespace, "utec");
        assert_eq!(settings.calibration.pressure_bar_per_count, 0.0063125);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [acquisition]
            sampling_rate_hz = 500

            [store]
            backend = "memory"
            "#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.acquisition.sampling_rate_hz, 500);
        assert_eq!(settings.store.backend, StoreBackend::Memory);
        // untouched sections keep their defaults
        assert_eq!(settings.logging.sample_period_ms, 10);
    }

    #[test]
    fn rendered_toml_loads_back() {
        let mut settings = Settings::default();
        settings.telemetry.namespace = "bench".to_string();
        settings.wiring.force.position = 9;

        let rendered = settings.to_toml().unwrap();
        let parsed: Settings = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.telemetry.namespace, "bench");
        assert_eq!(parsed.wiring, settings.wiring);
        assert_eq!(parsed.store.backend, StoreBackend::Redis);
    }

    #[test]
    fn invalid_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "verbose".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn speed_cutoff_above_nyquist_is_rejected() {
        let mut settings = Settings::default();
        settings.acquisition.speed_filter_cutoff_hz = 500.0;
        assert!(matches!(
            settings.validate(),
            Err(DaqError::CutoffOutOfRange { .. })
        ));
    }

    #[test]
    fn zero_calibration_constant_is_rejected() {
        let mut settings = Settings::default();
        settings.calibration.temperature_counts_per_degree = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn wiring_can_be_overridden_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [wiring.torque]
            position = 9
            index = 1
            "#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.wiring.torque.position, 9);
        assert_eq!(settings.wiring.torque.index, 1);
        assert_eq!(settings.wiring.force, Wiring::default().force);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn bad_store_address_is_rejected_only_for_redis() {
        let mut settings = Settings::default();
        settings.store.address = "localhost".to_string();
        assert!(settings.validate().is_err());

        settings.store.backend = StoreBackend::Memory;
        assert!(settings.validate().is_ok());
    }
}
