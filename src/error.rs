//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the entire application,
//! and the narrower `StoreError` returned by key-value store clients.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches
//!   in the configuration file or environment overrides.
//! - **`Configuration`**: Semantic errors in a configuration that parsed fine but is
//!   logically incorrect (e.g. a zero sampling rate). Caught by `Settings::validate`.
//! - **`CutoffOutOfRange`**: A filter was constructed or reconfigured with a normalized
//!   cutoff outside `(0, 0.5)`. Never clamped silently.
//! - **`Io`** / **`Csv`**: File errors from the session logger.
//! - **`Store`**: A key-value store operation failed. The telemetry loop recovers from
//!   these in place; they only escape at startup (e.g. initial connect).
//! - **`Fieldbus`**: Device registration or scheduling errors from the bus master.
//! - **`Logger`**: Session logger misuse or worker failures.
//!
//! By using `#[from]`, `DaqError` can be created from underlying error types with `?`.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Normalized cutoff frequency {fc} is outside (0, 0.5)")]
    CutoffOutOfRange { fc: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fieldbus error: {0}")]
    Fieldbus(String),

    #[error("Logger error: {0}")]
    Logger(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

/// Errors reported by [`KeyValueStore`](crate::store::KeyValueStore) implementations.
#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_error_names_the_value() {
        let err = DaqError::CutoffOutOfRange { fc: 0.5 };
        assert!(err.to_string().contains("0.5"));
    }

    #[test]
    fn store_error_converts_into_daq_error() {
        fn fails() -> AppResult<()> {
            Err(StoreError::Timeout(Duration::from_secs(2)))?;
            Ok(())
        }

        match fails() {
            Err(DaqError::Store(StoreError::Timeout(d))) => assert_eq!(d, Duration::from_secs(2)),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
