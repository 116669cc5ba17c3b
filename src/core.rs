//! Core traits of the DAQ application.
//!
//! The signal-conditioning pipeline talks to three collaborators, each behind a trait
//! so the loops can be exercised without hardware, a server, or a disk:
//!
//! - [`Fieldbus`] / [`Device`]: the bus master that calls the acquisition callback.
//! - [`KeyValueStore`]: where calibrated values are published and the logging flag lives.
//! - [`SessionLogger`]: records the snapshot to a file between start and stop commands.
use crate::error::DaqError;
use std::path::Path;

pub use crate::hardware::{Device, Fieldbus};
pub use crate::store::KeyValueStore;

/// Trait for a logger that records the live snapshot into session files.
///
/// Only the telemetry context owns and drives a session logger.
pub trait SessionLogger: Send {
    /// Open `path` and start recording. Fails if a session is already open.
    fn start_session(&mut self, path: &Path) -> Result<(), DaqError>;

    /// Stop recording and close the file. Stopping an idle logger is a no-op.
    fn stop(&mut self) -> Result<(), DaqError>;

    /// Whether a session is currently open.
    fn is_logging(&self) -> bool;
}
