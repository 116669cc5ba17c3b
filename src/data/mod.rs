//! Signal conditioning, the shared snapshot, and session recording.
pub mod butterworth;
pub mod calibration;
pub mod channel;
pub mod csv_logger;
pub mod snapshot;
