//! # utec_daq
//!
//! Real-time data acquisition for the utec drilling rig.
//!
//! ## Architecture Overview
//!
//! The library is organized into several modules, each with a distinct responsibility:
//!
//! - **`hardware`**: The [`Fieldbus`](hardware::Fieldbus) and [`Device`](hardware::Device)
//!   traits, the process image, and a simulated bus of the rig's Beckhoff terminals.
//! - **`data`**: Signal conditioning building blocks: the Butterworth filter, calibration
//!   rules, the channel table, the latest-measurement snapshot and the CSV session logger.
//! - **`acquisition`**: The per-tick control callback: read, calibrate, filter, publish.
//! - **`telemetry`**: The periodic loop that publishes measurements to the key-value store
//!   and starts or stops logging sessions from the operator's flag.
//! - **`store`**: The [`KeyValueStore`](store::KeyValueStore) trait with Redis and
//!   in-memory clients.
//! - **`app`**: Wires the acquisition thread and the telemetry task together.
//! - **`config`**: Layered configuration (defaults, TOML, environment) via `figment`.
//! - **`core`**: Re-exports of the collaborator traits and the
//!   [`SessionLogger`](core::SessionLogger) trait.
//! - **`error`**: [`DaqError`](error::DaqError) and [`StoreError`](error::StoreError).
//! - **`tracing_setup`**: Subscriber initialization for structured logging.

pub mod acquisition;
pub mod app;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod hardware;
pub mod store;
pub mod telemetry;
pub mod tracing_setup;
