//! Application wiring: two contexts sharing one snapshot.
//!
//! - The **acquisition context** runs on a dedicated OS thread named `acquisition`,
//!   inside [`Fieldbus::run_periodic`]. It owns the filters and the snapshot writer.
//! - The **telemetry context** is a tokio task. It owns the store client, the control
//!   state and the [`CsvLogger`], whose worker thread reads the same snapshot.
//!
//! Shutdown is driven by the bus: once [`StopHandle::stop`] is called the acquisition
//! thread returns, the telemetry task is signalled through a `watch` channel, and it
//! closes any open session before [`DaqApp::run`] returns.

use crate::acquisition::Acquisition;
use crate::config::Settings;
use crate::core::{Fieldbus, KeyValueStore};
use crate::data::csv_logger::CsvLogger;
use crate::data::snapshot::snapshot_channel;
use crate::error::{AppResult, DaqError};
use crate::hardware::{BusStats, StopHandle};
use crate::telemetry::{TelemetryLoop, TelemetryStats};
use std::thread;
use tokio::sync::watch;
use tracing::{error, info};

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Bus cycle counters
    pub bus: BusStats,
    /// Acquisition ticks, equal to `bus.cycles`
    pub ticks: u64,
    /// Telemetry counters
    pub telemetry: TelemetryStats,
}

/// The DAQ application over a bus `B` and a store `S`.
pub struct DaqApp<B, S> {
    settings: Settings,
    bus: B,
    store: S,
}

impl<B, S> DaqApp<B, S>
where
    B: Fieldbus + 'static,
    S: KeyValueStore + 'static,
{
    /// Validate `settings` and take ownership of the collaborators.
    pub fn new(settings: Settings, bus: B, store: S) -> AppResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            bus,
            store,
        })
    }

    /// Handle that ends [`DaqApp::run`]. Take it before calling `run`.
    pub fn stop_handle(&self) -> StopHandle {
        self.bus.stop_handle()
    }

    /// Settings the app was built with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run both contexts until the stop handle fires.
    pub async fn run(self) -> AppResult<RunReport> {
        let Self {
            settings,
            mut bus,
            store,
        } = self;

        let (writer, reader) = snapshot_channel();
        let mut acquisition = Acquisition::new(&settings, writer)?;
        let logger =
            CsvLogger::with_all_channels(reader.clone(), settings.logging.sample_period());
        let telemetry = TelemetryLoop::new(
            store,
            logger,
            reader,
            &settings.telemetry,
            settings.logging.directory.clone(),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let telemetry_task = tokio::spawn(telemetry.run(shutdown_rx));

        let sampling_rate = settings.acquisition.sampling_rate_hz;
        info!(
            name = %settings.application.name,
            sampling_rate,
            "Starting acquisition"
        );
        let spawned = thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || {
                let result = bus.run_periodic(sampling_rate, |image| acquisition.tick(image));
                (result, acquisition.ticks())
            });

        let acquisition_result = match spawned {
            Ok(handle) => match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok((result, ticks))) => result.map(|bus| (bus, ticks)),
                Ok(Err(_)) => Err(DaqError::Fieldbus(
                    "acquisition thread panicked".to_string(),
                )),
                Err(e) => Err(DaqError::Fieldbus(format!(
                    "failed to join acquisition thread: {e}"
                ))),
            },
            Err(e) => Err(DaqError::Io(e)),
        };

        // Close any open session whatever happened to the bus.
        let _ = shutdown_tx.send(true);
        let telemetry = telemetry_task
            .await
            .map_err(|e| DaqError::Logger(format!("telemetry task failed: {e}")))?;

        let (bus, ticks) = acquisition_result.inspect_err(|e| {
            error!(error = %e, "Acquisition ended with error");
        })?;
        info!(
            cycles = bus.cycles,
            overruns = bus.overruns,
            telemetry_cycles = telemetry.cycles,
            "DAQ stopped"
        );
        Ok(RunReport {
            bus,
            ticks,
            telemetry,
        })
    }
}
