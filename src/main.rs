//! CLI entry point for the utec drilling-rig DAQ.
//!
//! Loads the layered configuration, initializes tracing, builds the bus and the store
//! client, and runs until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! utec_daq --config config/utec_daq.toml
//! UTEC_DAQ_STORE__BACKEND=memory utec_daq
//! utec_daq --print-config
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use utec_daq::app::DaqApp;
use utec_daq::config::{Settings, StoreBackend, DEFAULT_CONFIG_PATH};
use utec_daq::core::KeyValueStore;
use utec_daq::hardware::simulated;
use utec_daq::store::{InMemoryStore, RedisStore};
use utec_daq::tracing_setup;

#[derive(Parser)]
#[command(name = "utec_daq")]
#[command(about = "Drilling rig data acquisition: fieldbus, calibration, telemetry and CSV logging", long_about = None)]
struct Cli {
    /// Configuration file (TOML). Missing files fall back to defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print the effective configuration (file plus environment) and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if cli.print_config {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }
    tracing_setup::init_from_settings(&settings)?;
    info!(config = %cli.config.display(), "Configuration loaded");

    let store = connect_store(&settings).await;
    let bus = simulated::drilling_rig().context("Failed to build the bus topology")?;
    let app = DaqApp::new(settings, bus, store).context("Invalid configuration")?;

    let stop = app.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        stop.stop();
    });

    let report = app.run().await?;
    info!(
        cycles = report.bus.cycles,
        overruns = report.bus.overruns,
        batches = report.telemetry.batches,
        sessions = report.telemetry.sessions,
        "Shutdown complete"
    );
    Ok(())
}

/// The configured store. An unreachable Redis server is not fatal: the telemetry loop
/// keeps retrying every cycle.
async fn connect_store(settings: &Settings) -> Arc<dyn KeyValueStore> {
    match settings.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(InMemoryStore::new())
        }
        StoreBackend::Redis => {
            let store = RedisStore::new(
                settings.store.address.clone(),
                Duration::from_millis(settings.store.connect_timeout_ms),
            );
            match store.ping().await {
                Ok(()) => info!(address = %settings.store.address, "Redis reachable"),
                Err(e) => warn!(
                    address = %settings.store.address,
                    error = %e,
                    "Redis unreachable, telemetry will keep retrying"
                ),
            }
            Arc::new(store)
        }
    }
}
