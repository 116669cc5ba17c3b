//! Subscriber installation runs in its own test binary: it sets the process-global
//! dispatcher.

use tracing::Level;
use utec_daq::config::Settings;
use utec_daq::tracing_setup::{self, OutputFormat, TracingConfig};

#[test]
fn test_init_is_idempotent() {
    tracing_setup::init(TracingConfig::new(Level::ERROR).with_format(OutputFormat::Json))
        .expect("first init failed");
    tracing_setup::init(TracingConfig::new(Level::DEBUG)).expect("second init failed");
    tracing_setup::init_from_settings(&Settings::default()).expect("init from settings failed");
    assert!(tracing::dispatcher::has_been_set());
}
