//! Telemetry and control loop.
//!
//! Every period the loop:
//!
//! 1. publishes the latest snapshot to the store as one batch, and
//! 2. reads the operator's logging flag and applies the session policy.
//!
//! Store faults never end the loop. They are classified as [`ControlRead::Unavailable`]
//! (or a failed write) and the loop carries on with the next cycle; repeated identical
//! faults are logged once at `warn` and then at `debug`.
//!
//! # Session Policy
//!
//! | read          | `Disarmed`               | `Armed`                   |
//! |---------------|--------------------------|---------------------------|
//! | `Flag(true)`  | start session, `Armed`   | stay                      |
//! | `Flag(false)` | stay                     | stop session, `Disarmed`  |
//! | `Malformed`   | stay                     | stay                      |
//! | `Unavailable` | stay                     | stay                      |

use crate::config::TelemetryConfig;
use crate::core::{KeyValueStore, SessionLogger};
use crate::data::channel::Channel;
use crate::data::csv_logger::session_file_name;
use crate::data::snapshot::SnapshotReader;
use crate::error::StoreError;
use crate::store::StoreKeys;
use chrono::Local;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Whether a logging session is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    /// No session
    #[default]
    Disarmed,
    /// Session open
    Armed,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlState::Disarmed => f.write_str("disarmed"),
            ControlState::Armed => f.write_str("armed"),
        }
    }
}

/// Outcome of reading the control flag.
#[derive(Debug)]
pub enum ControlRead {
    /// A usable flag, `true` meaning logging requested
    Flag(bool),
    /// The key is absent or its value is not a flag
    Malformed(String),
    /// The store could not be read
    Unavailable(StoreError),
}

impl ControlRead {
    /// Classify the result of a store read.
    pub fn classify(read: Result<Option<String>, StoreError>) -> Self {
        match read {
            Ok(Some(value)) => match parse_flag(&value) {
                Some(flag) => ControlRead::Flag(flag),
                None => ControlRead::Malformed(value),
            },
            Ok(None) => ControlRead::Malformed("<missing>".to_string()),
            Err(e) => ControlRead::Unavailable(e),
        }
    }
}

/// Interpret an operator flag.
///
/// Accepts an optionally signed leading integer (`"1"`, `" 0 "`, `"12abc"`), nonzero
/// meaning `true`, or the words `true`/`false` in any case. The integer must fit in
/// an `i32`.
pub fn parse_flag(value: &str) -> Option<bool> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Some(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Some(false);
    }

    let sign = usize::from(trimmed.starts_with(['+', '-']));
    let digits = trimmed[sign..].bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    // Out-of-range integers are not flags.
    trimmed[..sign + digits].parse::<i32>().ok().map(|n| n != 0)
}

/// What a cycle did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// State unchanged
    None,
    /// A session was opened
    Started,
    /// A session was closed
    Stopped,
    /// Opening a session failed; still disarmed
    StartFailed,
}

/// Result of one [`TelemetryLoop::cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Whether measurements were written
    pub published: bool,
    /// Session change made this cycle
    pub transition: Transition,
}

/// Counters returned when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    /// Cycles executed
    pub cycles: u64,
    /// Batches written successfully
    pub batches: u64,
    /// Failed batch writes
    pub write_failures: u64,
    /// Sessions opened
    pub sessions: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Write,
    Read,
    Malformed,
}

/// The telemetry context: owns the session logger and the control state.
pub struct TelemetryLoop<S, L> {
    store: S,
    logger: L,
    reader: SnapshotReader,
    keys: StoreKeys,
    period: Duration,
    write_timeout: Duration,
    log_directory: PathBuf,
    state: ControlState,
    batch: Vec<(String, String)>,
    write_fault: Fault,
    control_fault: Fault,
    stats: TelemetryStats,
}

impl<S: KeyValueStore, L: SessionLogger> TelemetryLoop<S, L> {
    /// Loop publishing `reader` to `store`, creating session files in `log_directory`.
    pub fn new(
        store: S,
        logger: L,
        reader: SnapshotReader,
        config: &TelemetryConfig,
        log_directory: impl Into<PathBuf>,
    ) -> Self {
        let keys = StoreKeys::new(&config.namespace);
        let batch = Channel::ALL
            .iter()
            .map(|c| (keys.measurement(*c).to_string(), String::new()))
            .collect();
        Self {
            store,
            logger,
            reader,
            keys,
            period: config.period(),
            write_timeout: config.write_timeout(),
            log_directory: log_directory.into(),
            state: ControlState::Disarmed,
            batch,
            write_fault: Fault::None,
            control_fault: Fault::None,
            stats: TelemetryStats::default(),
        }
    }

    /// Current session state.
    pub fn state(&self) -> ControlState {
        self.state
    }

    /// The owned session logger.
    pub fn logger(&self) -> &L {
        &self.logger
    }

    /// Counters so far.
    pub fn stats(&self) -> TelemetryStats {
        self.stats
    }

    /// One publish-then-poll step.
    pub async fn cycle(&mut self) -> CycleReport {
        self.stats.cycles += 1;
        let published = self.publish().await;
        self.reap_dead_session();
        let read = ControlRead::classify(self.store.read(self.keys.control()).await);
        let transition = self.apply(read);
        CycleReport {
            published,
            transition,
        }
    }

    async fn publish(&mut self) -> bool {
        let Some(measurement) = self.reader.read() else {
            return false;
        };
        for ((_, value), (_, reading)) in self.batch.iter_mut().zip(measurement.iter()) {
            value.clear();
            let _ = write!(value, "{reading:.6}");
        }

        match self.store.batch_write(&self.batch, self.write_timeout).await {
            Ok(()) => {
                self.stats.batches += 1;
                if self.write_fault != Fault::None {
                    info!("Store writes recovered");
                    self.write_fault = Fault::None;
                }
                true
            }
            Err(e) => {
                self.stats.write_failures += 1;
                if self.write_fault == Fault::None {
                    warn!(error = %e, "Failed to publish measurements");
                } else {
                    debug!(error = %e, "Failed to publish measurements");
                }
                self.write_fault = Fault::Write;
                false
            }
        }
    }

    /// Disarm if the logger gave up on its session (a failed write). A raised flag
    /// then opens a fresh session on the same cycle.
    fn reap_dead_session(&mut self) {
        if self.state != ControlState::Armed || self.logger.is_logging() {
            return;
        }
        warn!("Logging session ended unexpectedly, disarming");
        if let Err(e) = self.logger.stop() {
            warn!(error = %e, "Logging session closed with error");
        }
        self.state = ControlState::Disarmed;
    }

    fn apply(&mut self, read: ControlRead) -> Transition {
        let flag = match read {
            ControlRead::Flag(flag) => {
                if self.control_fault != Fault::None {
                    info!(state = %self.state, "Control flag readable again");
                    self.control_fault = Fault::None;
                }
                flag
            }
            ControlRead::Malformed(value) => {
                if self.control_fault != Fault::Malformed {
                    warn!(key = self.keys.control(), %value, state = %self.state, "Ignoring malformed control flag");
                } else {
                    debug!(key = self.keys.control(), %value, "Ignoring malformed control flag");
                }
                self.control_fault = Fault::Malformed;
                return Transition::None;
            }
            ControlRead::Unavailable(e) => {
                if self.control_fault != Fault::Read {
                    warn!(key = self.keys.control(), error = %e, state = %self.state, "Control flag unavailable");
                } else {
                    debug!(key = self.keys.control(), error = %e, "Control flag unavailable");
                }
                self.control_fault = Fault::Read;
                return Transition::None;
            }
        };

        match (self.state, flag) {
            (ControlState::Disarmed, true) => {
                let path = self.log_directory.join(session_file_name(&Local::now()));
                match self.logger.start_session(&path) {
                    Ok(()) => {
                        self.state = ControlState::Armed;
                        self.stats.sessions += 1;
                        info!(path = %path.display(), "Logging armed");
                        Transition::Started
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to start logging session");
                        Transition::StartFailed
                    }
                }
            }
            (ControlState::Armed, false) => {
                if let Err(e) = self.logger.stop() {
                    warn!(error = %e, "Logging session closed with error");
                }
                self.state = ControlState::Disarmed;
                info!("Logging disarmed");
                Transition::Stopped
            }
            _ => Transition::None,
        }
    }

    /// Close any open session.
    pub fn shutdown(&mut self) {
        if self.state == ControlState::Armed || self.logger.is_logging() {
            if let Err(e) = self.logger.stop() {
                warn!(error = %e, "Logging session closed with error during shutdown");
            }
            self.state = ControlState::Disarmed;
            info!("Logging session closed for shutdown");
        }
    }

    /// Cycle every period until `shutdown` turns `true` (or its sender is dropped),
    /// then close any open session.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> TelemetryStats {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, control_key = self.keys.control(), "Telemetry loop running");

        loop {
            tokio::select! {
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
                _ = async {
                    interval.tick().await;
                    self.cycle().await
                } => {}
            }
        }

        self.shutdown();
        info!(
            cycles = self.stats.cycles,
            batches = self.stats.batches,
            write_failures = self.stats.write_failures,
            sessions = self.stats.sessions,
            "Telemetry loop stopped"
        );
        self.stats
    }
}
