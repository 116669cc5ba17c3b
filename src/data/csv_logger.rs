//! CSV session logger.
//!
//! The logger samples the latest-measurement snapshot at its own fixed rate on a worker
//! thread and appends one row per sample:
//!
//! ```text
//! timestamp,hpu_pressure_0,drill_pressure_0,...
//! 0,12.625000,3.156250,...
//! 10000,12.631312,3.156250,...
//! ```
//!
//! `timestamp` is microseconds since the session started. Channel columns carry the
//! `_0` element suffix of the vector-valued log format the analysis scripts expect.
//!
//! The worker only ever reads the snapshot, so a slow disk can delay rows but never
//! the acquisition thread.
//!
//! Session files are never overwritten. If the requested file already exists (two
//! sessions started within the same second), the session is written to
//! `<name>_1.csv`, `<name>_2.csv`, ... instead.

use crate::core::SessionLogger;
use crate::data::channel::Channel;
use crate::data::snapshot::SnapshotReader;
use crate::error::DaqError;
use chrono::{DateTime, TimeZone};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Session file name for a start time, `log_<date>_<time>.csv`.
pub fn session_file_name<Tz: TimeZone>(started: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("log_{}.csv", started.format("%Y-%m-%d_%H:%M:%S"))
}

/// Suffixed names tried before giving up on a taken session file name.
const MAX_NAME_SUFFIX: u32 = 1000;

/// Create `path`, or the first free `<stem>_<n>.<ext>` next to it.
fn create_session_file(path: &Path) -> Result<(File, PathBuf), DaqError> {
    let open = |candidate: &Path| OpenOptions::new().write(true).create_new(true).open(candidate);
    match open(path) {
        Ok(file) => return Ok((file, path.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e.into()),
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());
    for n in 1..=MAX_NAME_SUFFIX {
        let name = match &extension {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = path.with_file_name(name);
        match open(&candidate) {
            Ok(file) => return Ok((file, candidate)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(DaqError::Logger(format!(
        "no free session file name next to {}",
        path.display()
    )))
}

struct ActiveSession {
    path: PathBuf,
    stop_tx: Sender<()>,
    worker: JoinHandle<Result<u64, DaqError>>,
}

/// A [`SessionLogger`] writing CSV files with the `csv` crate.
pub struct CsvLogger {
    reader: SnapshotReader,
    period: Duration,
    columns: Vec<(Channel, String)>,
    session: Option<ActiveSession>,
}

impl CsvLogger {
    /// Logger with no registered channels.
    pub fn new(reader: SnapshotReader, period: Duration) -> Self {
        Self {
            reader,
            period,
            columns: Vec::new(),
            session: None,
        }
    }

    /// Logger recording every channel under its log name.
    pub fn with_all_channels(reader: SnapshotReader, period: Duration) -> Self {
        let mut logger = Self::new(reader, period);
        for channel in Channel::ALL {
            logger.columns.push((channel, channel.log_name().to_string()));
        }
        logger
    }

    /// Add a column. Only allowed between sessions.
    pub fn register_channel(&mut self, channel: Channel, name: impl Into<String>) -> Result<(), DaqError> {
        if self.session.is_some() {
            return Err(DaqError::Logger(
                "cannot register channels while a session is open".to_string(),
            ));
        }
        self.columns.push((channel, name.into()));
        Ok(())
    }

    /// Path of the open session file.
    pub fn session_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }
}

impl SessionLogger for CsvLogger {
    fn start_session(&mut self, path: &Path) -> Result<(), DaqError> {
        if self.session.is_some() {
            return Err(DaqError::Logger("a session is already open".to_string()));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let (file, path) = create_session_file(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        let header = std::iter::once("timestamp".to_string())
            .chain(self.columns.iter().map(|(_, name)| format!("{name}_0")));
        writer.write_record(header)?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let reader = self.reader.clone();
        let channels: Vec<Channel> = self.columns.iter().map(|(c, _)| *c).collect();
        let period = self.period;
        let worker_path = path.clone();
        let worker = thread::Builder::new()
            .name("csv-logger".to_string())
            .spawn(move || -> Result<u64, DaqError> {
                let started = Instant::now();
                let mut next = started;
                let mut rows = 0u64;
                let mut record = Vec::with_capacity(channels.len() + 1);
                let result = loop {
                    if let Some(measurement) = reader.read() {
                        record.clear();
                        record.push(started.elapsed().as_micros().to_string());
                        record.extend(channels.iter().map(|c| format!("{:.6}", measurement.get(*c))));
                        if let Err(e) = writer.write_record(&record) {
                            break Err(DaqError::from(e));
                        }
                        rows += 1;
                    }

                    next += period;
                    let wait = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            break writer.flush().map_err(DaqError::from);
                        }
                    }
                };
                if let Err(e) = &result {
                    warn!(path = %worker_path.display(), rows, error = %e, "Logging session aborted");
                }
                result.map(|()| rows)
            })?;

        info!(path = %path.display(), columns = self.columns.len(), "Logging session started");
        self.session = Some(ActiveSession {
            path,
            stop_tx,
            worker,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DaqError> {
        let Some(session) = self.session.take() else {
            debug!("stop requested with no open session");
            return Ok(());
        };
        // The worker may already have exited on a write error.
        let _ = session.stop_tx.send(());
        match session.worker.join() {
            Ok(Ok(rows)) => {
                info!(path = %session.path.display(), rows, "Logging session stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                debug!(path = %session.path.display(), error = %e, "Logging session ended with error");
                Err(e)
            }
            Err(_) => Err(DaqError::Logger("logger worker panicked".to_string())),
        }
    }

    fn is_logging(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.worker.is_finished())
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "Failed to close logging session on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::snapshot::{snapshot_channel, Measurement};
    use chrono::Utc;

    #[test]
    fn file_name_is_timestamped() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(session_file_name(&started), "log_2024-03-09_14:05:07.csv");
    }

    #[test]
    fn records_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.csv");

        let (mut writer, reader) = snapshot_channel();
        let mut m = Measurement::new(1);
        m.set(Channel::HpuPressure, 6.3125);
        m.set(Channel::Force, -8.89644);
        writer.publish(&m);

        let mut logger = CsvLogger::new(reader, Duration::from_millis(2));
        logger.register_channel(Channel::HpuPressure, "hpu_pressure").unwrap();
        logger.register_channel(Channel::Force, "force").unwrap();

        logger.start_session(&path).unwrap();
        assert!(logger.is_logging());
        assert_eq!(logger.session_path(), Some(path.as_path()));
        thread::sleep(Duration::from_millis(30));
        logger.stop().unwrap();
        assert!(!logger.is_logging());

        let mut csv = csv::Reader::from_path(&path).unwrap();
        let headers = csv.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["timestamp", "hpu_pressure_0", "force_0"]
        );
        let rows: Vec<csv::StringRecord> = csv.records().map(|r| r.unwrap()).collect();
        assert!(!rows.is_empty());
        assert_eq!(&rows[0][1], "6.312500");
        assert_eq!(&rows[0][2], "-8.896440");
    }

    #[test]
    fn no_rows_before_first_publish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let (_writer, reader) = snapshot_channel();

        let mut logger = CsvLogger::with_all_channels(reader, Duration::from_millis(1));
        logger.start_session(&path).unwrap();
        thread::sleep(Duration::from_millis(10));
        logger.stop().unwrap();

        let mut csv = csv::Reader::from_path(&path).unwrap();
        assert_eq!(csv.headers().unwrap().len(), Channel::COUNT + 1);
        assert_eq!(csv.records().count(), 0);
    }

    #[test]
    fn same_second_sessions_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log_2024-03-09_14:05:07.csv");

        let (mut writer, reader) = snapshot_channel();
        let mut m = Measurement::new(1);
        m.set(Channel::HpuPressure, 1.5);
        writer.publish(&m);
        let mut logger = CsvLogger::with_all_channels(reader, Duration::from_millis(1));

        logger.start_session(&path).unwrap();
        thread::sleep(Duration::from_millis(20));
        logger.stop().unwrap();
        let first_rows = csv::Reader::from_path(&path).unwrap().records().count();
        assert!(first_rows > 0);

        logger.start_session(&path).unwrap();
        let second = dir.path().join("log_2024-03-09_14:05:07_1.csv");
        assert_eq!(logger.session_path(), Some(second.as_path()));
        logger.stop().unwrap();

        logger.start_session(&path).unwrap();
        assert_eq!(
            logger.session_path(),
            Some(dir.path().join("log_2024-03-09_14:05:07_2.csv").as_path())
        );
        logger.stop().unwrap();

        assert_eq!(
            csv::Reader::from_path(&path).unwrap().records().count(),
            first_rows
        );
        assert!(second.exists());
    }

    #[test]
    fn double_start_is_rejected_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (_writer, reader) = snapshot_channel();
        let mut logger = CsvLogger::with_all_channels(reader, Duration::from_millis(5));

        logger.start_session(&dir.path().join("a.csv")).unwrap();
        assert!(logger.start_session(&dir.path().join("b.csv")).is_err());
        assert!(logger
            .register_channel(Channel::Torque, "torque_again")
            .is_err());
        logger.stop().unwrap();
        logger.stop().unwrap();
        assert!(!dir.path().join("b.csv").exists());
    }
}
