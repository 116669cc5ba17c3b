//! Latest-measurement snapshot shared between the acquisition thread and its readers.
//!
//! # Key Design: Wait-Free Publish
//!
//! The acquisition thread runs at the bus rate with elevated priority and must never
//! wait on a lock held by the telemetry task or the logger worker. The snapshot is
//! therefore a sequence lock over atomics:
//!
//! 1. The single [`SnapshotWriter`] bumps the sequence to an odd value, stores every
//!    channel, then bumps it to the next even value. No waiting, no allocation.
//! 2. A [`SnapshotReader`] reads the sequence, copies the values, and reads the sequence
//!    again. If the two differ, or the first was odd, a write overlapped and the copy is
//!    retried.
//!
//! Readers therefore never see channels from two different ticks, and the writer never
//! blocks. Only the writer half is not `Clone`, which keeps the single-writer rule in
//! the type system.
//!
//! # Example
//!
//! ```
//! use utec_daq::data::channel::Channel;
//! use utec_daq::data::snapshot::{snapshot_channel, Measurement};
//!
//! let (mut writer, reader) = snapshot_channel();
//! assert!(reader.read().is_none());
//!
//! let mut m = Measurement::new(1);
//! m.set(Channel::HpuPressure, 6.3125);
//! writer.publish(&m);
//!
//! assert_eq!(reader.read().unwrap().get(Channel::HpuPressure), 6.3125);
//! ```

use crate::data::channel::Channel;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::sync::Arc;

/// Calibrated values of every channel from one acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    tick: u64,
    values: [f64; Channel::COUNT],
}

impl Measurement {
    /// All channels zero.
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            values: [0.0; Channel::COUNT],
        }
    }

    /// Acquisition tick that produced these values.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Set the tick number.
    pub fn set_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Calibrated value of `channel`.
    pub fn get(&self, channel: Channel) -> f64 {
        self.values[channel.index()]
    }

    /// Overwrite one channel.
    pub fn set(&mut self, channel: Channel, value: f64) {
        self.values[channel.index()] = value;
    }

    /// Values in [`Channel::ALL`] order.
    pub fn values(&self) -> &[f64; Channel::COUNT] {
        &self.values
    }

    /// `(channel, value)` pairs in [`Channel::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (Channel, f64)> + '_ {
        Channel::ALL.iter().map(|c| (*c, self.values[c.index()]))
    }
}

struct Shared {
    /// Even when stable, odd while a publish is in progress. Zero until the first publish.
    sequence: AtomicU64,
    tick: AtomicU64,
    values: [AtomicU64; Channel::COUNT],
}

/// Create the writer and a first reader of a new, empty snapshot.
pub fn snapshot_channel() -> (SnapshotWriter, SnapshotReader) {
    let shared = Arc::new(Shared {
        sequence: AtomicU64::new(0),
        tick: AtomicU64::new(0),
        values: std::array::from_fn(|_| AtomicU64::new(0)),
    });
    (
        SnapshotWriter {
            shared: shared.clone(),
        },
        SnapshotReader { shared },
    )
}

/// The only handle allowed to publish.
pub struct SnapshotWriter {
    shared: Arc<Shared>,
}

impl SnapshotWriter {
    /// Replace the snapshot with `measurement`. Wait-free.
    pub fn publish(&mut self, measurement: &Measurement) {
        let shared = &*self.shared;
        let sequence = shared.sequence.load(Ordering::Relaxed);
        shared
            .sequence
            .store(sequence.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        shared.tick.store(measurement.tick, Ordering::Relaxed);
        for (slot, value) in shared.values.iter().zip(measurement.values.iter()) {
            slot.store(value.to_bits(), Ordering::Relaxed);
        }

        shared
            .sequence
            .store(sequence.wrapping_add(2), Ordering::Release);
    }

    /// Another reader of this snapshot.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            shared: self.shared.clone(),
        }
    }
}

/// Read side of the snapshot. Cheap to clone.
#[derive(Clone)]
pub struct SnapshotReader {
    shared: Arc<Shared>,
}

impl SnapshotReader {
    /// Latest consistent measurement, or `None` before the first publish.
    pub fn read(&self) -> Option<Measurement> {
        let shared = &*self.shared;
        loop {
            let before = shared.sequence.load(Ordering::Acquire);
            if before == 0 {
                return None;
            }
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let mut measurement = Measurement::new(shared.tick.load(Ordering::Relaxed));
            for (value, slot) in measurement.values.iter_mut().zip(shared.values.iter()) {
                *value = f64::from_bits(slot.load(Ordering::Relaxed));
            }

            fence(Ordering::Acquire);
            if shared.sequence.load(Ordering::Relaxed) == before {
                return Some(measurement);
            }
            std::hint::spin_loop();
        }
    }
}
