//! Fieldbus Abstraction
//!
//! The bus master owns the device topology and the cycle timing. Before each cycle it
//! lets every registered [`Device`] refresh its inputs in the [`ProcessImage`], then
//! invokes the control callback with the image. The callback only reads raw values; it
//! never talks to devices directly.
//!
//! # Available Buses
//!
//! - [`simulated::SimulatedBus`]: a dedicated-thread periodic scheduler over simulated
//!   Beckhoff terminals, for bench runs and tests without EtherCAT hardware.

pub mod simulated;

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Highest bus position plus one.
pub const MAX_DEVICES: usize = 16;

/// Input registers exposed per device. Every terminal on the rig has one or two.
pub const MAX_INPUTS_PER_DEVICE: usize = 2;

/// A raw input register: bus position and input index within the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterAddress {
    /// Position of the device on the bus
    pub position: u16,
    /// Input index on the device
    pub index: u8,
}

impl RegisterAddress {
    /// `position`/`index` pair.
    pub const fn new(position: u16, index: u8) -> Self {
        Self { position, index }
    }

    /// Whether the address fits the process image.
    pub fn is_valid(&self) -> bool {
        usize::from(self.position) < MAX_DEVICES && usize::from(self.index) < MAX_INPUTS_PER_DEVICE
    }
}

/// Raw input values of every bus position, refreshed before each callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessImage {
    inputs: [[f64; MAX_INPUTS_PER_DEVICE]; MAX_DEVICES],
}

impl Default for ProcessImage {
    fn default() -> Self {
        Self {
            inputs: [[0.0; MAX_INPUTS_PER_DEVICE]; MAX_DEVICES],
        }
    }
}

impl ProcessImage {
    /// Raw value at `address`, NaN for an address outside the image.
    #[inline]
    pub fn get(&self, address: RegisterAddress) -> f64 {
        self.inputs
            .get(usize::from(address.position))
            .and_then(|device| device.get(usize::from(address.index)))
            .copied()
            .unwrap_or(f64::NAN)
    }

    /// Overwrite one register. Out-of-range addresses are ignored.
    pub fn set(&mut self, address: RegisterAddress, value: f64) {
        if let Some(slot) = self
            .inputs
            .get_mut(usize::from(address.position))
            .and_then(|device| device.get_mut(usize::from(address.index)))
        {
            *slot = value;
        }
    }

    /// Input registers of the device at `position`.
    pub fn device_inputs_mut(&mut self, position: u16) -> Option<&mut [f64; MAX_INPUTS_PER_DEVICE]> {
        self.inputs.get_mut(usize::from(position))
    }
}

/// A terminal on the bus.
pub trait Device: Send {
    /// Human-readable type, e.g. `EL3062`.
    fn name(&self) -> &str;

    /// Number of input registers the device fills.
    fn input_count(&self) -> usize;

    /// Refresh the device's inputs for bus cycle `cycle`.
    fn sample(&mut self, cycle: u64, inputs: &mut [f64; MAX_INPUTS_PER_DEVICE]);
}

/// Cycle counters reported when a bus stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Callbacks executed
    pub cycles: u64,
    /// Cycles that started more than one period late
    pub overruns: u64,
}

/// Requests a running bus to stop. Cheap to clone and usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    stopped: Arc<AtomicBool>,
}

impl StopHandle {
    /// Fresh, not-stopped handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the bus to finish the current cycle and return.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Whether [`StopHandle::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// A bus master that drives a control callback at a fixed frequency.
pub trait Fieldbus: Send {
    /// Attach `device` at bus `position`.
    fn register_device(&mut self, position: u16, device: Box<dyn Device>) -> AppResult<()>;

    /// Run `callback` every `1 / frequency_hz` seconds on the calling thread until the
    /// stop handle fires.
    fn run_periodic<F>(&mut self, frequency_hz: u32, callback: F) -> AppResult<BusStats>
    where
        F: FnMut(&ProcessImage);

    /// Handle that ends [`Fieldbus::run_periodic`].
    fn stop_handle(&self) -> StopHandle;
}
