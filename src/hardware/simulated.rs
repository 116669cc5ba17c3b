//! Simulated Fieldbus
//!
//! Provides a bus master and terminals for running the full pipeline without EtherCAT
//! hardware.
//!
//! # Available Simulations
//!
//! - [`SimulatedBus`]: fixed-rate loop on the calling thread with absolute deadlines.
//!   A cycle that starts more than one period late is counted as an overrun and the
//!   schedule is re-based instead of bursting to catch up.
//! - [`SimulatedTerminal`]: a terminal whose inputs follow [`Signal`] generators.
//!   Constructors are named after the Beckhoff terminals on the drilling rig.
//! - [`drilling_rig`]: the rig's bus topology with plausible signals.

use crate::error::{AppResult, DaqError};
use crate::hardware::{
    BusStats, Device, Fieldbus, ProcessImage, StopHandle, MAX_DEVICES, MAX_INPUTS_PER_DEVICE,
};
use std::f64::consts::TAU;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Log every this many overruns after the first.
const OVERRUN_LOG_INTERVAL: u64 = 1000;

/// Raw value generator for one simulated input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Fixed value
    Constant(f64),
    /// `start + per_cycle * cycle`, like a free-running encoder counter
    Ramp {
        /// Value at cycle 0
        start: f64,
        /// Increment per bus cycle
        per_cycle: f64,
    },
    /// `offset + amplitude * sin(2 pi cycle / period_cycles)`
    Sine {
        /// Mean value
        offset: f64,
        /// Peak deviation
        amplitude: f64,
        /// Cycles per oscillation
        period_cycles: f64,
    },
}

impl Signal {
    /// Value at bus cycle `cycle`.
    pub fn value(&self, cycle: u64) -> f64 {
        let t = cycle as f64;
        match *self {
            Signal::Constant(value) => value,
            Signal::Ramp { start, per_cycle } => start + per_cycle * t,
            Signal::Sine {
                offset,
                amplitude,
                period_cycles,
            } => offset + amplitude * (TAU * t / period_cycles).sin(),
        }
    }
}

/// A simulated terminal with up to [`MAX_INPUTS_PER_DEVICE`] generated inputs.
#[derive(Debug, Clone)]
pub struct SimulatedTerminal {
    name: String,
    signals: Vec<Signal>,
}

impl SimulatedTerminal {
    /// Terminal `name` whose inputs follow `signals`, in input order.
    pub fn new(name: impl Into<String>, signals: Vec<Signal>) -> AppResult<Self> {
        let name = name.into();
        if signals.len() > MAX_INPUTS_PER_DEVICE {
            return Err(DaqError::Fieldbus(format!(
                "{name} has {} inputs, at most {MAX_INPUTS_PER_DEVICE} are supported",
                signals.len()
            )));
        }
        Ok(Self { name, signals })
    }

    /// Terminal with no inputs (couplers, power supplies, unused slots).
    pub fn passive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: Vec::new(),
        }
    }

    /// EK1100 EtherCAT coupler.
    pub fn ek1100() -> Self {
        Self::passive("EK1100")
    }

    /// EL9510 power supply terminal.
    pub fn el9510() -> Self {
        Self::passive("EL9510")
    }

    /// EL5152 two-channel incremental encoder interface.
    pub fn el5152(channel_1: Signal, channel_2: Signal) -> Self {
        Self {
            name: "EL5152".to_string(),
            signals: vec![channel_1, channel_2],
        }
    }

    /// EL3062 two-channel 0-10 V analog input.
    pub fn el3062(channel_1: Signal, channel_2: Signal) -> Self {
        Self {
            name: "EL3062".to_string(),
            signals: vec![channel_1, channel_2],
        }
    }

    /// EL3356 load-cell evaluation terminal.
    pub fn el3356(load: Signal) -> Self {
        Self {
            name: "EL3356".to_string(),
            signals: vec![load],
        }
    }

    /// EL3202 two-channel RTD input (tenths of a degree).
    pub fn el3202(channel_1: Signal, channel_2: Signal) -> Self {
        Self {
            name: "EL3202".to_string(),
            signals: vec![channel_1, channel_2],
        }
    }
}

impl Device for SimulatedTerminal {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_count(&self) -> usize {
        self.signals.len()
    }

    fn sample(&mut self, cycle: u64, inputs: &mut [f64; MAX_INPUTS_PER_DEVICE]) {
        for (input, signal) in inputs.iter_mut().zip(&self.signals) {
            *input = signal.value(cycle);
        }
    }
}

/// Bus master running the control callback on the calling thread.
pub struct SimulatedBus {
    devices: Vec<(u16, Box<dyn Device>)>,
    image: ProcessImage,
    stop: StopHandle,
}

impl Default for SimulatedBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            image: ProcessImage::default(),
            stop: StopHandle::new(),
        }
    }

    /// `(position, name)` of every registered device, in registration order.
    pub fn devices(&self) -> impl Iterator<Item = (u16, &str)> {
        self.devices.iter().map(|(p, d)| (*p, d.name()))
    }

    fn refresh_inputs(&mut self, cycle: u64) {
        for (position, device) in &mut self.devices {
            if let Some(inputs) = self.image.device_inputs_mut(*position) {
                device.sample(cycle, inputs);
            }
        }
    }
}

impl Fieldbus for SimulatedBus {
    fn register_device(&mut self, position: u16, device: Box<dyn Device>) -> AppResult<()> {
        if usize::from(position) >= MAX_DEVICES {
            return Err(DaqError::Fieldbus(format!(
                "bus position {position} is beyond the last position {}",
                MAX_DEVICES - 1
            )));
        }
        if device.input_count() > MAX_INPUTS_PER_DEVICE {
            return Err(DaqError::Fieldbus(format!(
                "{} at position {position} exposes {} inputs, at most {MAX_INPUTS_PER_DEVICE} are supported",
                device.name(),
                device.input_count()
            )));
        }
        if self.devices.iter().any(|(p, _)| *p == position) {
            return Err(DaqError::Fieldbus(format!(
                "bus position {position} is already occupied"
            )));
        }
        debug!(position, device = device.name(), "Registered device");
        self.devices.push((position, device));
        Ok(())
    }

    fn run_periodic<F>(&mut self, frequency_hz: u32, mut callback: F) -> AppResult<BusStats>
    where
        F: FnMut(&ProcessImage),
    {
        if frequency_hz == 0 {
            return Err(DaqError::Fieldbus(
                "cycle frequency must be positive".to_string(),
            ));
        }
        let period = Duration::from_secs(1) / frequency_hz;
        info!(
            frequency_hz,
            devices = self.devices.len(),
            "Simulated bus running"
        );

        let mut stats = BusStats::default();
        let mut deadline = Instant::now();
        while !self.stop.is_stopped() {
            self.refresh_inputs(stats.cycles);
            callback(&self.image);
            stats.cycles += 1;

            deadline += period;
            let now = Instant::now();
            if now > deadline + period {
                stats.overruns += 1;
                if stats.overruns == 1 || stats.overruns % OVERRUN_LOG_INTERVAL == 0 {
                    warn!(
                        cycle = stats.cycles,
                        overruns = stats.overruns,
                        late_us = (now - deadline).as_micros() as u64,
                        "Bus cycle overrun"
                    );
                }
                deadline = now;
            } else if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }

        info!(
            cycles = stats.cycles,
            overruns = stats.overruns,
            "Simulated bus stopped"
        );
        Ok(stats)
    }

    fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}

/// The drilling rig's terminal layout, in bus order, with plausible raw signals.
pub fn drilling_rig() -> AppResult<SimulatedBus> {
    let mut bus = SimulatedBus::new();
    bus.register_device(0, Box::new(SimulatedTerminal::ek1100()))?;
    // drill shaft encoder, screwjack encoder
    bus.register_device(
        1,
        Box::new(SimulatedTerminal::el5152(
            Signal::Ramp {
                start: 0.0,
                per_cycle: 4.0,
            },
            Signal::Ramp {
                start: 0.0,
                per_cycle: 0.5,
            },
        )),
    )?;
    // front and rear bearing RTDs
    bus.register_device(
        2,
        Box::new(SimulatedTerminal::el3202(
            Signal::Constant(235.0),
            Signal::Constant(241.0),
        )),
    )?;
    bus.register_device(
        3,
        Box::new(SimulatedTerminal::el5152(
            Signal::Constant(0.0),
            Signal::Constant(0.0),
        )),
    )?;
    // drill pressure, HPU pressure
    bus.register_device(
        4,
        Box::new(SimulatedTerminal::el3062(
            Signal::Sine {
                offset: 16000.0,
                amplitude: 400.0,
                period_cycles: 2000.0,
            },
            Signal::Constant(24000.0),
        )),
    )?;
    // screwjack pressure
    bus.register_device(
        5,
        Box::new(SimulatedTerminal::el3062(
            Signal::Constant(8000.0),
            Signal::Constant(0.0),
        )),
    )?;
    bus.register_device(6, Box::new(SimulatedTerminal::el9510()))?;
    // torque, then thrust load cell
    bus.register_device(
        7,
        Box::new(SimulatedTerminal::el3356(Signal::Sine {
            offset: 450.0,
            amplitude: 50.0,
            period_cycles: 500.0,
        })),
    )?;
    bus.register_device(
        8,
        Box::new(SimulatedTerminal::el3356(Signal::Constant(1100.0))),
    )?;
    Ok(bus)
}
