// src/hardware/mod.rs - Hardware abstraction the interpreter drives
pub mod temperature;
pub mod virtual_hal;
pub mod watchdog;

pub use temperature::{Heater, HeaterError, HeaterIo, Pid};
pub use virtual_hal::{MoveReport, VirtualHal};
pub use watchdog::HardwareWatchdog;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::coordinates::AxisMask;
use crate::motion::PulseGenerator;

#[derive(Debug, Error)]
pub enum HalError {
    #[error("temperature sensor failure: {0}")]
    Sensor(String),
    #[error("malformed pulse sequence: {0}")]
    MalformedPulses(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaterId {
    Extruder,
    Bed,
}

impl fmt::Display for HeaterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaterId::Extruder => write!(f, "extruder"),
            HeaterId::Bed => write!(f, "bed"),
        }
    }
}

/// Driver side of the machine: stepper pulses, endstops, heaters, fan and
/// the hardware watchdog.
///
/// `move_pulses` may return before the motors finish; `join` must not
/// return until every submitted pulse has been issued.
#[async_trait]
pub trait Hal: Send + Sync {
    async fn init(&self) -> Result<(), HalError>;

    async fn deinit(&self) -> Result<(), HalError>;

    /// Consume a pulse stream to its end.
    async fn move_pulses(&self, generator: PulseGenerator) -> Result<(), HalError>;

    async fn join(&self);

    /// Drive the axes in `axes` onto their endstops. `false` if an endstop
    /// was never reached.
    async fn calibrate(&self, axes: AxisMask) -> bool;

    async fn disable_steppers(&self);

    async fn fan_control(&self, on: bool);

    /// Heater power in percent, 0..=100.
    async fn extruder_heater_control(&self, percent: f64);

    async fn bed_heater_control(&self, percent: f64);

    async fn extruder_temperature(&self) -> Result<f64, HalError>;

    async fn bed_temperature(&self) -> Result<f64, HalError>;

    async fn watchdog_feed(&self);

    async fn heater_control(&self, heater: HeaterId, percent: f64) {
        match heater {
            HeaterId::Extruder => self.extruder_heater_control(percent).await,
            HeaterId::Bed => self.bed_heater_control(percent).await,
        }
    }

    async fn temperature(&self, heater: HeaterId) -> Result<f64, HalError> {
        match heater {
            HeaterId::Extruder => self.extruder_temperature().await,
            HeaterId::Bed => self.bed_temperature().await,
        }
    }
}
