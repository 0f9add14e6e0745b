//! # octocnc
//!
//! Motion control core of an eight axis fabrication machine: three
//! Cartesian axes driven through a three arm head, two extruders, a rotary
//! nozzle selector and a tilting, rotating heated bed.
//!
//! Lines of G-code are parsed by [`gcode`], interpreted by
//! [`machine::Machine`] and turned into timed step pulses by
//! [`motion::PulseGenerator`], which a [`hardware::Hal`] consumes.

// src/lib.rs - Library root
pub mod config;
pub mod coordinates;
pub mod gcode;
pub mod hardware;
pub mod machine;
pub mod motion;

use thiserror::Error;

/// Error of a single processed line. Parse errors and command errors stay
/// apart.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    GCode(#[from] gcode::GCodeError),
    #[error("{0}")]
    Machine(#[from] machine::MachineError),
}

pub use config::{Config, load_config};
pub use coordinates::{Axis, AxisMask, Coordinates};
pub use gcode::GCode;
pub use machine::Machine;
pub use motion::{PulseEvent, PulseGenerator};
