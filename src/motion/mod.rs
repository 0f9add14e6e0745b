// src/motion/mod.rs - Pulse generation for linear and circular moves
pub mod circular;
pub mod kinematics;
pub mod linear;
pub mod pulses;

pub use circular::{ArcDirection, CircularInterpolator, Plane};
pub use kinematics::{CartesianKinematics, Kinematics, KinematicsError, TriArmKinematics};
pub use linear::LinearInterpolator;
pub use pulses::{MovementParameters, PulseEvent, PulseGenerator, SECONDS_IN_MINUTE};

use std::sync::Arc;
use thiserror::Error;

use crate::config::Config;
use crate::coordinates::{AXIS_COUNT, Axis};

#[derive(Debug, Error)]
pub enum MotionError {
    #[error(transparent)]
    Kinematics(#[from] KinematicsError),
    #[error("radius is not specified")]
    ZeroRadius,
    #[error("circle end point is off the arc: start radius {start:.4}, end radius {end:.4}")]
    ArcEndPoint { start: f64, end: f64 },
    #[error("radius {radius} is too small for a chord of {chord:.4}")]
    RadiusTooSmall { radius: f64, chord: f64 },
}

/// Per axis stepper table plus the machine wide motion switches, resolved
/// once from [`Config`].
#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub steps_per_mm: [f64; AXIS_COUNT],
    /// mm/min
    pub max_velocity: [f64; AXIS_COUNT],
    pub inverted: [bool; AXIS_COUNT],
    /// mm/s^2
    pub max_acceleration: f64,
    pub auto_velocity_adjustment: bool,
    pub couple_secondary_extrusion: bool,
    pub kinematics: Arc<dyn Kinematics>,
}

impl MotionSettings {
    pub fn from_config(config: &Config) -> Self {
        let steppers = Axis::ALL.map(|axis| config.stepper(axis));
        Self {
            steps_per_mm: steppers.each_ref().map(|s| s.steps_per_mm),
            max_velocity: steppers.each_ref().map(|s| s.max_velocity),
            inverted: steppers.each_ref().map(|s| s.inverted),
            max_acceleration: config.machine.max_acceleration,
            auto_velocity_adjustment: config.machine.auto_velocity_adjustment,
            couple_secondary_extrusion: config.machine.couple_secondary_extrusion,
            kinematics: kinematics::create_kinematics(&config.kinematics),
        }
    }

    pub fn steps_per_mm_of(&self, axis: Axis) -> f64 {
        self.steps_per_mm[axis.index()]
    }

    /// mm/min
    pub fn max_velocity_of(&self, axis: Axis) -> f64 {
        self.max_velocity[axis.index()]
    }

    /// Distance of one step on every axis. Kept as raw `f64`, ten digit
    /// normalization would move the grid.
    pub fn step_sizes(&self) -> [f64; AXIS_COUNT] {
        self.steps_per_mm.map(|steps| 1.0 / steps)
    }
}
