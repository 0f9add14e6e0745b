//! # Machine Configuration
//!
//! All tunables of the eight axis machine live in one TOML file. Every
//! section and every field is optional; omitted values fall back to the
//! stock machine.
//!
//! ## Example
//!
//! ```toml
//! [machine]
//! max_acceleration = 3000.0
//! auto_velocity_adjustment = false
//!
//! [kinematics]
//! type = "cartesian"
//!
//! [steppers.x]
//! steps_per_mm = 80.0
//! max_velocity = 9000.0
//! max_position = 150.0
//!
//! [extruder]
//! max_temp = 260.0
//! pid = { p = 0.06, i = 0.002, d = 0.2 }
//! ```
//!
//! Axes missing from `[steppers]` keep their stock settings, see
//! [`default_stepper`].

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::coordinates::{AXIS_COUNT, Axis};
use crate::hardware::HeaterId;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for motion, kinematics, homing, steppers and heaters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub machine: MachineConfig,
    #[serde(default)]
    pub kinematics: KinematicsConfig,
    #[serde(default)]
    pub homing: HomingConfig,
    #[serde(default = "default_steppers")]
    pub steppers: HashMap<String, StepperConfig>,
    #[serde(default)]
    pub extruder: ExtruderConfig,
    #[serde(default)]
    pub heater_bed: HeaterBedConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            machine: MachineConfig::default(),
            kinematics: KinematicsConfig::default(),
            homing: HomingConfig::default(),
            steppers: default_steppers(),
            extruder: ExtruderConfig::default(),
            heater_bed: HeaterBedConfig::default(),
            thermal: ThermalConfig::default(),
        }
    }
}

/// Machine wide motion limits and behaviour switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MachineConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// mm/s^2, shared by every axis.
    #[serde(default = "default_max_acceleration")]
    pub max_acceleration: f64,
    /// mm/min, slowest feed rate accepted.
    #[serde(default = "default_min_velocity")]
    pub min_velocity: f64,
    #[serde(default = "default_true")]
    pub auto_velocity_adjustment: bool,
    #[serde(default = "default_true")]
    pub auto_fan_on: bool,
    /// Keep the head speed within the secondary extruder's limit.
    #[serde(default = "default_true")]
    pub couple_secondary_extrusion: bool,
    /// 0 disables the watchdog feeder.
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_acceleration: default_max_acceleration(),
            min_velocity: default_min_velocity(),
            auto_velocity_adjustment: true,
            auto_fan_on: true,
            couple_secondary_extrusion: true,
            watchdog_interval_ms: default_watchdog_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum KinematicsType {
    /// Plane axes drive the tool directly.
    Cartesian,
    /// Three pivoted arms on vertical carriages.
    #[default]
    TriArm,
}

/// Geometry of the three arm head. Distances in mm.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KinematicsConfig {
    #[serde(default)]
    pub r#type: KinematicsType,
    #[serde(default = "default_bed_radius")]
    pub bed_radius: f64,
    #[serde(default = "default_pivot_height")]
    pub pivot_height: f64,
    #[serde(default = "default_arm_length")]
    pub arm_length: f64,
    #[serde(default = "default_pivot_tool_distance")]
    pub pivot_tool_distance: f64,
    #[serde(default)]
    pub pivot_nozzle_distance: f64,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            r#type: KinematicsType::TriArm,
            bed_radius: default_bed_radius(),
            pivot_height: default_pivot_height(),
            arm_length: default_arm_length(),
            pivot_tool_distance: default_pivot_tool_distance(),
            pivot_nozzle_distance: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HomingConfig {
    /// mm/min cap for the Cartesian retreat.
    #[serde(default = "default_homing_velocity")]
    pub max_velocity: f64,
    /// Advance the secondary extruder by the retreat distance.
    #[serde(default = "default_true")]
    pub secondary_extrusion: bool,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self {
            max_velocity: default_homing_velocity(),
            secondary_extrusion: true,
        }
    }
}

/// Stepper motor configuration for one axis.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepperConfig {
    pub steps_per_mm: f64,
    /// mm/min
    pub max_velocity: f64,
    #[serde(default)]
    pub inverted: bool,
    /// Upper end of travel. `None` for axes without an endstop.
    #[serde(default)]
    pub max_position: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct PidCoefficients {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// Extruder heater configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtruderConfig {
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    #[serde(default = "default_extruder_max_temp")]
    pub max_temp: f64,
    #[serde(default = "default_extruder_pid")]
    pub pid: PidCoefficients,
}

impl Default for ExtruderConfig {
    fn default() -> Self {
        Self {
            min_temp: default_min_temp(),
            max_temp: default_extruder_max_temp(),
            pid: default_extruder_pid(),
        }
    }
}

/// Heated bed configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HeaterBedConfig {
    #[serde(default = "default_min_temp")]
    pub min_temp: f64,
    #[serde(default = "default_bed_max_temp")]
    pub max_temp: f64,
    #[serde(default = "default_bed_pid")]
    pub pid: PidCoefficients,
}

impl Default for HeaterBedConfig {
    fn default() -> Self {
        Self {
            min_temp: default_min_temp(),
            max_temp: default_bed_max_temp(),
            pid: default_bed_pid(),
        }
    }
}

/// Heater control loop timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThermalConfig {
    #[serde(default = "default_loop_interval_ms")]
    pub loop_interval_ms: u64,
    /// Seconds the temperature must stay in band before it counts as settled.
    #[serde(default = "default_fix_time_s")]
    pub fix_time_s: f64,
    /// Band width as a fraction of the target.
    #[serde(default = "default_fix_accuracy")]
    pub fix_accuracy: f64,
    #[serde(default = "default_sensor_timeout_s")]
    pub sensor_timeout_s: f64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: default_loop_interval_ms(),
            fix_time_s: default_fix_time_s(),
            fix_accuracy: default_fix_accuracy(),
            sensor_timeout_s: default_sensor_timeout_s(),
        }
    }
}

/// Temperature range and PID gains of one heater.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterSettings {
    pub min_temp: f64,
    pub max_temp: f64,
    pub pid: PidCoefficients,
}

impl Config {
    /// Stepper settings for an axis, falling back to the stock values.
    pub fn stepper(&self, axis: Axis) -> StepperConfig {
        self.steppers
            .get(axis.name())
            .cloned()
            .unwrap_or_else(|| default_stepper(axis))
    }

    pub fn heater(&self, id: HeaterId) -> HeaterSettings {
        match id {
            HeaterId::Extruder => HeaterSettings {
                min_temp: self.extruder.min_temp,
                max_temp: self.extruder.max_temp,
                pid: self.extruder.pid,
            },
            HeaterId::Bed => HeaterSettings {
                min_temp: self.heater_bed.min_temp,
                max_temp: self.heater_bed.max_temp,
                pid: self.heater_bed.pid,
            },
        }
    }

    /// Reject values the motion and heater code cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, stepper) in &self.steppers {
            if Axis::from_name(name).is_none() {
                return Err(ConfigError::Invalid(format!("Unknown stepper axis '{}'", name)));
            }
            if stepper.steps_per_mm <= 0.0 {
                return Err(ConfigError::Invalid(format!("steps_per_mm for axis '{}' must be > 0", name)));
            }
            if stepper.max_velocity <= 0.0 {
                return Err(ConfigError::Invalid(format!("max_velocity for axis '{}' must be > 0", name)));
            }
            if stepper.max_position.is_some_and(|max| max < 0.0) {
                return Err(ConfigError::Invalid(format!("max_position for axis '{}' must be >= 0", name)));
            }
        }
        if self.machine.max_acceleration <= 0.0 {
            return Err(ConfigError::Invalid("max_acceleration must be > 0".to_string()));
        }
        if self.machine.min_velocity <= 0.0 {
            return Err(ConfigError::Invalid("min_velocity must be > 0".to_string()));
        }
        if self.homing.max_velocity <= 0.0 {
            return Err(ConfigError::Invalid("homing max_velocity must be > 0".to_string()));
        }
        if self.kinematics.arm_length <= 0.0 {
            return Err(ConfigError::Invalid("arm_length must be > 0".to_string()));
        }
        for id in [HeaterId::Extruder, HeaterId::Bed] {
            let heater = self.heater(id);
            if heater.min_temp >= heater.max_temp {
                return Err(ConfigError::Invalid(format!("{} min_temp must be below max_temp", id)));
            }
        }
        if self.thermal.loop_interval_ms == 0 {
            return Err(ConfigError::Invalid("thermal loop_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Stock stepper settings of the eight axis machine.
pub fn default_stepper(axis: Axis) -> StepperConfig {
    let (steps_per_mm, max_velocity, inverted, max_position) = match axis {
        Axis::X | Axis::Y => (100.0, 6000.0, false, Some(180.0)),
        Axis::Z => (100.0, 6000.0, false, Some(455.0)),
        Axis::E => (150.0, 1500.0, true, None),
        Axis::Q => (100.0, 3000.0, false, None),
        Axis::N => (80.0, 600.0, false, Some(360.0)),
        Axis::A => (444.0, 800.0, false, Some(90.0)),
        Axis::B => (356.0, 800.0, false, None),
    };
    StepperConfig {
        steps_per_mm,
        max_velocity,
        inverted,
        max_position,
    }
}

fn default_steppers() -> HashMap<String, StepperConfig> {
    let mut steppers = HashMap::with_capacity(AXIS_COUNT);
    for axis in Axis::ALL {
        steppers.insert(axis.name().to_string(), default_stepper(axis));
    }
    steppers
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_acceleration() -> f64 { 3000.0 }
fn default_min_velocity() -> f64 { 1.0 }
fn default_watchdog_interval_ms() -> u64 { 1000 }
fn default_bed_radius() -> f64 { 263.0 }
fn default_pivot_height() -> f64 { 22.0 }
fn default_arm_length() -> f64 { 400.0 }
fn default_pivot_tool_distance() -> f64 { 40.0 }
fn default_homing_velocity() -> f64 { 800.0 }
fn default_min_temp() -> f64 { 40.0 }
fn default_extruder_max_temp() -> f64 { 250.0 }
fn default_bed_max_temp() -> f64 { 100.0 }
fn default_extruder_pid() -> PidCoefficients {
    PidCoefficients { p: 0.059161177519, i: 0.00206217171374, d: 0.206217171374 }
}
fn default_bed_pid() -> PidCoefficients {
    PidCoefficients { p: 0.226740848076, i: 0.00323956215053, d: 0.323956215053 }
}
fn default_loop_interval_ms() -> u64 { 500 }
fn default_fix_time_s() -> f64 { 2.5 }
fn default_fix_accuracy() -> f64 { 0.01 }
fn default_sensor_timeout_s() -> f64 { 1.0 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
