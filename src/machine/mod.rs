// src/machine/mod.rs - G-code interpreter and machine state
mod homing;

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;

use crate::config::{Config, ConfigError, KinematicsType};
use crate::coordinates::{Axis, Coordinates};
use crate::gcode::{self, GCode};
use crate::hardware::temperature::HalHeaterIo;
use crate::hardware::{Hal, HalError, HardwareWatchdog, Heater, HeaterError, HeaterId};
use crate::motion::circular::center_from_radius;
use crate::motion::{ArcDirection, MotionError, MotionSettings, Plane, PulseGenerator};

/// Inches to millimetres.
const INCH: f64 = 25.4;

/// Relative slack on the per axis speed limit.
const VELOCITY_TOLERANCE: f64 = 1e-9;

/// Semantically invalid command. The machine state is left as it was.
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("feed speed too low: {0}")]
    FeedTooLow(f64),
    #[error("out of effective area: {0}")]
    OutOfWorkingArea(Coordinates),
    #[error("out of maximum speed: axis {axis} at {velocity:.3} mm/min, limit {limit}")]
    OutOfMaximumSpeed { axis: Axis, velocity: f64, limit: f64 },
    #[error("P is not specified")]
    DelayNotSpecified,
    #[error("bad delay")]
    BadDelay(f64),
    #[error("temperature is not specified")]
    TemperatureNotSpecified,
    #[error("bad temperature")]
    BadTemperature(f64),
    #[error("can not measure temperature")]
    SensorFailure(#[source] HalError),
    #[error("failed to calibrate")]
    CalibrationFailed,
    #[error("Not supported, use G90/G91")]
    ExtruderModeMismatch,
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Heater(#[from] HeaterError),
    #[error("hardware error: {0}")]
    Hal(#[from] HalError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Called on `M111`.
pub type DebugHook = Box<dyn Fn() + Send + Sync>;

/// Owns all machine state and turns G-code into HAL calls, one command at a
/// time.
pub struct Machine {
    config: Config,
    settings: MotionSettings,
    hal: Arc<dyn Hal>,
    position: Coordinates,
    local: Coordinates,
    /// mm/min
    velocity: f64,
    unit_scale: f64,
    absolute: bool,
    plane: Plane,
    fan_state: bool,
    heaters: HashMap<HeaterId, Heater>,
    watchdog: Option<HardwareWatchdog>,
    debug_hook: Option<DebugHook>,
    envelope: (Coordinates, Coordinates),
    pivot_offset: f64,
}

impl Machine {
    /// Validates `config`, initializes the HAL and starts feeding the
    /// watchdog. The tool is assumed to start at the machine origin.
    pub async fn new(config: Config, hal: Arc<dyn Hal>) -> Result<Self, MachineError> {
        config.validate()?;
        let settings = MotionSettings::from_config(&config);
        let lower = Coordinates::from_fn(|axis| {
            if config.stepper(axis).max_position.is_some() { 0.0 } else { f64::NEG_INFINITY }
        });
        let upper = Coordinates::from_fn(|axis| config.stepper(axis).max_position.unwrap_or(f64::INFINITY));
        let pivot_offset = config.kinematics.pivot_tool_distance + config.kinematics.pivot_nozzle_distance;

        hal.init().await?;
        let watchdog = match config.machine.watchdog_interval_ms {
            0 => None,
            ms => Some(HardwareWatchdog::start(hal.clone(), Duration::from_millis(ms))),
        };

        let mut machine = Self {
            settings,
            hal,
            position: Coordinates::zero(),
            local: Coordinates::zero(),
            velocity: 0.0,
            unit_scale: 1.0,
            absolute: true,
            plane: Plane::XY,
            fan_state: false,
            heaters: HashMap::new(),
            watchdog,
            debug_hook: None,
            envelope: (lower, upper),
            pivot_offset,
            config,
        };
        machine.reset();
        tracing::info!(
            "Machine ready ({:?} kinematics)",
            machine.settings.kinematics.kind()
        );
        Ok(machine)
    }

    /// Stops heaters and the fan, then releases the HAL.
    pub async fn release(mut self) -> Result<(), MachineError> {
        for (_, heater) in self.heaters.drain() {
            heater.stop().await;
        }
        self.set_fan(false).await;
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.stop().await;
        }
        self.hal.deinit().await?;
        Ok(())
    }

    /// Restores everything G-code can configure. The position is kept.
    pub fn reset(&mut self) {
        self.velocity = self.settings.max_velocity.iter().copied().fold(f64::INFINITY, f64::min);
        self.local = Coordinates::zero();
        self.unit_scale = 1.0;
        self.absolute = true;
        self.plane = Plane::XY;
    }

    pub fn set_debug_hook(&mut self, hook: DebugHook) {
        self.debug_hook = Some(hook);
    }

    /// Machine position once all queued motion is done.
    pub async fn position(&self) -> Coordinates {
        self.hal.join().await;
        self.position
    }

    pub fn fan_state(&self) -> bool {
        self.fan_state
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn unit_scale(&self) -> f64 {
        self.unit_scale
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    pub fn frame_offset(&self) -> Coordinates {
        self.local
    }

    /// mm/min
    pub fn feed_rate(&self) -> f64 {
        self.velocity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 0 when the heater is off.
    pub fn extruder_target_temperature(&self) -> f64 {
        self.target_temperature(HeaterId::Extruder)
    }

    pub fn bed_target_temperature(&self) -> f64 {
        self.target_temperature(HeaterId::Bed)
    }

    fn target_temperature(&self, id: HeaterId) -> f64 {
        self.heaters.get(&id).map_or(0.0, Heater::target_temperature)
    }

    /// Parses and runs one line. Blank and comment lines yield `Ok(None)`.
    pub async fn process_line(&mut self, line: &str) -> Result<Option<String>, crate::Error> {
        match gcode::parse_line(line)? {
            Some(gcode) => Ok(self.do_command(&gcode).await?),
            None => Ok(None),
        }
    }

    /// Runs one command and returns its answer, if it has one.
    pub async fn do_command(&mut self, gcode: &GCode) -> Result<Option<String>, MachineError> {
        tracing::debug!("Got command {}", gcode);
        let command = match gcode.command() {
            Some(command) => Some(command),
            None if gcode.has_coordinates() => Some("G1".to_string()),
            None => None,
        };

        let delta = if self.absolute {
            let target = gcode.coordinates(&(self.position - self.local), self.unit_scale) + self.local;
            target - self.position
        } else {
            gcode.coordinates(&Coordinates::zero(), self.unit_scale)
        };
        let velocity = gcode.get('F').unwrap_or(self.velocity);
        if velocity < self.config.machine.min_velocity {
            return Err(MachineError::FeedTooLow(velocity));
        }

        let mut answer = None;
        match command.as_deref() {
            Some("G0") => {
                let velocity = self.rapid_velocity(gcode);
                self.move_linear(delta, velocity).await?;
            }
            Some("G1") => self.move_linear(delta, velocity).await?,
            Some("G2") => self.move_circular(gcode, delta, ArcDirection::Clockwise, velocity).await?,
            Some("G3") => self.move_circular(gcode, delta, ArcDirection::CounterClockwise, velocity).await?,
            Some("G4") => {
                let pause = gcode.get('P').ok_or(MachineError::DelayNotSpecified)?;
                if pause < 0.0 {
                    return Err(MachineError::BadDelay(pause));
                }
                let pause = Duration::try_from_secs_f64(pause).map_err(|_| MachineError::BadDelay(pause))?;
                self.hal.join().await;
                tokio::time::sleep(pause).await;
            }
            Some("G17") => self.plane = Plane::XY,
            Some("G18") => self.plane = Plane::ZX,
            Some("G19") => self.plane = Plane::YZ,
            Some("G20") => self.unit_scale = INCH,
            Some("G21") => self.unit_scale = 1.0,
            Some("G28") => self.home(gcode).await?,
            Some("G53") => self.local = Coordinates::zero(),
            Some("G90") => self.absolute = true,
            Some("G91") => self.absolute = false,
            Some("G92") => {
                self.local = if gcode.has_coordinates() {
                    self.position - gcode.coordinates(&(self.position - self.local), self.unit_scale)
                } else {
                    self.position
                };
            }
            Some("M2") | Some("M30") => self.reset(),
            Some("M84") => self.hal.disable_steppers().await,
            Some(heat @ ("M104" | "M109" | "M140" | "M190")) => {
                let heater = if matches!(heat, "M104" | "M109") { HeaterId::Extruder } else { HeaterId::Bed };
                let wait = matches!(heat, "M109" | "M190");
                let temperature = gcode.get('S').ok_or(MachineError::TemperatureNotSpecified)?;
                let limits = self.config.heater(heater);
                if temperature != 0.0 && (temperature < limits.min_temp || temperature > limits.max_temp) {
                    return Err(MachineError::BadTemperature(temperature));
                }
                self.heat(heater, temperature, wait).await?;
            }
            Some("M105") => answer = Some(self.temperature_report().await?),
            Some("M106") => {
                let on = gcode.get('S').unwrap_or(1.0) != 0.0;
                self.set_fan(on).await;
            }
            Some("M107") => self.set_fan(false).await,
            Some("M111") => match &self.debug_hook {
                Some(hook) => hook(),
                None => tracing::info!("Debug output requested, no hook installed"),
            },
            Some("M114") => answer = Some(self.position().await.to_string()),
            Some("M82") if !self.absolute => return Err(MachineError::ExtruderModeMismatch),
            Some("M83") if self.absolute => return Err(MachineError::ExtruderModeMismatch),
            Some("M82") | Some("M83") => {}
            Some(other) => return Err(MachineError::UnknownCommand(other.to_string())),
            // a bare feed rate
            None => {}
        }

        self.velocity = velocity;
        tracing::debug!("Position {}", self.position);
        Ok(answer)
    }

    /// `G0` speed: the slowest limit among the axes named in the line.
    fn rapid_velocity(&self, gcode: &GCode) -> f64 {
        let named: Vec<Axis> = Axis::ALL
            .into_iter()
            .filter(|axis| gcode.has(axis.letter()))
            .collect();
        if named.is_empty() {
            return self.config.machine.min_velocity;
        }
        let mut limit = named
            .iter()
            .map(|axis| self.settings.max_velocity_of(*axis))
            .fold(f64::INFINITY, f64::min);
        if self.settings.couple_secondary_extrusion && named.iter().any(|axis| axis.is_cartesian()) {
            limit = limit.min(self.settings.max_velocity_of(Axis::Q));
        }
        limit
    }

    fn check_position(&self, point: &Coordinates) -> Result<(), MachineError> {
        let (lower, upper) = &self.envelope;
        if point.is_in_bounding_volume(lower, upper, self.pivot_offset) {
            Ok(())
        } else {
            Err(MachineError::OutOfWorkingArea(*point))
        }
    }

    fn check_velocity(&self, generator: &PulseGenerator) -> Result<(), MachineError> {
        let peak = generator.max_velocity();
        for axis in Axis::ALL {
            let limit = self.settings.max_velocity_of(axis);
            if peak[axis] > limit * (1.0 + VELOCITY_TOLERANCE) {
                return Err(MachineError::OutOfMaximumSpeed {
                    axis,
                    velocity: peak[axis],
                    limit,
                });
            }
        }
        Ok(())
    }

    /// Straight move by `delta` at `velocity` mm/min. The delta snaps to the
    /// step grid first; nothing happens when it snaps to zero.
    pub(crate) async fn move_linear(&mut self, delta: Coordinates, velocity: f64) -> Result<(), MachineError> {
        let delta = delta.round_to_grid(&self.settings.step_sizes());
        if delta.is_zero() {
            return Ok(());
        }
        self.check_position(&(self.position + delta))?;

        tracing::info!("Moving linearly {}", delta);
        let generator = PulseGenerator::linear(&self.position, &delta, velocity, &self.settings)?;
        self.check_velocity(&generator)?;
        let moved = generator.delta();
        self.hal.move_pulses(generator).await?;
        self.position = self.position + moved;
        Ok(())
    }

    async fn move_circular(
        &mut self,
        gcode: &GCode,
        delta: Coordinates,
        direction: ArcDirection,
        velocity: f64,
    ) -> Result<(), MachineError> {
        if self.settings.kinematics.kind() != KinematicsType::Cartesian {
            return Err(MachineError::Unsupported(
                "circular interpolation needs cartesian kinematics".to_string(),
            ));
        }
        let delta = delta.round_to_grid(&self.settings.step_sizes());
        let (axis_a, axis_b, _) = self.plane.axes();
        let center = match gcode.get('R') {
            Some(radius) => {
                let (a, b) = center_from_radius(delta[axis_a], delta[axis_b], radius * self.unit_scale, direction)?;
                Coordinates::zero().with(axis_a, a).with(axis_b, b)
            }
            None => gcode.radius(&Coordinates::zero(), self.unit_scale),
        };

        let generator = PulseGenerator::circular(&delta, &center, self.plane, direction, velocity, &self.settings)?;
        for point in generator.waypoints(&self.position) {
            self.check_position(&point)?;
        }
        tracing::info!("Moving circularly {:?} in {} plane by {} around {}", direction, self.plane, delta, center);
        self.check_velocity(&generator)?;
        let moved = generator.delta();
        self.hal.move_pulses(generator).await?;
        self.position = self.position + moved;
        Ok(())
    }

    async fn set_fan(&mut self, on: bool) {
        self.hal.fan_control(on).await;
        self.fan_state = on;
    }

    async fn heat(&mut self, heater: HeaterId, temperature: f64, wait: bool) -> Result<(), MachineError> {
        self.hal
            .temperature(heater)
            .await
            .map_err(MachineError::SensorFailure)?;
        if let Some(previous) = self.heaters.remove(&heater) {
            previous.stop().await;
        }
        if temperature == 0.0 {
            return Ok(());
        }
        let io = Arc::new(HalHeaterIo::new(self.hal.clone(), heater));
        let settings = self.config.heater(heater);
        let started = Heater::start(heater, temperature, settings.pid, &self.config.thermal, io);
        if wait {
            if let Err(e) = started.wait().await {
                started.stop().await;
                return Err(e.into());
            }
        }
        if heater == HeaterId::Extruder && self.config.machine.auto_fan_on {
            self.set_fan(true).await;
        }
        self.heaters.insert(heater, started);
        Ok(())
    }

    async fn temperature_report(&self) -> Result<String, MachineError> {
        let extruder = self.hal.extruder_temperature().await;
        let bed = self.hal.bed_temperature().await;
        let show = |reading: &Result<f64, HalError>| match reading {
            Ok(value) => value.to_string(),
            Err(_) => "unknown".to_string(),
        };
        let answer = format!("E:{} B:{}", show(&extruder), show(&bed));
        match (extruder, bed) {
            (Err(e), Err(_)) => Err(MachineError::SensorFailure(e)),
            _ => Ok(answer),
        }
    }
}
