// src/hardware/virtual_hal.rs - Software stand-in for the driver board
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Hal, HalError, HeaterId};
use crate::config::Config;
use crate::coordinates::{AXIS_COUNT, AxisMask, Coordinates};
use crate::motion::{PulseEvent, PulseGenerator};

/// What a consumed pulse stream amounted to.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveReport {
    /// Signed steps per axis in machine direction.
    pub steps: [i64; AXIS_COUNT],
    pub pulse_events: u64,
    pub direction_changes: u64,
    /// Seconds until the last pulse.
    pub duration: f64,
    pub delta: Coordinates,
}

#[derive(Debug)]
struct VirtualState {
    initialized: bool,
    fan: bool,
    steppers_enabled: bool,
    extruder_power: f64,
    bed_power: f64,
    extruder_temperature: f64,
    bed_temperature: f64,
    extruder_sensor_ok: bool,
    bed_sensor_ok: bool,
    calibrate_result: bool,
    calibrations: Vec<AxisMask>,
    moves: Vec<MoveReport>,
    watchdog_feeds: u64,
}

/// HAL without hardware behind it. Every pulse stream is consumed and
/// checked for consistency; temperatures read just below each heater's
/// maximum so heat up commands settle at once.
#[derive(Debug)]
pub struct VirtualHal {
    state: Mutex<VirtualState>,
}

impl VirtualHal {
    pub fn from_config(config: &Config) -> Self {
        Self {
            state: Mutex::new(VirtualState {
                initialized: false,
                fan: false,
                steppers_enabled: false,
                extruder_power: 0.0,
                bed_power: 0.0,
                extruder_temperature: config.heater(HeaterId::Extruder).max_temp * 0.999,
                bed_temperature: config.heater(HeaterId::Bed).max_temp * 0.999,
                extruder_sensor_ok: true,
                bed_sensor_ok: true,
                calibrate_result: true,
                calibrations: Vec::new(),
                moves: Vec::new(),
                watchdog_feeds: 0,
            }),
        }
    }

    pub async fn set_temperature(&self, heater: HeaterId, value: f64) {
        let mut state = self.state.lock().await;
        match heater {
            HeaterId::Extruder => state.extruder_temperature = value,
            HeaterId::Bed => state.bed_temperature = value,
        }
    }

    /// Make reads of one sensor fail (or work again).
    pub async fn set_sensor_failure(&self, heater: HeaterId, failed: bool) {
        let mut state = self.state.lock().await;
        match heater {
            HeaterId::Extruder => state.extruder_sensor_ok = !failed,
            HeaterId::Bed => state.bed_sensor_ok = !failed,
        }
    }

    pub async fn set_calibrate_result(&self, result: bool) {
        self.state.lock().await.calibrate_result = result;
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }

    pub async fn fan(&self) -> bool {
        self.state.lock().await.fan
    }

    pub async fn steppers_enabled(&self) -> bool {
        self.state.lock().await.steppers_enabled
    }

    pub async fn heater_power(&self, heater: HeaterId) -> f64 {
        let state = self.state.lock().await;
        match heater {
            HeaterId::Extruder => state.extruder_power,
            HeaterId::Bed => state.bed_power,
        }
    }

    pub async fn moves(&self) -> Vec<MoveReport> {
        self.state.lock().await.moves.clone()
    }

    pub async fn calibrations(&self) -> Vec<AxisMask> {
        self.state.lock().await.calibrations.clone()
    }

    pub async fn watchdog_feeds(&self) -> u64 {
        self.state.lock().await.watchdog_feeds
    }
}

/// Walks a pulse stream and checks the invariants a driver relies on.
pub fn consume(generator: PulseGenerator) -> Result<MoveReport, HalError> {
    let expected = generator.expected_steps();
    let inverted = generator.inverted();
    let delta = generator.delta();
    let limit = (generator.total_time() * 1e6).ceil() as u64 + 1;

    let mut direction: Option<[i8; AXIS_COUNT]> = None;
    let mut last: [Option<u64>; AXIS_COUNT] = [None; AXIS_COUNT];
    let mut steps = [0i64; AXIS_COUNT];
    let mut pulse_events = 0;
    let mut direction_changes = 0;
    let mut duration = 0;

    for event in generator {
        match event {
            PulseEvent::Direction(signal) => {
                if direction.is_some() {
                    direction_changes += 1;
                }
                direction = Some(signal);
            }
            PulseEvent::Pulses(pulses) => {
                let Some(signal) = direction else {
                    return Err(HalError::MalformedPulses("pulses before direction".to_string()));
                };
                let mut instant = None;
                for (i, pulse) in pulses.iter().enumerate() {
                    let Some(timestamp) = *pulse else {
                        continue;
                    };
                    if instant.is_some_and(|t| t != timestamp) {
                        return Err(HalError::MalformedPulses(format!(
                            "axes fire at different instants in one event ({:?})",
                            pulses
                        )));
                    }
                    instant = Some(timestamp);
                    if last[i].is_some_and(|previous| previous >= timestamp) {
                        return Err(HalError::MalformedPulses(format!(
                            "axis {} pulse at {}us does not follow {:?}",
                            i, timestamp, last[i]
                        )));
                    }
                    if timestamp > limit {
                        return Err(HalError::MalformedPulses(format!(
                            "pulse at {}us after the move ends at {}us",
                            timestamp, limit
                        )));
                    }
                    last[i] = Some(timestamp);
                    let machine_sign = if inverted[i] { -signal[i] } else { signal[i] };
                    steps[i] += machine_sign as i64;
                }
                let Some(instant) = instant else {
                    return Err(HalError::MalformedPulses("empty pulse event".to_string()));
                };
                duration = duration.max(instant);
                pulse_events += 1;
            }
        }
    }

    if direction.is_none() {
        return Err(HalError::MalformedPulses("no direction event".to_string()));
    }
    if steps != expected {
        return Err(HalError::MalformedPulses(format!(
            "issued steps {:?} differ from planned {:?}",
            steps, expected
        )));
    }
    Ok(MoveReport {
        steps,
        pulse_events,
        direction_changes,
        duration: duration as f64 / 1e6,
        delta,
    })
}

#[async_trait]
impl Hal for VirtualHal {
    async fn init(&self) -> Result<(), HalError> {
        let mut state = self.state.lock().await;
        state.initialized = true;
        state.steppers_enabled = true;
        tracing::info!("Virtual hardware initialized");
        Ok(())
    }

    async fn deinit(&self) -> Result<(), HalError> {
        let mut state = self.state.lock().await;
        state.initialized = false;
        state.steppers_enabled = false;
        state.extruder_power = 0.0;
        state.bed_power = 0.0;
        tracing::info!("Virtual hardware released");
        Ok(())
    }

    async fn move_pulses(&self, generator: PulseGenerator) -> Result<(), HalError> {
        let report = consume(generator)?;
        tracing::debug!(
            "Virtual move: {} pulse events, {} direction changes, {:.4}s",
            report.pulse_events,
            report.direction_changes,
            report.duration
        );
        let mut state = self.state.lock().await;
        state.steppers_enabled = true;
        state.moves.push(report);
        Ok(())
    }

    async fn join(&self) {}

    async fn calibrate(&self, axes: AxisMask) -> bool {
        let mut state = self.state.lock().await;
        state.calibrations.push(axes);
        state.calibrate_result
    }

    async fn disable_steppers(&self) {
        self.state.lock().await.steppers_enabled = false;
    }

    async fn fan_control(&self, on: bool) {
        self.state.lock().await.fan = on;
    }

    async fn extruder_heater_control(&self, percent: f64) {
        self.state.lock().await.extruder_power = percent;
    }

    async fn bed_heater_control(&self, percent: f64) {
        self.state.lock().await.bed_power = percent;
    }

    async fn extruder_temperature(&self) -> Result<f64, HalError> {
        let state = self.state.lock().await;
        if state.extruder_sensor_ok {
            Ok(state.extruder_temperature)
        } else {
            Err(HalError::Sensor("extruder thermistor not responding".to_string()))
        }
    }

    async fn bed_temperature(&self) -> Result<f64, HalError> {
        let state = self.state.lock().await;
        if state.bed_sensor_ok {
            Ok(state.bed_temperature)
        } else {
            Err(HalError::Sensor("bed thermistor not responding".to_string()))
        }
    }

    async fn watchdog_feed(&self) {
        self.state.lock().await.watchdog_feeds += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KinematicsType;
    use crate::coordinates::Axis;
    use crate::motion::MotionSettings;

    fn cartesian() -> (Config, MotionSettings) {
        let mut config = Config::default();
        config.kinematics.r#type = KinematicsType::Cartesian;
        let settings = MotionSettings::from_config(&config);
        (config, settings)
    }

    #[test]
    fn test_consume_linear_move() {
        let (_, settings) = cartesian();
        let delta = Coordinates::zero().with(Axis::X, 1.0).with(Axis::E, -0.5);
        let generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 1200.0, &settings).unwrap();
        let report = consume(generator).unwrap();
        assert_eq!(report.steps[Axis::X.index()], 100);
        assert_eq!(report.steps[Axis::E.index()], -75);
        assert_eq!(report.direction_changes, 0);
        assert!(report.duration > 0.0);
    }

    #[tokio::test]
    async fn test_virtual_sensors_and_switches() {
        let (config, _) = cartesian();
        let hal = VirtualHal::from_config(&config);
        hal.init().await.unwrap();
        assert!(hal.is_initialized().await);
        assert!((hal.extruder_temperature().await.unwrap() - 249.75).abs() < 1e-9);
        hal.set_sensor_failure(HeaterId::Bed, true).await;
        assert!(matches!(hal.bed_temperature().await, Err(HalError::Sensor(_))));
        hal.heater_control(HeaterId::Extruder, 42.0).await;
        assert_eq!(hal.heater_power(HeaterId::Extruder).await, 42.0);
        hal.fan_control(true).await;
        assert!(hal.fan().await);
        hal.watchdog_feed().await;
        assert_eq!(hal.watchdog_feeds().await, 1);
        hal.deinit().await.unwrap();
        assert_eq!(hal.heater_power(HeaterId::Extruder).await, 0.0);
    }
}
