// src/hardware/temperature.rs - PID heater control loop
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};

use super::{Hal, HalError, HeaterId};
use crate::config::{PidCoefficients, ThermalConfig};

/// Seconds between progress messages while waiting for a heater.
const WAIT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaterError {
    #[error("{0} heater lost its temperature sensor")]
    SensorLost(HeaterId),
    #[error("{0} heater stopped before reaching its target")]
    Stopped(HeaterId),
}

/// PID controller with output clamped to 0..=1.
#[derive(Debug, Clone)]
pub struct Pid {
    kp: f64,
    ki: f64,
    kd: f64,
    target: f64,
    integral: f64,
    previous_error: Option<f64>,
    previous_time: Option<Instant>,
    fix_accuracy: f64,
    fix_time: Duration,
    in_band_since: Option<Instant>,
}

impl Pid {
    pub fn new(coefficients: PidCoefficients, target: f64, fix_accuracy: f64, fix_time: Duration) -> Self {
        Self {
            kp: coefficients.p,
            ki: coefficients.i,
            kd: coefficients.d,
            target,
            integral: 0.0,
            previous_error: None,
            previous_time: None,
            fix_accuracy,
            fix_time,
            in_band_since: None,
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Feed one measurement, get the new power fraction.
    pub fn update(&mut self, current: f64, now: Instant) -> f64 {
        let error = self.target - current;
        let dt = self
            .previous_time
            .map_or(0.0, |previous| now.saturating_duration_since(previous).as_secs_f64());

        let derivative = match self.previous_error {
            Some(previous) if dt > 0.0 => (error - previous) / dt,
            _ => 0.0,
        };
        let integral = self.integral + error * dt;
        let output = self.kp * error + self.ki * integral + self.kd * derivative;
        // stop integrating while saturated in the direction of the error
        let saturated = (output > 1.0 && error > 0.0) || (output < 0.0 && error < 0.0);
        if !saturated {
            self.integral = integral;
        }

        if error.abs() < self.target * self.fix_accuracy {
            self.in_band_since.get_or_insert(now);
        } else {
            self.in_band_since = None;
        }

        self.previous_error = Some(error);
        self.previous_time = Some(now);
        output.clamp(0.0, 1.0)
    }

    /// Whether the temperature has stayed in band for the fix time.
    pub fn is_fixed(&self, now: Instant) -> bool {
        self.in_band_since
            .is_some_and(|since| now.saturating_duration_since(since) >= self.fix_time)
    }
}

/// Sensor and power output of one heater.
#[async_trait]
pub trait HeaterIo: Send + Sync {
    async fn measure(&self) -> Result<f64, HalError>;

    /// Power in percent.
    async fn control(&self, percent: f64);
}

/// Routes a heater's IO to the matching HAL calls.
pub struct HalHeaterIo {
    hal: Arc<dyn Hal>,
    heater: HeaterId,
}

impl HalHeaterIo {
    pub fn new(hal: Arc<dyn Hal>, heater: HeaterId) -> Self {
        Self { hal, heater }
    }
}

#[async_trait]
impl HeaterIo for HalHeaterIo {
    async fn measure(&self) -> Result<f64, HalError> {
        self.hal.temperature(self.heater).await
    }

    async fn control(&self, percent: f64) {
        self.hal.heater_control(self.heater, percent).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HeaterState {
    Heating,
    Fixed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterStatus {
    pub state: HeaterState,
    pub temperature: Option<f64>,
    /// percent
    pub power: f64,
}

/// A running heater control loop. Dropping the handle also ends the loop,
/// `stop` additionally waits until the power is off.
pub struct Heater {
    id: HeaterId,
    target: f64,
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<HeaterStatus>,
    task: JoinHandle<()>,
}

impl Heater {
    pub fn start(
        id: HeaterId,
        target: f64,
        coefficients: PidCoefficients,
        thermal: &ThermalConfig,
        io: Arc<dyn HeaterIo>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(HeaterStatus {
            state: HeaterState::Heating,
            temperature: None,
            power: 0.0,
        });
        let mut pid = Pid::new(
            coefficients,
            target,
            thermal.fix_accuracy,
            Duration::from_secs_f64(thermal.fix_time_s.max(0.0)),
        );
        let period = Duration::from_millis(thermal.loop_interval_ms.max(1));
        let sensor_timeout = Duration::from_secs_f64(thermal.sensor_timeout_s.max(0.0));
        tracing::info!("Starting {} heater, target {:.1}°C", id, target);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_reading = Instant::now();
            let mut failed = false;
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {
                        let now = Instant::now();
                        match io.measure().await {
                            Ok(temperature) => {
                                last_reading = now;
                                let power = pid.update(temperature, now) * 100.0;
                                io.control(power).await;
                                let state = if pid.is_fixed(now) { HeaterState::Fixed } else { HeaterState::Heating };
                                status_tx.send_replace(HeaterStatus { state, temperature: Some(temperature), power });
                            }
                            Err(e) => {
                                io.control(0.0).await;
                                if now.saturating_duration_since(last_reading) > sensor_timeout {
                                    tracing::error!("{} heater: sensor lost ({}), switching off", id, e);
                                    failed = true;
                                    break;
                                }
                                tracing::warn!("{} heater: failed to read temperature: {}", id, e);
                                status_tx.send_modify(|status| {
                                    status.temperature = None;
                                    status.power = 0.0;
                                });
                            }
                        }
                    }
                }
            }
            io.control(0.0).await;
            let state = if failed { HeaterState::Failed } else { HeaterState::Stopped };
            status_tx.send_modify(|status| {
                status.state = state;
                status.power = 0.0;
            });
        });

        Self {
            id,
            target,
            stop_tx,
            status_rx,
            task,
        }
    }

    pub fn id(&self) -> HeaterId {
        self.id
    }

    pub fn target_temperature(&self) -> f64 {
        self.target
    }

    pub fn status(&self) -> HeaterStatus {
        *self.status_rx.borrow()
    }

    /// Resolves once the temperature has settled at the target.
    pub async fn wait(&self) -> Result<(), HeaterError> {
        let mut status_rx = self.status_rx.clone();
        loop {
            let status = *status_rx.borrow_and_update();
            match status.state {
                HeaterState::Fixed => return Ok(()),
                HeaterState::Failed => return Err(HeaterError::SensorLost(self.id)),
                HeaterState::Stopped => return Err(HeaterError::Stopped(self.id)),
                HeaterState::Heating => {}
            }
            match tokio::time::timeout(WAIT_REPORT_INTERVAL, status_rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(HeaterError::Stopped(self.id)),
                Err(_) => match status.temperature {
                    Some(t) => tracing::info!("Heating {}: {:.1}°C of {:.1}°C", self.id, t, self.target),
                    None => tracing::info!("Heating {}: temperature unknown, target {:.1}°C", self.id, self.target),
                },
            }
        }
    }

    /// Ends the control loop and switches the heater off.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("{} heater task ended abnormally: {}", self.id, e);
        }
        tracing::info!("{} heater stopped", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeIo {
        temperature: Mutex<f64>,
        power: Mutex<Vec<f64>>,
        broken: AtomicBool,
    }

    impl FakeIo {
        fn new(temperature: f64) -> Arc<Self> {
            Arc::new(Self {
                temperature: Mutex::new(temperature),
                power: Mutex::new(Vec::new()),
                broken: AtomicBool::new(false),
            })
        }

        fn last_power(&self) -> Option<f64> {
            self.power.lock().unwrap().last().copied()
        }
    }

    #[async_trait]
    impl HeaterIo for FakeIo {
        async fn measure(&self) -> Result<f64, HalError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(HalError::Sensor("open circuit".to_string()));
            }
            Ok(*self.temperature.lock().unwrap())
        }

        async fn control(&self, percent: f64) {
            self.power.lock().unwrap().push(percent);
        }
    }

    fn fast_thermal() -> ThermalConfig {
        ThermalConfig {
            loop_interval_ms: 2,
            fix_time_s: 0.01,
            fix_accuracy: 0.01,
            sensor_timeout_s: 0.01,
        }
    }

    const GAINS: PidCoefficients = PidCoefficients { p: 0.05, i: 0.002, d: 0.2 };

    #[test]
    fn test_pid_output_is_clamped() {
        let start = Instant::now();
        let mut pid = Pid::new(GAINS, 200.0, 0.01, Duration::from_secs(1));
        assert_eq!(pid.update(20.0, start), 1.0);
        assert_eq!(pid.update(260.0, start + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn test_pid_fix_detection() {
        let start = Instant::now();
        let mut pid = Pid::new(GAINS, 100.0, 0.01, Duration::from_secs(2));
        pid.update(99.5, start);
        assert!(!pid.is_fixed(start + Duration::from_secs(1)));
        pid.update(100.2, start + Duration::from_secs(1));
        assert!(pid.is_fixed(start + Duration::from_secs(2)));
        // leaving the band starts over
        pid.update(95.0, start + Duration::from_secs(3));
        assert!(!pid.is_fixed(start + Duration::from_secs(6)));
    }

    #[tokio::test]
    async fn test_heater_settles_and_stops() {
        let io = FakeIo::new(200.0);
        let heater = Heater::start(HeaterId::Extruder, 200.0, GAINS, &fast_thermal(), io.clone());
        assert_eq!(heater.target_temperature(), 200.0);
        tokio::time::timeout(Duration::from_secs(5), heater.wait())
            .await
            .expect("heater did not settle")
            .unwrap();
        heater.stop().await;
        assert_eq!(io.last_power(), Some(0.0));
    }

    #[tokio::test]
    async fn test_heater_fails_without_sensor() {
        let io = FakeIo::new(25.0);
        io.broken.store(true, Ordering::SeqCst);
        let heater = Heater::start(HeaterId::Bed, 80.0, GAINS, &fast_thermal(), io.clone());
        let result = tokio::time::timeout(Duration::from_secs(5), heater.wait())
            .await
            .expect("heater did not give up");
        assert_eq!(result, Err(HeaterError::SensorLost(HeaterId::Bed)));
        assert_eq!(heater.status().state, HeaterState::Failed);
        assert_eq!(io.last_power(), Some(0.0));
        heater.stop().await;
    }
}
