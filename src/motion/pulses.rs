// src/motion/pulses.rs - Trapezoidal profile and the pulse event stream
use std::iter::FusedIterator;

use crate::coordinates::{AXIS_COUNT, Axis, Coordinates};

use super::circular::{ArcDirection, CircularInterpolator, Plane};
use super::linear::LinearInterpolator;
use super::{MotionError, MotionSettings};

pub const SECONDS_IN_MINUTE: f64 = 60.0;

/// One element of a move's pulse stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseEvent {
    /// Per axis direction (+1 / -1) with axis inversion already applied.
    /// Always the first event; repeated whenever a direction changes.
    Direction([i8; AXIS_COUNT]),
    /// Pulse time of every axis stepping at this instant, in microseconds
    /// from the start of the move. `None` for axes that do not step now.
    Pulses([Option<u64>; AXIS_COUNT]),
}

/// Timing breakpoints of a trapezoidal move. Braking takes as long as
/// acceleration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementParameters {
    /// seconds
    pub acceleration_time: f64,
    /// seconds
    pub linear_time: f64,
    /// Peak velocity per axis, mm/s
    pub max_velocity: Coordinates,
}

impl MovementParameters {
    pub fn idle() -> Self {
        Self {
            acceleration_time: 0.0,
            linear_time: 0.0,
            max_velocity: Coordinates::zero(),
        }
    }

    pub fn total_time(&self) -> f64 {
        2.0 * self.acceleration_time + self.linear_time
    }
}

/// Scales every axis by one factor so that no axis exceeds its limit.
/// Returns the scaled velocities (mm/s) and the factor applied.
pub(crate) fn adjust_velocity(velocity: Coordinates, settings: &MotionSettings) -> (Coordinates, f64) {
    if !settings.auto_velocity_adjustment {
        return (velocity, 1.0);
    }
    let factor = Axis::ALL
        .into_iter()
        .filter(|axis| velocity[*axis] > 0.0)
        .map(|axis| settings.max_velocity_of(axis) / SECONDS_IN_MINUTE / velocity[axis])
        .fold(1.0, f64::min);
    if factor < 1.0 {
        tracing::warn!("Velocity exceeds axis limits, scaling down by {:.4}", factor);
        (velocity * factor, factor)
    } else {
        (velocity, 1.0)
    }
}

/// Longest uniform motion time over all moving axes, given each axis' path
/// length and velocity.
pub(crate) fn pseudo_duration(path: &Coordinates, velocity: &Coordinates) -> f64 {
    Axis::ALL
        .into_iter()
        .filter(|axis| velocity[*axis] > 0.0)
        .map(|axis| path[axis] / velocity[axis])
        .fold(0.0, f64::max)
}

/// Plans the trapezoid for `distance` mm at `velocity` (mm/s per axis).
/// `path` is the distance each axis covers at its velocity.
///
/// Returns the parameters and the factor the velocity was scaled by, which
/// is below 1 only for short moves that never reach cruise speed. It never
/// exceeds 1, so limits applied beforehand still hold.
pub(crate) fn plan_movement(
    distance: f64,
    velocity: Coordinates,
    path: &Coordinates,
    acceleration: f64,
) -> (MovementParameters, f64) {
    let peak = velocity.find_max();
    if distance <= 0.0 || peak <= 0.0 {
        return (MovementParameters::idle(), 1.0);
    }
    let mut acceleration_time = peak / acceleration;
    let mut velocity = velocity;
    let mut factor = 1.0;
    let mut linear_time;
    let uniform = pseudo_duration(path, &velocity);
    if uniform > 0.0 && uniform < acceleration_time {
        // triangle: both ramps meet at the scaled peak, no cruise
        factor = (uniform / acceleration_time).sqrt();
        velocity = velocity * factor;
        acceleration_time = uniform / factor;
        linear_time = 0.0;
    } else {
        linear_time = (distance - acceleration * acceleration_time.powi(2)) / velocity.length();
    }
    // the slowest axis must be done before braking ends
    let ramps = acceleration_time.powi(2) * acceleration / velocity.find_max();
    linear_time = linear_time.max(pseudo_duration(path, &velocity) - ramps);
    (
        MovementParameters {
            acceleration_time,
            linear_time,
            max_velocity: velocity,
        },
        factor,
    )
}

/// Shape specific half of a pulse generator.
pub(crate) trait Interpolation {
    fn parameters(&self) -> &MovementParameters;

    /// Direction of each axis' next pulse and its pseudo time, given how
    /// many pulses every axis has emitted. `None` once an axis is done.
    fn interpolate(&self, iterations: &[u64; AXIS_COUNT]) -> ([i8; AXIS_COUNT], [Option<f64>; AXIS_COUNT]);

    /// Displacement in machine coordinates once every pulse is issued.
    fn delta(&self) -> Coordinates;

    /// Signed step count per axis.
    fn steps(&self) -> [i64; AXIS_COUNT];
}

#[derive(Debug, Clone)]
enum Interpolator {
    Linear(LinearInterpolator),
    Circular(CircularInterpolator),
}

impl Interpolator {
    fn as_interpolation(&self) -> &dyn Interpolation {
        match self {
            Interpolator::Linear(linear) => linear,
            Interpolator::Circular(circular) => circular,
        }
    }
}

/// Single pass stream of [`PulseEvent`]s for one move.
///
/// Per axis timing is computed in uniform motion pseudo time and mapped onto
/// the shared trapezoidal profile, so every axis accelerates and brakes
/// together.
#[derive(Debug, Clone)]
pub struct PulseGenerator {
    interpolator: Interpolator,
    inverted: [bool; AXIS_COUNT],
    two_vmax_per_a: f64,
    acceleration_time: f64,
    linear_time: f64,
    iterations: [u64; AXIS_COUNT],
    direction: Option<[i8; AXIS_COUNT]>,
    finished: bool,
}

impl PulseGenerator {
    /// Straight move by `delta` from `origin` at `velocity` mm/min.
    pub fn linear(
        origin: &Coordinates,
        delta: &Coordinates,
        velocity: f64,
        settings: &MotionSettings,
    ) -> Result<Self, MotionError> {
        let linear = LinearInterpolator::new(origin, delta, velocity, settings)?;
        Ok(Self::new(Interpolator::Linear(linear), settings))
    }

    /// Arc in `plane` by `delta`, around a center `center` away from the
    /// start, at `velocity` mm/min.
    pub fn circular(
        delta: &Coordinates,
        center: &Coordinates,
        plane: Plane,
        direction: ArcDirection,
        velocity: f64,
        settings: &MotionSettings,
    ) -> Result<Self, MotionError> {
        let circular = CircularInterpolator::new(delta, center, plane, direction, velocity, settings)?;
        Ok(Self::new(Interpolator::Circular(circular), settings))
    }

    fn new(interpolator: Interpolator, settings: &MotionSettings) -> Self {
        let parameters = *interpolator.as_interpolation().parameters();
        Self {
            interpolator,
            inverted: settings.inverted,
            two_vmax_per_a: 2.0 * parameters.max_velocity.find_max() / settings.max_acceleration,
            acceleration_time: parameters.acceleration_time,
            linear_time: parameters.linear_time,
            iterations: [0; AXIS_COUNT],
            direction: None,
            finished: false,
        }
    }

    pub fn movement_parameters(&self) -> MovementParameters {
        *self.interpolator.as_interpolation().parameters()
    }

    /// Peak velocity per axis in mm/min.
    pub fn max_velocity(&self) -> Coordinates {
        self.movement_parameters().max_velocity * SECONDS_IN_MINUTE
    }

    /// Seconds from the first to the last possible pulse.
    pub fn total_time(&self) -> f64 {
        2.0 * self.acceleration_time + self.linear_time
    }

    pub fn delta(&self) -> Coordinates {
        self.interpolator.as_interpolation().delta()
    }

    pub fn expected_steps(&self) -> [i64; AXIS_COUNT] {
        self.interpolator.as_interpolation().steps()
    }

    pub fn inverted(&self) -> [bool; AXIS_COUNT] {
        self.inverted
    }

    /// Points along the path worth checking against the working volume,
    /// besides the end point.
    pub fn waypoints(&self, origin: &Coordinates) -> Vec<Coordinates> {
        match &self.interpolator {
            Interpolator::Linear(_) => Vec::new(),
            Interpolator::Circular(circular) => circular.waypoints(origin),
        }
    }

    /// Maps uniform motion pseudo time onto the real, accelerated time line.
    fn to_accelerated_time(&self, pt: f64) -> f64 {
        if self.two_vmax_per_a <= 0.0 {
            return pt;
        }
        // acceleration
        let t = (pt * self.two_vmax_per_a).sqrt();
        if t <= self.acceleration_time {
            return t;
        }
        // cruise
        let t = self.acceleration_time + pt - self.acceleration_time.powi(2) / self.two_vmax_per_a;
        let brake_time = t - self.acceleration_time - self.linear_time;
        if brake_time <= 0.0 {
            return t;
        }
        // braking
        let rest = self.acceleration_time.powi(2) - self.two_vmax_per_a * brake_time;
        let rest = if rest > 0.0 { rest.sqrt() } else { 0.0 };
        2.0 * self.acceleration_time + self.linear_time - rest
    }
}

impl Iterator for PulseGenerator {
    type Item = PulseEvent;

    fn next(&mut self) -> Option<PulseEvent> {
        if self.finished {
            return None;
        }
        let (direction, times) = self.interpolator.as_interpolation().interpolate(&self.iterations);
        if self.direction != Some(direction) {
            self.direction = Some(direction);
            let mut signal = direction;
            for (sign, inverted) in signal.iter_mut().zip(self.inverted) {
                if inverted {
                    *sign = -*sign;
                }
            }
            return Some(PulseEvent::Direction(signal));
        }

        let Some(earliest) = times.iter().flatten().copied().reduce(f64::min) else {
            self.finished = true;
            return None;
        };
        let timestamp = (self.to_accelerated_time(earliest) * 1e6).round() as u64;
        let mut pulses = [None; AXIS_COUNT];
        for (i, time) in times.iter().enumerate() {
            if time.is_some_and(|t| t <= earliest) {
                pulses[i] = Some(timestamp);
                self.iterations[i] += 1;
            }
        }
        Some(PulseEvent::Pulses(pulses))
    }
}

impl FusedIterator for PulseGenerator {}

pub(crate) fn direction_of(value: f64) -> i8 {
    if value.is_sign_negative() { -1 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KinematicsType};

    fn cartesian() -> MotionSettings {
        let mut config = Config::default();
        config.kinematics.r#type = KinematicsType::Cartesian;
        MotionSettings::from_config(&config)
    }

    #[test]
    fn test_plan_cruise() {
        let velocity = Coordinates::zero().with(Axis::X, 50.0);
        let path = Coordinates::zero().with(Axis::X, 100.0);
        let (params, factor) = plan_movement(100.0, velocity, &path, 1000.0);
        assert_eq!(factor, 1.0);
        assert!((params.acceleration_time - 0.05).abs() < 1e-12);
        assert!((params.linear_time - 1.95).abs() < 1e-9);
        assert!((params.total_time() - 2.05).abs() < 1e-9);
    }

    #[test]
    fn test_plan_triangle() {
        let velocity = Coordinates::zero().with(Axis::X, 50.0);
        let path = Coordinates::zero().with(Axis::X, 1.0);
        let (params, factor) = plan_movement(1.0, velocity, &path, 1000.0);
        let ta = (1.0f64 / 1000.0).sqrt();
        assert!((params.acceleration_time - ta).abs() < 1e-12);
        assert!(params.linear_time.abs() < 1e-9);
        // peak speed of a triangle is S / Ta
        assert!((params.max_velocity.x() - 1.0 / ta).abs() < 1e-6);
        assert!(factor < 1.0);
    }

    #[test]
    fn test_plan_triangle_never_speeds_up() {
        // the covered distance is shorter than what the axis has to travel
        let velocity = Coordinates::zero().with(Axis::X, 50.0);
        let path = Coordinates::zero().with(Axis::X, 2.0);
        let (params, factor) = plan_movement(1.0, velocity, &path, 1000.0);
        assert!(factor <= 1.0);
        assert!(params.max_velocity.x() <= 50.0);
        // ramps end exactly at the scaled peak
        assert!((params.acceleration_time * 1000.0 - params.max_velocity.x()).abs() < 1e-9);
        assert!(params.linear_time.abs() < 1e-9);
    }

    #[test]
    fn test_plan_idle() {
        let (params, _) = plan_movement(0.0, Coordinates::zero(), &Coordinates::zero(), 1000.0);
        assert_eq!(params, MovementParameters::idle());
    }

    #[test]
    fn test_accelerated_time_is_monotonic_and_bounded() {
        let settings = cartesian();
        let generator =
            PulseGenerator::linear(&Coordinates::zero(), &Coordinates::zero().with(Axis::X, 50.0), 3000.0, &settings)
                .unwrap();
        let end = generator.total_time();
        let mut last = 0.0;
        for i in 0..=1000 {
            let t = generator.to_accelerated_time(i as f64 * 0.002);
            assert!(t >= last - 1e-12);
            assert!(t <= end + 1e-12);
            last = t;
        }
        // pseudo time 1.0 of a 50 mm move at 50 mm/s ends exactly on time
        assert!((generator.to_accelerated_time(1.0) - end).abs() < 1e-9);
    }

    #[test]
    fn test_direction_comes_first_and_inversion_applies() {
        let settings = cartesian();
        let delta = Coordinates::zero().with(Axis::X, -1.0).with(Axis::E, 1.0);
        let mut generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 600.0, &settings).unwrap();
        match generator.next() {
            Some(PulseEvent::Direction(direction)) => {
                assert_eq!(direction[Axis::X.index()], -1);
                // E is inverted in the stock configuration
                assert_eq!(direction[Axis::E.index()], -1);
            }
            other => panic!("unexpected first event {:?}", other),
        }
        assert!(matches!(generator.next(), Some(PulseEvent::Pulses(_))));
    }

    #[test]
    fn test_generator_is_fused() {
        let settings = cartesian();
        let delta = Coordinates::zero().with(Axis::Y, 0.05);
        let mut generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 600.0, &settings).unwrap();
        let events: Vec<_> = generator.by_ref().collect();
        // direction + 5 pulses
        assert_eq!(events.len(), 6);
        assert_eq!(generator.next(), None);
        assert_eq!(generator.next(), None);
    }
}
