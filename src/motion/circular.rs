// src/motion/circular.rs - Arcs in one of the three principal planes
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

use crate::coordinates::{AXIS_COUNT, Axis, Coordinates};

use super::pulses::{Interpolation, MovementParameters, SECONDS_IN_MINUTE, adjust_velocity, direction_of, plan_movement};
use super::{MotionError, MotionSettings};

/// Sweeps below this many radians are taken as a full turn.
const FULL_CIRCLE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Plane {
    #[default]
    XY,
    YZ,
    ZX,
}

impl Plane {
    /// The two arc axes in counterclockwise order, then the third axis.
    pub fn axes(self) -> (Axis, Axis, Axis) {
        match self {
            Plane::XY => (Axis::X, Axis::Y, Axis::Z),
            Plane::YZ => (Axis::Y, Axis::Z, Axis::X),
            Plane::ZX => (Axis::Z, Axis::X, Axis::Y),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::XY => write!(f, "XY"),
            Plane::YZ => write!(f, "YZ"),
            Plane::ZX => write!(f, "ZX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Clockwise,
    CounterClockwise,
}

impl ArcDirection {
    fn sign(self) -> f64 {
        match self {
            ArcDirection::Clockwise => -1.0,
            ArcDirection::CounterClockwise => 1.0,
        }
    }
}

/// Center of an arc given by its radius, relative to the start point, in
/// the two plane axes. A negative radius selects the arc longer than half a
/// turn.
pub fn center_from_radius(
    delta_a: f64,
    delta_b: f64,
    radius: f64,
    direction: ArcDirection,
) -> Result<(f64, f64), MotionError> {
    let chord = delta_a.hypot(delta_b);
    if chord == 0.0 || radius == 0.0 {
        return Err(MotionError::ZeroRadius);
    }
    if chord > 2.0 * radius.abs() + 1e-9 {
        return Err(MotionError::RadiusTooSmall { radius, chord });
    }
    let height = (radius * radius - chord * chord / 4.0).max(0.0).sqrt();
    let mut side = direction.sign();
    if radius < 0.0 {
        side = -side;
    }
    // left hand normal of the chord
    let (na, nb) = (-delta_b / chord, delta_a / chord);
    Ok((
        delta_a / 2.0 + side * height * na,
        delta_b / 2.0 + side * height * nb,
    ))
}

/// Stretch of the sweep where one plane axis moves monotonically.
#[derive(Debug, Clone)]
struct ArcSegment {
    /// swept angle bounds, radians
    start: f64,
    end: f64,
    /// quantized position at `start`, steps from the arc start
    level: i64,
    direction: i8,
    count: u64,
    /// index of the half turn of the axis phase containing the segment
    half_turn: i64,
}

/// One plane axis written as `r·cos(phase0 + s·φ)` around the center.
#[derive(Debug, Clone)]
struct ArcAxis {
    steps_per_mm: f64,
    start: f64,
    phase0: f64,
    segments: Vec<ArcSegment>,
    end_level: i64,
}

impl ArcAxis {
    fn new(radius: f64, phase0: f64, sign: f64, sweep: f64, steps_per_mm: f64) -> Self {
        let start = radius * phase0.cos();
        let level_at = |phi: f64| ((radius * (phase0 + sign * phi).cos() - start) * steps_per_mm).round() as i64;

        // the axis turns around wherever the phase crosses a multiple of π
        let first = if sign > 0.0 {
            ((phase0 / PI).floor() + 1.0) * PI - phase0
        } else {
            phase0 - ((phase0 / PI).ceil() - 1.0) * PI
        };
        let mut bounds = vec![0.0];
        let mut split = first;
        while split < sweep - FULL_CIRCLE_EPSILON {
            bounds.push(split);
            split += PI;
        }
        bounds.push(sweep);

        let mut segments = Vec::with_capacity(bounds.len() - 1);
        let mut level = 0;
        for pair in bounds.windows(2) {
            let next = level_at(pair[1]);
            let change = next - level;
            if change != 0 {
                let middle = phase0 + sign * (pair[0] + pair[1]) / 2.0;
                segments.push(ArcSegment {
                    start: pair[0],
                    end: pair[1],
                    level,
                    direction: if change < 0 { -1 } else { 1 },
                    count: change.unsigned_abs(),
                    half_turn: (middle / PI).floor() as i64,
                });
            }
            level = next;
        }

        Self {
            steps_per_mm,
            start,
            phase0,
            segments,
            end_level: level,
        }
    }

    fn split_angles(&self) -> impl Iterator<Item = f64> + '_ {
        self.segments.iter().skip(1).map(|segment| segment.start)
    }

    fn last_direction(&self) -> i8 {
        self.segments.last().map_or(1, |segment| segment.direction)
    }

    /// Swept angle at which pulse `pulse` of `segment` fires: the moment the
    /// axis crosses the half step between two levels.
    fn trigger_angle(&self, segment: &ArcSegment, pulse: u64, radius: f64, sign: f64) -> f64 {
        let level = segment.level as f64 + segment.direction as f64 * (pulse as f64 + 0.5);
        let coordinate = self.start + level / self.steps_per_mm;
        let u = (coordinate / radius).clamp(-1.0, 1.0);
        let within = if segment.half_turn.rem_euclid(2) == 0 {
            u.acos()
        } else {
            (-u).acos()
        };
        let phase = segment.half_turn as f64 * PI + within;
        (sign * (phase - self.phase0)).clamp(segment.start, segment.end)
    }

    fn next_pulse(&self, emitted: u64, radius: f64, sign: f64) -> (i8, Option<f64>) {
        let mut remaining = emitted;
        for segment in &self.segments {
            if remaining < segment.count {
                return (segment.direction, Some(self.trigger_angle(segment, remaining, radius, sign)));
            }
            remaining -= segment.count;
        }
        (self.last_direction(), None)
    }
}

/// Arc around a center in the selected plane. Every axis outside the plane
/// moves linearly with a velocity share matching its part of the path.
#[derive(Debug, Clone)]
pub struct CircularInterpolator {
    params: MovementParameters,
    plane: Plane,
    radius: f64,
    sign: f64,
    start_angle: f64,
    sweep: f64,
    /// center relative to the start point, in plane axes
    center: (f64, f64),
    arc_speed: f64,
    arc: [ArcAxis; 2],
    steps_per_mm: [f64; AXIS_COUNT],
    counts: [u64; AXIS_COUNT],
    direction: [i8; AXIS_COUNT],
    delta: Coordinates,
}

impl CircularInterpolator {
    /// `center` holds the offset from the start point to the arc center on
    /// the two plane axes, `velocity` the feed in mm/min.
    pub fn new(
        delta: &Coordinates,
        center: &Coordinates,
        plane: Plane,
        direction: ArcDirection,
        velocity: f64,
        settings: &MotionSettings,
    ) -> Result<Self, MotionError> {
        let (axis_a, axis_b, _) = plane.axes();
        let spm = settings.steps_per_mm;
        let (spm_a, spm_b) = (spm[axis_a.index()], spm[axis_b.index()]);
        let resolution = 1.0 / spm_a.min(spm_b);

        let (sa, sb) = (-center[axis_a], -center[axis_b]);
        let (ea, eb) = (sa + delta[axis_a], sb + delta[axis_b]);
        let radius = sa.hypot(sb);
        let end_radius = ea.hypot(eb);
        if radius < resolution {
            return Err(MotionError::ZeroRadius);
        }
        if (radius - end_radius).abs() > resolution {
            return Err(MotionError::ArcEndPoint {
                start: radius,
                end: end_radius,
            });
        }

        let sign = direction.sign();
        let start_angle = sb.atan2(sa);
        let end_angle = eb.atan2(ea);
        let mut sweep = (sign * (end_angle - start_angle)).rem_euclid(TAU);
        if sweep < FULL_CIRCLE_EPSILON {
            sweep = TAU;
        }

        let arc = [
            ArcAxis::new(radius, start_angle, sign, sweep, spm_a),
            ArcAxis::new(radius, start_angle - FRAC_PI_2, sign, sweep, spm_b),
        ];

        let mut counts = [0u64; AXIS_COUNT];
        let mut axis_direction = [1i8; AXIS_COUNT];
        let mut realized = [0.0; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            if axis == axis_a || axis == axis_b {
                let arc_axis = &arc[usize::from(axis == axis_b)];
                counts[i] = arc_axis.segments.iter().map(|segment| segment.count).sum();
                axis_direction[i] = arc_axis.segments.first().map_or(1, |segment| segment.direction);
                realized[i] = arc_axis.end_level as f64 / spm[i];
            } else {
                let steps = (delta[axis] * spm[i]).round() as i64;
                counts[i] = steps.unsigned_abs();
                axis_direction[i] = direction_of(delta[axis]);
                realized[i] = steps as f64 / spm[i];
            }
        }
        let realized = Coordinates::from_array(realized);

        let arc_length = radius * sweep;
        let linear_length: f64 = Axis::ALL
            .into_iter()
            .filter(|axis| *axis != axis_a && *axis != axis_b)
            .map(|axis| realized[axis] * realized[axis])
            .sum();
        let length = (arc_length * arc_length + linear_length).sqrt();

        let feed = velocity / SECONDS_IN_MINUTE;
        let arc_speed = feed * arc_length / length;
        let mut axis_velocity = [0.0; AXIS_COUNT];
        let mut path = [0.0; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            if counts[i] == 0 {
                continue;
            }
            if axis == axis_a || axis == axis_b {
                axis_velocity[i] = arc_speed;
                path[i] = arc_length;
            } else {
                axis_velocity[i] = feed * realized[axis].abs() / length;
                path[i] = realized[axis].abs();
            }
        }

        let (axis_velocity, adjusted) = adjust_velocity(Coordinates::from_array(axis_velocity), settings);
        let (params, shortened) = plan_movement(
            length,
            axis_velocity,
            &Coordinates::from_array(path),
            settings.max_acceleration,
        );
        tracing::debug!(
            "Arc in {} plane, radius {:.4}, sweep {:.4} rad, {} steps over {:.4}s",
            plane,
            radius,
            sweep,
            counts.iter().sum::<u64>(),
            params.total_time()
        );

        Ok(Self {
            params,
            plane,
            radius,
            sign,
            start_angle,
            sweep,
            center: (center[axis_a], center[axis_b]),
            arc_speed: arc_speed * adjusted * shortened,
            arc,
            steps_per_mm: spm,
            counts,
            direction: axis_direction,
            delta: realized,
        })
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Swept angle in radians, a full turn when start and end coincide.
    pub fn sweep(&self) -> f64 {
        self.sweep
    }

    /// Absolute positions along the arc that bound its extent: every
    /// turning point of a plane axis, the end point and, in the XY plane,
    /// the point farthest from the machine origin.
    pub fn waypoints(&self, origin: &Coordinates) -> Vec<Coordinates> {
        let mut angles: Vec<f64> = self.arc.iter().flat_map(|axis| axis.split_angles()).collect();
        if self.plane == Plane::XY {
            let center_x = origin.x() + self.center.0;
            let center_y = origin.y() + self.center.1;
            if center_x != 0.0 || center_y != 0.0 {
                let farthest = center_y.atan2(center_x);
                let phi = (self.sign * (farthest - self.start_angle)).rem_euclid(TAU);
                if phi <= self.sweep {
                    angles.push(phi);
                }
            }
        }
        let mut points: Vec<Coordinates> = angles.into_iter().map(|phi| self.point_at(origin, phi)).collect();
        points.push(*origin + self.delta);
        points
    }

    fn point_at(&self, origin: &Coordinates, phi: f64) -> Coordinates {
        let (axis_a, axis_b, _) = self.plane.axes();
        let angle = self.start_angle + self.sign * phi;
        let share = phi / self.sweep;
        Coordinates::from_fn(|axis| {
            if axis == axis_a {
                origin[axis] + self.center.0 + self.radius * angle.cos()
            } else if axis == axis_b {
                origin[axis] + self.center.1 + self.radius * angle.sin()
            } else {
                origin[axis] + self.delta[axis] * share
            }
        })
    }
}

impl Interpolation for CircularInterpolator {
    fn parameters(&self) -> &MovementParameters {
        &self.params
    }

    fn interpolate(&self, iterations: &[u64; AXIS_COUNT]) -> ([i8; AXIS_COUNT], [Option<f64>; AXIS_COUNT]) {
        let (axis_a, axis_b, _) = self.plane.axes();
        let mut direction = self.direction;
        let mut times = [None; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            if axis == axis_a || axis == axis_b {
                let arc_axis = &self.arc[usize::from(axis == axis_b)];
                let (sign, angle) = arc_axis.next_pulse(iterations[i], self.radius, self.sign);
                direction[i] = sign;
                times[i] = angle.map(|phi| phi * self.radius / self.arc_speed);
            } else {
                let velocity = self.params.max_velocity[axis];
                if iterations[i] < self.counts[i] && velocity > 0.0 {
                    times[i] = Some(iterations[i] as f64 / self.steps_per_mm[i] / velocity);
                }
            }
        }
        (direction, times)
    }

    fn delta(&self) -> Coordinates {
        self.delta
    }

    fn steps(&self) -> [i64; AXIS_COUNT] {
        let (axis_a, axis_b, _) = self.plane.axes();
        let mut steps = [0; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            steps[i] = if axis == axis_a {
                self.arc[0].end_level
            } else if axis == axis_b {
                self.arc[1].end_level
            } else {
                self.counts[i] as i64 * self.direction[i] as i64
            };
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KinematicsType};

    fn settings() -> MotionSettings {
        let mut config = Config::default();
        config.kinematics.r#type = KinematicsType::Cartesian;
        MotionSettings::from_config(&config)
    }

    fn quarter() -> CircularInterpolator {
        // from (10, 0) to (0, 10) around the origin
        let delta = Coordinates::zero().with(Axis::X, -10.0).with(Axis::Y, 10.0);
        let center = Coordinates::zero().with(Axis::X, -10.0);
        CircularInterpolator::new(&delta, &center, Plane::XY, ArcDirection::CounterClockwise, 600.0, &settings())
            .unwrap()
    }

    #[test]
    fn test_quarter_arc_steps() {
        let arc = quarter();
        assert!((arc.sweep() - FRAC_PI_2).abs() < 1e-12);
        assert_eq!(&arc.steps()[0..3], &[-1000, 1000, 0]);
        assert_eq!(arc.delta(), Coordinates::zero().with(Axis::X, -10.0).with(Axis::Y, 10.0));
    }

    #[test]
    fn test_full_circle_turns_both_axes() {
        let center = Coordinates::zero().with(Axis::X, -10.0);
        let arc = CircularInterpolator::new(
            &Coordinates::zero(),
            &center,
            Plane::XY,
            ArcDirection::Clockwise,
            600.0,
            &settings(),
        )
        .unwrap();
        assert!((arc.sweep() - TAU).abs() < 1e-12);
        assert_eq!(arc.counts[0], 4000);
        assert_eq!(arc.counts[1], 4000);
        assert_eq!(arc.steps()[0], 0);
        assert_eq!(arc.steps()[1], 0);
        // clockwise from (10, 0) heads towards -Y first
        let (direction, _) = arc.interpolate(&[0; AXIS_COUNT]);
        assert_eq!(direction[1], -1);
        assert_eq!(direction[0], -1);
    }

    #[test]
    fn test_pulse_angles_increase() {
        let arc = quarter();
        let mut iterations = [0u64; AXIS_COUNT];
        let mut last = -1.0;
        for _ in 0..1000 {
            let (_, times) = arc.interpolate(&iterations);
            let t = times[0].unwrap();
            assert!(t > last);
            last = t;
            iterations[0] += 1;
        }
        assert_eq!(arc.interpolate(&iterations).1[0], None);
        // the last pulse lands before the uniform duration ends
        assert!(last <= arc.radius() * arc.sweep() / arc.arc_speed + 1e-12);
    }

    #[test]
    fn test_end_point_off_the_circle() {
        let delta = Coordinates::zero().with(Axis::X, -10.0).with(Axis::Y, 5.0);
        let center = Coordinates::zero().with(Axis::X, -10.0);
        let result =
            CircularInterpolator::new(&delta, &center, Plane::XY, ArcDirection::Clockwise, 600.0, &settings());
        assert!(matches!(result, Err(MotionError::ArcEndPoint { .. })));
    }

    #[test]
    fn test_zero_radius() {
        let result = CircularInterpolator::new(
            &Coordinates::zero(),
            &Coordinates::zero(),
            Plane::XY,
            ArcDirection::Clockwise,
            600.0,
            &settings(),
        );
        assert!(matches!(result, Err(MotionError::ZeroRadius)));
    }

    #[test]
    fn test_center_from_radius() {
        let (a, b) = center_from_radius(-10.0, 10.0, 10.0, ArcDirection::CounterClockwise).unwrap();
        assert!((a + 10.0).abs() < 1e-9);
        assert!(b.abs() < 1e-9);
        // same chord clockwise puts the center on the other side
        let (a, b) = center_from_radius(-10.0, 10.0, 10.0, ArcDirection::Clockwise).unwrap();
        assert!(a.abs() < 1e-9);
        assert!((b - 10.0).abs() < 1e-9);
        assert!(matches!(
            center_from_radius(20.0, 0.0, 5.0, ArcDirection::Clockwise),
            Err(MotionError::RadiusTooSmall { .. })
        ));
    }

    #[test]
    fn test_helix_moves_third_axis() {
        let delta = Coordinates::zero()
            .with(Axis::X, -10.0)
            .with(Axis::Y, 10.0)
            .with(Axis::Z, 2.0);
        let center = Coordinates::zero().with(Axis::X, -10.0);
        let arc = CircularInterpolator::new(&delta, &center, Plane::XY, ArcDirection::CounterClockwise, 600.0, &settings())
            .unwrap();
        assert_eq!(arc.steps()[2], 200);
        let v = arc.parameters().max_velocity;
        assert!(v.z() > 0.0 && v.z() < v.x());
    }

    #[test]
    fn test_waypoints_include_turning_points() {
        // half circle from (10, 0) through (0, 10) to (-10, 0)
        let delta = Coordinates::zero().with(Axis::X, -20.0);
        let center = Coordinates::zero().with(Axis::X, -10.0);
        let arc = CircularInterpolator::new(&delta, &center, Plane::XY, ArcDirection::CounterClockwise, 600.0, &settings())
            .unwrap();
        let origin = Coordinates::zero().with(Axis::X, 10.0);
        let points = arc.waypoints(&origin);
        assert!(points.iter().any(|p| (p.y() - 10.0).abs() < 1e-9 && p.x().abs() < 1e-9));
        let end = points.last().unwrap();
        assert!((end.x() + 10.0).abs() < 1e-9);
    }
}
