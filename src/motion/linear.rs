// src/motion/linear.rs - Straight multi axis moves through the arm kinematics
use crate::config::KinematicsType;
use crate::coordinates::{AXIS_COUNT, Axis, Coordinates};

use super::pulses::{
    Interpolation, MovementParameters, SECONDS_IN_MINUTE, adjust_velocity, direction_of, plan_movement,
};
use super::{MotionError, MotionSettings};

/// Straight move from an absolute tool position.
///
/// `X`, `Y` and `Z` are converted into carriage travel: the carriages are
/// quantized from their absolute heights before and after the move, so
/// consecutive moves never accumulate rounding drift. All other axes step
/// their own delta.
#[derive(Debug, Clone)]
pub struct LinearInterpolator {
    params: MovementParameters,
    steps_per_mm: [f64; AXIS_COUNT],
    counts: [u64; AXIS_COUNT],
    direction: [i8; AXIS_COUNT],
    delta: Coordinates,
}

impl LinearInterpolator {
    /// `velocity` is the requested head feed in mm/min.
    pub fn new(
        origin: &Coordinates,
        delta: &Coordinates,
        velocity: f64,
        settings: &MotionSettings,
    ) -> Result<Self, MotionError> {
        let kinematics = &settings.kinematics;
        let target = *origin + *delta;
        let before = kinematics.cartesian_to_actuators(&origin.xyz())?;
        let after = kinematics.cartesian_to_actuators(&target.xyz())?;

        let spm = settings.steps_per_mm;
        let mut steps = [0i64; AXIS_COUNT];
        let mut direction = [1i8; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            if axis.is_cartesian() {
                steps[i] = (after[i] * spm[i]).round() as i64 - (before[i] * spm[i]).round() as i64;
                direction[i] = direction_of(after[i] - before[i]);
            } else {
                steps[i] = (delta[axis] * spm[i]).round() as i64;
                direction[i] = direction_of(delta[axis]);
            }
        }
        let distance = Coordinates::from_fn(|axis| steps[axis.index()] as f64 / spm[axis.index()]);
        let path = distance.abs();
        let total = distance.length();

        let mut feed = velocity / SECONDS_IN_MINUTE;
        let head = delta.xyz();
        let head_length = head.iter().map(|v| v * v).sum::<f64>().sqrt();
        if settings.auto_velocity_adjustment && settings.couple_secondary_extrusion && head_length > 0.0 {
            let limit = settings.max_velocity_of(Axis::Q) / SECONDS_IN_MINUTE;
            if feed > limit {
                tracing::debug!("Head feed {:.3} mm/s limited by the secondary extruder", feed);
                feed = limit;
            }
        }

        let mut axis_velocity = [0.0; AXIS_COUNT];
        if head_length > 0.0 {
            let tool_velocity = head.map(|d| feed * d / head_length);
            let at_start = kinematics.actuator_velocities(&origin.xyz(), &tool_velocity)?;
            let at_end = kinematics.actuator_velocities(&target.xyz(), &tool_velocity)?;
            let head_time = head_length / feed;
            for arm in 0..3 {
                axis_velocity[arm] = at_start[arm]
                    .abs()
                    .max(at_end[arm].abs())
                    .max(path.get(Axis::CARTESIAN[arm]) / head_time);
            }
        }
        // secondary axes ride along in the time the head takes
        if head_length > 0.0 {
            let head_time = head_length / feed;
            for axis in Axis::ALL.into_iter().filter(|axis| !axis.is_cartesian()) {
                axis_velocity[axis.index()] = path[axis] / head_time;
            }
        } else if total > 0.0 {
            for axis in Axis::ALL.into_iter().filter(|axis| !axis.is_cartesian()) {
                axis_velocity[axis.index()] = path[axis] * feed / total;
            }
        }
        for (v, s) in axis_velocity.iter_mut().zip(steps) {
            if s == 0 {
                *v = 0.0;
            }
        }

        let (axis_velocity, _) = adjust_velocity(Coordinates::from_array(axis_velocity), settings);
        let (params, _) = plan_movement(total, axis_velocity, &path, settings.max_acceleration);

        let realized = match kinematics.kind() {
            KinematicsType::Cartesian => distance,
            // carriages are quantized, the tool ends where it was sent
            KinematicsType::TriArm => Coordinates::from_fn(|axis| {
                if axis.is_cartesian() { delta[axis] } else { distance[axis] }
            }),
        };
        tracing::debug!(
            "Linear move {} in {} steps over {:.4}s",
            realized,
            steps.iter().map(|s| s.unsigned_abs()).sum::<u64>(),
            params.total_time()
        );

        Ok(Self {
            params,
            steps_per_mm: spm,
            counts: steps.map(i64::unsigned_abs),
            direction,
            delta: realized,
        })
    }
}

impl Interpolation for LinearInterpolator {
    fn parameters(&self) -> &MovementParameters {
        &self.params
    }

    fn interpolate(&self, iterations: &[u64; AXIS_COUNT]) -> ([i8; AXIS_COUNT], [Option<f64>; AXIS_COUNT]) {
        let mut times = [None; AXIS_COUNT];
        for axis in Axis::ALL {
            let i = axis.index();
            let velocity = self.params.max_velocity[axis];
            if iterations[i] < self.counts[i] && velocity > 0.0 {
                times[i] = Some(iterations[i] as f64 / self.steps_per_mm[i] / velocity);
            }
        }
        (self.direction, times)
    }

    fn delta(&self) -> Coordinates {
        self.delta
    }

    fn steps(&self) -> [i64; AXIS_COUNT] {
        let mut steps = [0; AXIS_COUNT];
        for (i, step) in steps.iter_mut().enumerate() {
            *step = self.counts[i] as i64 * self.direction[i] as i64;
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn settings(kind: KinematicsType) -> MotionSettings {
        let mut config = Config::default();
        config.kinematics.r#type = kind;
        MotionSettings::from_config(&config)
    }

    #[test]
    fn test_cartesian_diagonal() {
        let settings = settings(KinematicsType::Cartesian);
        let delta = Coordinates::zero().with(Axis::X, 10.0).with(Axis::Y, -10.0);
        let linear = LinearInterpolator::new(&Coordinates::zero(), &delta, 600.0, &settings).unwrap();
        assert_eq!(linear.steps()[0], 1000);
        assert_eq!(linear.steps()[1], -1000);
        assert_eq!(linear.delta(), delta);
        let v = linear.parameters().max_velocity;
        assert_eq!(v.x(), v.y());
        // 10 mm/s along the diagonal
        assert!((v.x() - 10.0 / 2f64.sqrt()).abs() < 1e-6);
        assert_eq!(v.z(), 0.0);
    }

    #[test]
    fn test_tri_arm_vertical_move_lifts_all_carriages() {
        let settings = settings(KinematicsType::TriArm);
        let delta = Coordinates::zero().with(Axis::Z, 5.0);
        let linear = LinearInterpolator::new(&Coordinates::zero(), &delta, 1200.0, &settings).unwrap();
        assert_eq!(&linear.steps()[0..3], &[500, 500, 500]);
        let v = linear.parameters().max_velocity;
        for arm in 0..3 {
            assert!((v.to_array()[arm] - 20.0).abs() < 1e-6);
        }
        assert_eq!(linear.delta(), delta);
    }

    #[test]
    fn test_tri_arm_radial_move() {
        let settings = settings(KinematicsType::TriArm);
        let delta = Coordinates::zero().with(Axis::X, 20.0);
        let linear = LinearInterpolator::new(&Coordinates::zero(), &delta, 1200.0, &settings).unwrap();
        let steps = linear.steps();
        // the arm at 0 degrees rises, the other two sink equally
        assert!(steps[0] > 0);
        assert!(steps[1] < 0);
        assert_eq!(steps[1], steps[2]);
        assert_eq!(linear.direction[1], -1);
        assert_eq!(linear.delta().x(), 20.0);
    }

    #[test]
    fn test_short_tri_arm_move_with_extrusion_stays_within_limits() {
        let settings = settings(KinematicsType::TriArm);
        let origin = Coordinates::zero().with(Axis::X, -150.0);
        let delta = Coordinates::zero().with(Axis::X, -0.5).with(Axis::E, 0.05);
        let linear = LinearInterpolator::new(&origin, &delta, 3000.0, &settings).unwrap();
        let v = linear.parameters().max_velocity * SECONDS_IN_MINUTE;
        for axis in Axis::ALL {
            assert!(v[axis] <= settings.max_velocity_of(axis) * (1.0 + 1e-9), "{:?} at {}", axis, v[axis]);
        }
        assert!(v.e() > 0.0);
    }

    #[test]
    fn test_head_feed_is_capped_by_secondary_extruder() {
        let settings = settings(KinematicsType::Cartesian);
        let delta = Coordinates::zero().with(Axis::X, 10.0);
        let linear = LinearInterpolator::new(&Coordinates::zero(), &delta, 6000.0, &settings).unwrap();
        // q is limited to 3000 mm/min
        assert!((linear.parameters().max_velocity.x() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_extruder_only_move() {
        let settings = settings(KinematicsType::TriArm);
        let delta = Coordinates::zero().with(Axis::E, -2.0);
        let linear = LinearInterpolator::new(&Coordinates::zero(), &delta, 600.0, &settings).unwrap();
        assert_eq!(linear.steps()[Axis::E.index()], -300);
        assert_eq!(&linear.steps()[0..3], &[0, 0, 0]);
        assert!((linear.parameters().max_velocity.e() - 10.0).abs() < 1e-9);
        let (_, times) = linear.interpolate(&[0; AXIS_COUNT]);
        assert_eq!(times[Axis::E.index()], Some(0.0));
        assert_eq!(times[Axis::X.index()], None);
    }
}
