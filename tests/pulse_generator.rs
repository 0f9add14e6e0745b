// Tests for pulse generation through both interpolators

use octocnc::config::{Config, KinematicsType};
use octocnc::coordinates::{AXIS_COUNT, Axis, Coordinates};
use octocnc::hardware::virtual_hal::consume;
use octocnc::motion::{ArcDirection, MotionSettings, Plane, PulseEvent, PulseGenerator};

fn settings(kind: KinematicsType) -> MotionSettings {
    let mut config = Config::default();
    config.kinematics.r#type = kind;
    MotionSettings::from_config(&config)
}

/// Per axis pulse instants, in microseconds.
fn pulse_times(generator: PulseGenerator) -> Vec<Vec<u64>> {
    let mut times = vec![Vec::new(); AXIS_COUNT];
    for event in generator {
        if let PulseEvent::Pulses(pulses) = event {
            for (axis, pulse) in pulses.iter().enumerate() {
                if let Some(t) = pulse {
                    times[axis].push(*t);
                }
            }
        }
    }
    times
}

#[test]
fn test_first_event_is_direction() {
    let settings = settings(KinematicsType::TriArm);
    let delta = Coordinates::new(5.0, -3.0, 2.0, 1.0, 0.5, 0.0, 1.0, -1.0);
    let mut generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 1200.0, &settings).unwrap();
    assert!(matches!(generator.next(), Some(PulseEvent::Direction(_))));
}

#[test]
fn test_tri_arm_move_is_consistent() {
    let settings = settings(KinematicsType::TriArm);
    let origin = Coordinates::new(10.0, 10.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    let delta = Coordinates::new(-30.0, 15.0, 5.0, 2.0, 1.0, 0.0, 0.0, 0.0);
    let generator = PulseGenerator::linear(&origin, &delta, 3000.0, &settings).unwrap();
    let expected = generator.expected_steps();
    let total = generator.total_time();
    assert_eq!(generator.delta(), delta);

    let report = consume(generator).unwrap();
    assert_eq!(report.steps, expected);
    assert_eq!(report.direction_changes, 0);
    assert!(report.duration <= total + 1e-6);
}

#[test]
fn test_pulses_accelerate_then_cruise() {
    let settings = settings(KinematicsType::Cartesian);
    let delta = Coordinates::zero().with(Axis::X, 100.0);
    let generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 3000.0, &settings).unwrap();
    let x = &pulse_times(generator)[Axis::X.index()];
    assert_eq!(x.len(), 10000);
    let first_gap = x[1] - x[0];
    let middle_gap = x[5001] - x[5000];
    let last_gap = x[9999] - x[9998];
    assert!(first_gap > middle_gap);
    assert!(last_gap > middle_gap);
    // 50 mm/s at 100 steps/mm while cruising
    assert!((199..=201).contains(&middle_gap));
}

#[test]
fn test_short_move_never_reaches_feed() {
    let settings = settings(KinematicsType::Cartesian);
    let delta = Coordinates::zero().with(Axis::Y, 0.1);
    let generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 3000.0, &settings).unwrap();
    let parameters = generator.movement_parameters();
    assert!(parameters.linear_time < 1e-9);
    assert!(generator.max_velocity().y() < 3000.0);
    assert!(consume(generator).is_ok());
}

#[test]
fn test_auto_velocity_adjustment_caps_every_axis() {
    let settings = settings(KinematicsType::Cartesian);
    let delta = Coordinates::zero().with(Axis::E, 10.0).with(Axis::B, 10.0);
    let generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 100000.0, &settings).unwrap();
    let peak = generator.max_velocity();
    assert!(peak.e() <= 1500.0 + 1e-6);
    assert!(peak.b() <= 800.0 + 1e-6);
    // both axes were scaled by the same factor
    assert!((peak.e() - peak.b()).abs() < 1e-6);
}

#[test]
fn test_tri_arm_moves_with_extrusion_respect_limits() {
    let settings = settings(KinematicsType::TriArm);
    let origins = [
        Coordinates::zero().with(Axis::X, -150.0),
        Coordinates::new(10.0, 10.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0),
        Coordinates::new(0.0, 120.0, 5.0, 0.0, 0.0, 0.0, 0.0, 0.0),
    ];
    for origin in origins {
        for length in [0.05, 0.5, 5.0, 20.0] {
            for feed in [600.0, 3000.0, 100000.0] {
                let delta = Coordinates::zero()
                    .with(Axis::X, -length)
                    .with(Axis::Y, length / 2.0)
                    .with(Axis::E, length / 10.0)
                    .with(Axis::Q, length / 20.0);
                let generator = PulseGenerator::linear(&origin, &delta, feed, &settings).unwrap();
                let peak = generator.max_velocity();
                for axis in Axis::ALL {
                    let limit = settings.max_velocity_of(axis);
                    assert!(
                        peak[axis] <= limit * (1.0 + 1e-9),
                        "{:?} at {} over {} from {} by {}",
                        axis,
                        peak[axis],
                        limit,
                        origin,
                        length
                    );
                }
            }
        }
    }
}

#[test]
fn test_without_adjustment_speed_is_kept() {
    let mut config = Config::default();
    config.kinematics.r#type = KinematicsType::Cartesian;
    config.machine.auto_velocity_adjustment = false;
    let settings = MotionSettings::from_config(&config);
    let delta = Coordinates::zero().with(Axis::E, 100.0);
    let generator = PulseGenerator::linear(&Coordinates::zero(), &delta, 6000.0, &settings).unwrap();
    assert!((generator.max_velocity().e() - 6000.0).abs() < 1e-6);
}

#[test]
fn test_full_circle_changes_direction() {
    let settings = settings(KinematicsType::Cartesian);
    let center = Coordinates::zero().with(Axis::X, -10.0);
    let generator = PulseGenerator::circular(
        &Coordinates::zero(),
        &center,
        Plane::XY,
        ArcDirection::Clockwise,
        1200.0,
        &settings,
    )
    .unwrap();
    assert_eq!(generator.delta(), Coordinates::zero());
    let report = consume(generator).unwrap();
    assert_eq!(report.steps, [0; AXIS_COUNT]);
    assert_eq!(report.direction_changes, 3);
}

#[test]
fn test_arc_in_zx_plane_with_extrusion() {
    let settings = settings(KinematicsType::Cartesian);
    // quarter turn from Z=+5 around the center towards +X, extruding as it goes
    let delta = Coordinates::zero()
        .with(Axis::Z, -5.0)
        .with(Axis::X, 5.0)
        .with(Axis::E, 1.0);
    let center = Coordinates::zero().with(Axis::Z, -5.0);
    let generator =
        PulseGenerator::circular(&delta, &center, Plane::ZX, ArcDirection::CounterClockwise, 600.0, &settings)
            .unwrap();
    let expected = generator.expected_steps();
    assert_eq!(expected[Axis::Z.index()], -500);
    assert_eq!(expected[Axis::X.index()], 500);
    assert_eq!(expected[Axis::E.index()], 150);
    let report = consume(generator).unwrap();
    assert_eq!(report.steps, expected);
}

#[test]
fn test_arc_pulses_follow_the_circle() {
    let settings = settings(KinematicsType::Cartesian);
    let delta = Coordinates::zero().with(Axis::X, -10.0).with(Axis::Y, 10.0);
    let center = Coordinates::zero().with(Axis::X, -10.0);
    let generator =
        PulseGenerator::circular(&delta, &center, Plane::XY, ArcDirection::CounterClockwise, 600.0, &settings)
            .unwrap();
    let times = pulse_times(generator);
    let (x, y) = (&times[0], &times[1]);
    assert_eq!(x.len(), 1000);
    assert_eq!(y.len(), 1000);
    // Y moves fast at the start of the quarter, X at its end
    assert!(y[1] - y[0] < x[1] - x[0]);
    assert!(x[999] - x[998] < y[999] - y[998]);
}
