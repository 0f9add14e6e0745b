// Benchmark for line parsing and pulse generation
// Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use octocnc::config::{Config, KinematicsType};
use octocnc::coordinates::{Axis, Coordinates};
use octocnc::gcode::parse_line;
use octocnc::motion::{ArcDirection, MotionSettings, Plane, PulseGenerator};

fn bench_parse_line(c: &mut Criterion) {
    let lines: Vec<String> = (0..10_000)
        .map(|i| format!("G1 X{}.5 Y-{} Z{} E0.25 F1500 ; pass {}", i % 150, i % 90, i % 400, i))
        .collect();
    c.bench_function("parse 10k G1 lines", |b| {
        b.iter(|| {
            let count = lines
                .iter()
                .filter(|line| matches!(parse_line(line), Ok(Some(_))))
                .count();
            assert_eq!(count, 10_000);
        });
    });
}

fn bench_linear_pulses(c: &mut Criterion) {
    let settings = MotionSettings::from_config(&Config::default());
    let origin = Coordinates::new(10.0, 10.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    let delta = Coordinates::new(-30.0, 15.0, 5.0, 2.0, 1.0, 0.0, 0.0, 0.0);
    c.bench_function("tri-arm linear move pulses", |b| {
        b.iter(|| {
            let generator = PulseGenerator::linear(&origin, &delta, 3000.0, &settings).unwrap();
            generator.count()
        });
    });
}

fn bench_circular_pulses(c: &mut Criterion) {
    let mut config = Config::default();
    config.kinematics.r#type = KinematicsType::Cartesian;
    let settings = MotionSettings::from_config(&config);
    let center = Coordinates::zero().with(Axis::X, 10.0);
    c.bench_function("full circle pulses", |b| {
        b.iter(|| {
            let generator = PulseGenerator::circular(
                &Coordinates::zero(),
                &center,
                Plane::XY,
                ArcDirection::Clockwise,
                1200.0,
                &settings,
            )
            .unwrap();
            generator.count()
        });
    });
}

criterion_group!(benches, bench_parse_line, bench_linear_pulses, bench_circular_pulses);
criterion_main!(benches);
