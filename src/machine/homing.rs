// src/machine/homing.rs - Return to the reference position
use crate::coordinates::{Axis, AxisMask, Coordinates};
use crate::gcode::GCode;

use super::{Machine, MachineError};

impl Machine {
    /// `G28`: home the axes named in the line, or all of them when none of
    /// `X`, `Y`, `N` and `A` is given, then let the HAL find the endstops.
    pub(super) async fn home(&mut self, gcode: &GCode) -> Result<(), MachineError> {
        let homed = [Axis::X, Axis::Y, Axis::N, Axis::A];
        let named: Vec<Axis> = homed.into_iter().filter(|axis| gcode.has(axis.letter())).collect();
        let axes = if named.is_empty() { homed.to_vec() } else { named };
        let mask = AxisMask::from_axes(&axes).with(Axis::Z, true);

        self.safe_zero(mask).await?;
        self.hal.join().await;
        if !self.hal.calibrate(mask).await {
            tracing::error!("Calibration of {:?} failed", mask.axes().collect::<Vec<_>>());
            return Err(MachineError::CalibrationFailed);
        }
        Ok(())
    }

    /// Retreats the head to the top of travel, pulling `X`/`Y` back to zero
    /// when they are in `mask`, then zeroes `N` and `A` if requested.
    ///
    /// With the homing policy enabled the secondary extruder feeds the
    /// length of the retreat path.
    pub async fn safe_zero(&mut self, mask: AxisMask) -> Result<(), MachineError> {
        let position = self.position;
        let top = self
            .config
            .stepper(Axis::Z)
            .max_position
            .map_or(0.0, |max| max - position.z());
        let limit = |axes: &[Axis]| {
            axes.iter()
                .map(|axis| self.settings.max_velocity_of(*axis))
                .fold(f64::INFINITY, f64::min)
        };
        let cartesian_limit = limit(&[Axis::X, Axis::Y, Axis::Z, Axis::Q]);

        let x = if mask.contains(Axis::X) { -position.x() } else { 0.0 };
        let y = if mask.contains(Axis::Y) { -position.y() } else { 0.0 };
        let velocity = if mask.contains(Axis::X) && mask.contains(Axis::Y) {
            cartesian_limit
        } else {
            cartesian_limit.min(self.config.homing.max_velocity)
        };
        let feed = if self.config.homing.secondary_extrusion {
            (x * x + y * y + top * top).sqrt()
        } else {
            0.0
        };
        tracing::info!("Homing: retreat by ({:.3}, {:.3}, {:.3}), secondary feed {:.3}", x, y, top, feed);
        let retreat = Coordinates::zero()
            .with(Axis::X, x)
            .with(Axis::Y, y)
            .with(Axis::Z, top)
            .with(Axis::Q, feed);
        self.move_linear(retreat, velocity).await?;

        for axis in [Axis::N, Axis::A] {
            if mask.contains(axis) {
                let back = Coordinates::zero().with(axis, -self.position[axis]);
                let velocity = self.settings.max_velocity_of(axis);
                self.move_linear(back, velocity).await?;
            }
        }
        Ok(())
    }
}
