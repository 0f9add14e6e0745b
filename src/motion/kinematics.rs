// src/motion/kinematics.rs
use std::sync::Arc;
use thiserror::Error;

use crate::config::{KinematicsConfig, KinematicsType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum KinematicsError {
    #[error("position ({x:.3}, {y:.3}, {z:.3}) is out of reach of arm {arm}")]
    Unreachable { arm: usize, x: f64, y: f64, z: f64 },
}

/// Maps tool space onto the three Cartesian actuators.
pub trait Kinematics: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> KinematicsType;

    /// Convert a tool position to actuator positions
    fn cartesian_to_actuators(&self, tool: &[f64; 3]) -> Result<[f64; 3], KinematicsError>;

    /// Actuator velocities of a tool passing `tool` with `velocity`
    fn actuator_velocities(&self, tool: &[f64; 3], velocity: &[f64; 3]) -> Result<[f64; 3], KinematicsError>;

    /// Check if position is reachable for this kinematics
    fn is_valid_position(&self, tool: &[f64; 3]) -> bool {
        self.cartesian_to_actuators(tool).is_ok()
    }
}

/// Actuators move the tool axes directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartesianKinematics;

impl Kinematics for CartesianKinematics {
    fn kind(&self) -> KinematicsType {
        KinematicsType::Cartesian
    }

    fn cartesian_to_actuators(&self, tool: &[f64; 3]) -> Result<[f64; 3], KinematicsError> {
        Ok(*tool)
    }

    fn actuator_velocities(&self, _tool: &[f64; 3], velocity: &[f64; 3]) -> Result<[f64; 3], KinematicsError> {
        Ok(*velocity)
    }
}

/// Three vertical carriages at 0, 120 and 240 degrees, each carrying an arm
/// of fixed length down to a pivot on the tool head.
///
/// Carriage height for arm `i` at angle `θ`:
///
/// ```text
/// h = z + pivot_height + sqrt(L² - (ρ·cosθ - x)² - (ρ·sinθ - y)²)
/// ```
///
/// with `ρ` the horizontal distance between the carriage rail and the
/// tool pivot (bed radius minus pivot to tool distance).
#[derive(Debug, Clone)]
pub struct TriArmKinematics {
    anchor_radius: f64,
    pivot_height: f64,
    arm_length: f64,
}

impl TriArmKinematics {
    pub const ARM_ANGLES_DEG: [f64; 3] = [0.0, 120.0, 240.0];

    pub fn new(bed_radius: f64, pivot_tool_distance: f64, pivot_height: f64, arm_length: f64) -> Self {
        Self {
            anchor_radius: bed_radius - pivot_tool_distance,
            pivot_height,
            arm_length,
        }
    }

    pub fn from_config(config: &KinematicsConfig) -> Self {
        Self::new(
            config.bed_radius,
            config.pivot_tool_distance,
            config.pivot_height,
            config.arm_length,
        )
    }

    /// Horizontal offset from the tool to arm `arm`'s rail and the vertical
    /// drop of the arm.
    fn arm_geometry(&self, arm: usize, tool: &[f64; 3]) -> Result<(f64, f64, f64), KinematicsError> {
        let angle = Self::ARM_ANGLES_DEG[arm].to_radians();
        let dx = self.anchor_radius * angle.cos() - tool[0];
        let dy = self.anchor_radius * angle.sin() - tool[1];
        let rest = self.arm_length * self.arm_length - dx * dx - dy * dy;
        if rest <= 0.0 {
            return Err(KinematicsError::Unreachable {
                arm,
                x: tool[0],
                y: tool[1],
                z: tool[2],
            });
        }
        Ok((dx, dy, rest.sqrt()))
    }
}

impl Kinematics for TriArmKinematics {
    fn kind(&self) -> KinematicsType {
        KinematicsType::TriArm
    }

    fn cartesian_to_actuators(&self, tool: &[f64; 3]) -> Result<[f64; 3], KinematicsError> {
        let mut heights = [0.0; 3];
        for (arm, height) in heights.iter_mut().enumerate() {
            let (_, _, drop) = self.arm_geometry(arm, tool)?;
            *height = tool[2] + self.pivot_height + drop;
        }
        Ok(heights)
    }

    fn actuator_velocities(&self, tool: &[f64; 3], velocity: &[f64; 3]) -> Result<[f64; 3], KinematicsError> {
        let mut velocities = [0.0; 3];
        for (arm, v) in velocities.iter_mut().enumerate() {
            let (dx, dy, drop) = self.arm_geometry(arm, tool)?;
            *v = velocity[2] + (dx * velocity[0] + dy * velocity[1]) / drop;
        }
        Ok(velocities)
    }
}

pub fn create_kinematics(config: &KinematicsConfig) -> Arc<dyn Kinematics> {
    match config.r#type {
        KinematicsType::Cartesian => Arc::new(CartesianKinematics),
        KinematicsType::TriArm => Arc::new(TriArmKinematics::from_config(config)),
    }
}
