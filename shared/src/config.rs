//! Simulation parameters shared by both ends of the connection.
//!
//! The server owns the values and sends them to each client on connect, so
//! prediction and authority always step with the same numbers.

use crate::error::ConfigError;
use crate::math::Vec3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_TICK_RATE: u32 = 240;

/// Fixed-rate clock settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickConfig {
    pub tick_rate: u32,
}

impl TickConfig {
    pub fn new(tick_rate: u32) -> Result<Self, ConfigError> {
        if tick_rate == 0 || tick_rate > MAX_TICK_RATE {
            return Err(ConfigError::TickRate {
                value: tick_rate,
                max: MAX_TICK_RATE,
            });
        }
        Ok(Self { tick_rate })
    }

    /// Simulation step in seconds. The simulator only ever sees this value,
    /// never measured frame time.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    /// Wall-clock period of the tick timer.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate as f64)
    }
}

impl Default for TickConfig {
    fn default() -> Self {
        Self { tick_rate: 60 }
    }
}

/// Every constant the movement step reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    /// Horizontal speed at full stick deflection, units per second.
    pub run_speed: f32,
    /// Downward acceleration while airborne, units per second squared.
    pub gravity: f32,
    /// Horizontal speed lost per second while airborne.
    pub air_drag: f32,
    /// Tallest ledge the stair assist climbs in one tick.
    pub max_step_height: f32,
    /// Height of the low forward ray that detects ledges.
    pub ankle_height: f32,
    /// Maximum gap between feet and ground that still counts as grounded.
    pub ground_snap_distance: f32,
    /// Radius of the capsule swept against other entities.
    pub capsule_radius: f32,
    /// Half-angle of the head-on cone inside which an impending collision
    /// cancels forward motion.
    pub avoidance_cone_degrees: f32,
    /// Scale applied to the animation's root-motion displacement.
    pub root_motion_speed: f32,
    /// Offset from the holder's transform while grabbed, in holder space.
    pub grab_offset: Vec3,
    /// Predicted/authoritative position distance that counts as divergence.
    pub position_epsilon: f32,
    /// Predicted/authoritative rotation difference that counts as divergence.
    pub rotation_epsilon_degrees: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            run_speed: 6.0,
            gravity: 20.0,
            air_drag: 2.0,
            max_step_height: 0.4,
            ankle_height: 0.05,
            ground_snap_distance: 0.1,
            capsule_radius: 0.4,
            avoidance_cone_degrees: 30.0,
            root_motion_speed: 1.0,
            grab_offset: Vec3::new(0.0, 0.0, 1.0),
            position_epsilon: 0.01,
            rotation_epsilon_degrees: 1.0,
        }
    }
}

impl MovementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("run_speed", self.run_speed),
            ("gravity", self.gravity),
            ("air_drag", self.air_drag),
            ("max_step_height", self.max_step_height),
            ("ankle_height", self.ankle_height),
            ("ground_snap_distance", self.ground_snap_distance),
            ("capsule_radius", self.capsule_radius),
            ("root_motion_speed", self.root_motion_speed),
            ("position_epsilon", self.position_epsilon),
            ("rotation_epsilon_degrees", self.rotation_epsilon_degrees),
        ];
        for (name, value) in checks {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Parameter { name, value });
            }
        }
        if !self.grab_offset.is_finite() {
            return Err(ConfigError::Parameter {
                name: "grab_offset",
                value: f32::NAN,
            });
        }
        if !(0.0..=90.0).contains(&self.avoidance_cone_degrees) {
            return Err(ConfigError::AvoidanceCone(self.avoidance_cone_degrees));
        }
        Ok(())
    }

    /// Cosine of the avoidance cone half-angle.
    pub fn avoidance_cos(&self) -> f32 {
        self.avoidance_cone_degrees.to_radians().cos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_tick_config_bounds() {
        assert!(TickConfig::new(0).is_err());
        assert!(TickConfig::new(MAX_TICK_RATE + 1).is_err());
        let config = TickConfig::new(60).unwrap();
        assert_approx_eq!(config.dt(), 1.0 / 60.0, 1e-9);
        assert_eq!(config.duration().as_millis(), 16);
    }

    #[test]
    fn test_default_movement_config_is_valid() {
        assert_eq!(MovementConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_rejects_negative_parameter() {
        let config = MovementConfig {
            gravity: -1.0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Parameter {
                name: "gravity",
                value: -1.0
            })
        );
    }

    #[test]
    fn test_rejects_nan_parameter() {
        let config = MovementConfig {
            run_speed: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_wide_cone() {
        let config = MovementConfig {
            avoidance_cone_degrees: 120.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::AvoidanceCone(120.0)));
    }
}
