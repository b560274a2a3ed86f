//! Tick-indexed data exchanged between the sampler, the simulator, the
//! predictor and the authority.

use crate::math::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// One fixed simulation step on an entity's own timeline. Starts at zero on
/// spawn and advances by exactly one per step.
pub type Tick = u32;

/// Values that carry the tick they were produced for.
///
/// Ring buffer reads use this to tell a live slot from an aliased one.
pub trait Ticked {
    fn tick(&self) -> Tick;
}

/// The per-tick input of the controlling side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    pub tick: Tick,
    /// Stick input, x is strafe and y is forward. Clamped to unit length by
    /// the simulator.
    pub move_vector: Vec2,
    /// Aim/camera orientation used to turn the move vector into world space.
    pub orientation: Quat,
}

impl InputSample {
    pub fn new(tick: Tick, move_vector: Vec2, orientation: Quat) -> Self {
        Self {
            tick,
            move_vector,
            orientation,
        }
    }

    /// Stand-in for a tick whose input never arrived: no movement, facing
    /// wherever the entity faced last.
    pub fn idle(tick: Tick, orientation: Quat) -> Self {
        Self {
            tick,
            move_vector: Vec2::ZERO,
            orientation,
        }
    }
}

impl Ticked for InputSample {
    fn tick(&self) -> Tick {
        self.tick
    }
}

/// The full simulated result for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatePayload {
    pub tick: Tick,
    pub move_vector: Vec2,
    pub position: Vec3,
    pub velocity: Vec3,
    pub rotation: Quat,
    pub used_root_motion: bool,
}

impl StatePayload {
    /// Resting state at `position`, used when an entity spawns.
    pub fn spawn(tick: Tick, position: Vec3, rotation: Quat) -> Self {
        Self {
            tick,
            move_vector: Vec2::ZERO,
            position,
            velocity: Vec3::ZERO,
            rotation,
            used_root_motion: false,
        }
    }

    pub fn position_error(&self, other: &StatePayload) -> f32 {
        self.position.distance(&other.position)
    }

    pub fn rotation_error(&self, other: &StatePayload) -> f32 {
        self.rotation.angle_to(&other.rotation)
    }
}

impl Ticked for StatePayload {
    fn tick(&self) -> Tick {
        self.tick
    }
}

/// Position and rotation of some other entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Read-only gameplay flags the simulator consults for one tick.
///
/// Owned by gameplay systems outside the movement core. The authority sends
/// the current flags with every snapshot and the predictor records them per
/// tick, so a replay sees the same flags the first run saw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct GameplayState {
    pub dead: bool,
    /// Transform of the entity currently holding this one.
    pub grabbed_by: Option<Transform>,
    pub rooted: bool,
    /// Rotation forced by an ailment (stun, fear, aim lock).
    pub ailment_rotation: Option<Quat>,
    /// Per-tick displacement extracted from the current animation.
    pub root_motion: Option<Vec3>,
}

/// A server-forced correction delivered over the reliable path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateOverride {
    /// Monotonic per entity. Newer ids supersede older ones.
    pub id: u32,
    /// Tick on the entity's timeline the override applies to.
    pub tick: Tick,
    pub position: Vec3,
    pub rotation: Quat,
}

impl StateOverride {
    pub fn to_state(&self) -> StatePayload {
        StatePayload::spawn(self.tick, self.position, self.rotation)
    }
}

/// Another client's entity as seen in the world broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub id: u32,
    pub tick: Tick,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
}
