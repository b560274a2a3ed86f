//! Deterministic single-tick movement step.
//!
//! [`MovementSimulator::step`] is the one function both the predicting client
//! and the authoritative server run. It reads nothing but its arguments: no
//! clocks, no randomness, no global state. Evaluation order is fixed, so the
//! same arguments give bit-identical results on both ends.

use crate::config::MovementConfig;
use crate::math::{Quat, Vec2, Vec3};
use crate::types::{GameplayState, InputSample, StatePayload, Transform};
use crate::world::WorldQueries;

/// Clearance kept between the body and static geometry.
const WALL_SKIN: f32 = 0.05;

/// How far past a ledge face the step-top ray is cast.
const STEP_INSET: f32 = 0.02;

/// Surface normals steeper than this count as walls.
const WALL_NORMAL_MAX_Y: f32 = 0.7;

/// Ground ray offsets, in units of half the capsule radius. Center first.
const FOOTPRINT: [(f32, f32); 5] = [(0.0, 0.0), (1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0)];

/// How the entity moves this tick, resolved once from the gameplay flags.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementMode {
    /// Dead or otherwise terminal: nothing moves.
    Frozen,
    /// Carried by another entity.
    Grabbed { holder: Transform },
    /// Animation dictates the displacement.
    RootMotion { displacement: Vec3, rotation: Quat },
    /// Input-driven movement. A rooted entity turns but does not walk.
    Free { rotation: Quat, rooted: bool },
}

impl MovementMode {
    /// Picks the first matching mode in priority order.
    pub fn resolve(gameplay: &GameplayState, orientation: Quat) -> MovementMode {
        if gameplay.dead {
            return MovementMode::Frozen;
        }
        if let Some(holder) = gameplay.grabbed_by {
            return MovementMode::Grabbed { holder };
        }
        if let Some(displacement) = gameplay.root_motion {
            let rotation = gameplay
                .ailment_rotation
                .and_then(|rotation| rotation.try_normalize())
                .unwrap_or(orientation);
            return MovementMode::RootMotion {
                displacement,
                rotation,
            };
        }
        MovementMode::Free {
            rotation: orientation,
            rooted: gameplay.rooted,
        }
    }
}

/// Advances one entity by exactly one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementSimulator {
    config: MovementConfig,
    dt: f32,
}

impl MovementSimulator {
    pub fn new(config: MovementConfig, dt: f32) -> Self {
        Self { config, dt }
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Produces the state for `input.tick` from the state of the tick before.
    ///
    /// Never fails: non-finite input is replaced by a zero move vector and a
    /// degenerate orientation by the prior rotation.
    pub fn step<W: WorldQueries + ?Sized>(
        &self,
        prior: &StatePayload,
        input: &InputSample,
        gameplay: &GameplayState,
        world: &W,
    ) -> StatePayload {
        let move_vector = input.move_vector.sanitized();
        let prior_rotation = prior.rotation.try_normalize().unwrap_or(Quat::IDENTITY);
        let orientation = input.orientation.try_normalize().unwrap_or(prior_rotation);
        let origin = if prior.position.is_finite() {
            prior.position
        } else {
            Vec3::ZERO
        };
        let prior_velocity = if prior.velocity.is_finite() {
            prior.velocity
        } else {
            Vec3::ZERO
        };

        let mut next = StatePayload {
            tick: input.tick,
            move_vector,
            position: origin,
            velocity: Vec3::ZERO,
            rotation: prior_rotation,
            used_root_motion: false,
        };

        match MovementMode::resolve(gameplay, orientation) {
            MovementMode::Frozen => {}
            MovementMode::Grabbed { holder } => {
                let rotation = holder.rotation.try_normalize().unwrap_or(Quat::IDENTITY);
                next.position = holder.position + rotation.rotate(self.config.grab_offset);
                next.rotation = rotation;
            }
            MovementMode::RootMotion {
                displacement,
                rotation,
            } => {
                let displacement = if displacement.is_finite() {
                    displacement.horizontal()
                } else {
                    Vec3::ZERO
                };
                let desired = displacement.scale(self.config.root_motion_speed / self.dt);
                let (position, velocity) = self.integrate(origin, prior_velocity, desired, world);
                next.position = position;
                next.velocity = velocity;
                next.rotation = rotation;
                next.used_root_motion = true;
            }
            MovementMode::Free { rotation, rooted } => {
                let desired = if rooted {
                    Vec3::ZERO
                } else {
                    self.desired_velocity(move_vector, rotation)
                };
                let (position, velocity) = self.integrate(origin, prior_velocity, desired, world);
                next.position = position;
                next.velocity = velocity;
                next.rotation = rotation;
            }
        }

        next
    }

    /// World-space run velocity for a stick input under `orientation`.
    pub fn desired_velocity(&self, move_vector: Vec2, orientation: Quat) -> Vec3 {
        let local = Vec3::new(move_vector.x, 0.0, move_vector.y);
        orientation
            .rotate(local)
            .horizontal()
            .clamp_magnitude(1.0)
            .scale(self.config.run_speed)
    }

    /// Height of the highest walkable surface under the capsule footprint, if
    /// one is close enough to stand on.
    pub fn ground_height<W: WorldQueries + ?Sized>(&self, position: Vec3, world: &W) -> Option<f32> {
        let reach = self.config.ground_snap_distance;
        let spread = self.config.capsule_radius * 0.5;
        let mut ground: Option<f32> = None;
        for (dx, dz) in FOOTPRINT {
            let origin = position + Vec3::new(dx * spread, reach, dz * spread);
            let hit = world
                .raycast(origin, Vec3::DOWN, reach * 2.0)
                .filter(|hit| hit.normal.y > WALL_NORMAL_MAX_Y);
            if let Some(hit) = hit {
                ground = Some(ground.map_or(hit.point.y, |best| best.max(hit.point.y)));
            }
        }
        ground
    }

    /// Horizontal steering plus vertical integration.
    fn integrate<W: WorldQueries + ?Sized>(
        &self,
        origin: Vec3,
        prior_velocity: Vec3,
        desired: Vec3,
        world: &W,
    ) -> (Vec3, Vec3) {
        match self.ground_height(origin, world) {
            Some(ground) => {
                let (horizontal, lift) = self.steer(origin, desired, world, true);
                let mut position = origin + horizontal.scale(self.dt);
                position.y = if lift > 0.0 { origin.y + lift } else { ground };
                let mut velocity = horizontal;
                // Vertical velocity only carries the stair lift
                velocity.y = if lift > 0.0 { lift / self.dt } else { 0.0 };
                (position, velocity)
            }
            None => {
                let drift = prior_velocity
                    .horizontal()
                    .move_toward_zero(self.config.air_drag * self.dt);
                let (horizontal, _) = self.steer(origin, drift, world, false);
                let vertical = prior_velocity.y - self.config.gravity * self.dt;
                let mut position = origin + horizontal.scale(self.dt);
                position.y += vertical * self.dt;
                let mut velocity = horizontal;
                velocity.y = vertical;

                if vertical <= 0.0 {
                    if let Some(ground) = self.landing_height(origin, position, world) {
                        position.y = ground;
                        velocity.y = 0.0;
                    }
                }
                (position, velocity)
            }
        }
    }

    /// Surface crossed while falling from `from` to `to`.
    fn landing_height<W: WorldQueries + ?Sized>(&self, from: Vec3, to: Vec3, world: &W) -> Option<f32> {
        let reach = self.config.ground_snap_distance;
        let start = Vec3::new(to.x, from.y + reach, to.z);
        let depth = start.y - to.y;
        world
            .raycast(start, Vec3::DOWN, depth)
            .filter(|hit| hit.normal.y > WALL_NORMAL_MAX_Y)
            .map(|hit| hit.point.y)
    }

    /// Applies collision avoidance, stair assist and wall sliding to a
    /// horizontal velocity. Returns the adjusted velocity and the lift to
    /// apply this tick.
    fn steer<W: WorldQueries + ?Sized>(
        &self,
        origin: Vec3,
        horizontal: Vec3,
        world: &W,
        grounded: bool,
    ) -> (Vec3, f32) {
        let speed = horizontal.magnitude();
        if speed == 0.0 {
            return (Vec3::ZERO, 0.0);
        }
        let direction = horizontal.scale(1.0 / speed);
        let travel = speed * self.dt;

        if self.head_on_collision(origin, direction, travel, world) {
            return (Vec3::ZERO, 0.0);
        }

        let ankle = origin + Vec3::UP.scale(self.config.ankle_height);
        let reach = travel + WALL_SKIN;
        let Some(hit) = world.raycast(ankle, direction, reach) else {
            return (horizontal, 0.0);
        };
        if hit.normal.y > WALL_NORMAL_MAX_Y {
            return (horizontal, 0.0);
        }

        if grounded {
            if let Some(lift) = self.step_up(origin, direction, hit.point, reach, world) {
                return (horizontal, lift);
            }
        }

        (slide(horizontal, hit.normal), 0.0)
    }

    /// Cancels motion only when another entity is struck nearly head-on, so
    /// glancing contacts keep moving.
    fn head_on_collision<W: WorldQueries + ?Sized>(
        &self,
        origin: Vec3,
        direction: Vec3,
        travel: f32,
        world: &W,
    ) -> bool {
        match world.sweep(origin, direction, travel, self.config.capsule_radius) {
            Some(hit) => direction.dot(&-hit.normal) >= self.config.avoidance_cos(),
            None => false,
        }
    }

    /// Bounded upward probing over a ledge in front of the entity.
    fn step_up<W: WorldQueries + ?Sized>(
        &self,
        origin: Vec3,
        direction: Vec3,
        face: Vec3,
        reach: f32,
        world: &W,
    ) -> Option<f32> {
        let max_step = self.config.max_step_height;
        if max_step <= 0.0 {
            return None;
        }

        // Something at step height means this is a wall, not a stair
        let head = origin + Vec3::UP.scale(max_step);
        if world.raycast(head, direction, reach).is_some() {
            return None;
        }

        let above_ledge = Vec3::new(face.x, head.y, face.z) + direction.scale(STEP_INSET);
        let top = world
            .raycast(above_ledge, Vec3::DOWN, max_step)
            .filter(|hit| hit.normal.y > WALL_NORMAL_MAX_Y)?;
        let lift = top.point.y - origin.y;
        (lift > 0.0 && lift <= max_step).then_some(lift)
    }
}

/// Removes the part of `velocity` that pushes into a surface.
fn slide(velocity: Vec3, normal: Vec3) -> Vec3 {
    let normal = normal.horizontal().normalize();
    let into = velocity.dot(&normal);
    if into >= 0.0 {
        velocity
    } else {
        velocity - normal.scale(into)
    }
}
