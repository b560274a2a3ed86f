//! Read-only collision queries consumed by the movement step.
//!
//! [`WorldQueries`] is the seam: the simulator only ever asks it questions.
//! [`CollisionWorld`] is the implementation both binaries use: a ground
//! plane, static boxes and a per-tick snapshot of dynamic colliders (other
//! entities). It is rebuilt between ticks and never mutated during one.

use crate::math::Vec3;
use crate::types::RemoteEntity;
use serde::{Deserialize, Serialize};

/// Result of a successful ray or sweep query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
}

/// Synchronous collision queries. Directions are expected to be unit length.
///
/// Implementations must answer identically for identical arguments; any
/// difference between client and server answers becomes a misprediction.
pub trait WorldQueries {
    /// Casts a ray against static geometry.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit>;

    /// Sweeps a vertical capsule of `radius` against dynamic colliders.
    fn sweep(&self, origin: Vec3, direction: Vec3, max_distance: f32, radius: f32)
        -> Option<RayHit>;
}

///Axis-aligned box of static geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    ///Builds a box from its center and full size.
    pub fn from_center(center: Vec3, size: Vec3) -> Self {
        let half = size.scale(0.5);
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    ///Slab test. Rays starting inside the box do not hit it.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        if self.contains(origin) {
            return None;
        }

        let origin_axes = [origin.x, origin.y, origin.z];
        let dir_axes = [direction.x, direction.y, direction.z];
        let min_axes = [self.min.x, self.min.y, self.min.z];
        let max_axes = [self.max.x, self.max.y, self.max.z];

        let mut t_enter = 0.0f32;
        let mut t_exit = max_distance;
        let mut enter_axis = None;
        let mut enter_sign = 0.0f32;

        for axis in 0..3 {
            let o = origin_axes[axis];
            let d = dir_axes[axis];
            if d.abs() < 1e-8 {
                if o < min_axes[axis] || o > max_axes[axis] {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t0 = (min_axes[axis] - o) * inv;
            let mut t1 = (max_axes[axis] - o) * inv;
            // Entering through the min face means the normal points negative
            let mut sign = -1.0;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
                sign = 1.0;
            }
            if t0 > t_enter {
                t_enter = t0;
                enter_axis = Some(axis);
                enter_sign = sign;
            }
            t_exit = t_exit.min(t1);
            if t_enter > t_exit {
                return None;
            }
        }

        let axis = enter_axis?;
        let mut normal = [0.0f32; 3];
        normal[axis] = enter_sign;

        Some(RayHit {
            point: origin + direction.scale(t_enter),
            normal: Vec3::new(normal[0], normal[1], normal[2]),
            distance: t_enter,
        })
    }
}

/// Another entity as an obstacle for this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicCollider {
    pub id: u32,
    /// Feet position.
    pub position: Vec3,
    pub radius: f32,
    pub height: f32,
}

impl DynamicCollider {
    fn sweep(&self, origin: Vec3, direction: Vec3, max_distance: f32, radius: f32) -> Option<RayHit> {
        // Vertical extents must overlap
        if origin.y + self.height <= self.position.y || self.position.y + self.height <= origin.y {
            return None;
        }

        let combined = self.radius + radius;
        let ox = origin.x - self.position.x;
        let oz = origin.z - self.position.z;
        let dx = direction.x;
        let dz = direction.z;

        let c = ox * ox + oz * oz - combined * combined;
        if c <= 0.0 {
            // Already touching
            let away = Vec3::new(ox, 0.0, oz).normalize();
            let normal = if away == Vec3::ZERO {
                -direction.horizontal().normalize()
            } else {
                away
            };
            return Some(RayHit {
                point: origin,
                normal,
                distance: 0.0,
            });
        }

        let a = dx * dx + dz * dz;
        if a < 1e-8 {
            return None;
        }
        let b = ox * dx + oz * dz;
        let discriminant = b * b - a * c;
        if discriminant < 0.0 {
            return None;
        }

        let t = (-b - discriminant.sqrt()) / a;
        if t < 0.0 || t > max_distance {
            return None;
        }

        let contact = Vec3::new(ox + dx * t, 0.0, oz + dz * t);
        Some(RayHit {
            point: origin + direction.scale(t),
            normal: contact.scale(1.0 / combined),
            distance: t,
        })
    }
}

/// Static level geometry plus this tick's dynamic colliders.
#[derive(Debug, Clone, Default)]
pub struct CollisionWorld {
    /// Height of the infinite ground plane, if there is one.
    pub ground_height: Option<f32>,
    pub boxes: Vec<Aabb>,
    colliders: Vec<DynamicCollider>,
}

impl CollisionWorld {
    /// Empty world with a ground plane at `y = 0`.
    pub fn flat() -> Self {
        Self {
            ground_height: Some(0.0),
            boxes: Vec::new(),
            colliders: Vec::new(),
        }
    }

    pub fn with_box(mut self, aabb: Aabb) -> Self {
        self.boxes.push(aabb);
        self
    }

    /// A small arena: ground, four walls and a couple of steps to climb.
    pub fn arena() -> Self {
        let mut world = CollisionWorld::flat();
        let wall = Vec3::new(1.0, 4.0, 42.0);
        world.boxes.push(Aabb::from_center(Vec3::new(-20.5, 2.0, 0.0), wall));
        world.boxes.push(Aabb::from_center(Vec3::new(20.5, 2.0, 0.0), wall));
        let wall = Vec3::new(42.0, 4.0, 1.0);
        world.boxes.push(Aabb::from_center(Vec3::new(0.0, 2.0, -20.5), wall));
        world.boxes.push(Aabb::from_center(Vec3::new(0.0, 2.0, 20.5), wall));
        world.boxes.push(Aabb::new(Vec3::new(4.0, 0.0, -3.0), Vec3::new(8.0, 0.25, 3.0)));
        world.boxes.push(Aabb::new(Vec3::new(5.0, 0.25, -3.0), Vec3::new(8.0, 0.5, 3.0)));
        world
    }

    /// Replaces the dynamic colliders. Sorted by id so every query walks
    /// them in the same order.
    pub fn set_colliders(&mut self, mut colliders: Vec<DynamicCollider>) {
        colliders.sort_by_key(|collider| collider.id);
        self.colliders = colliders;
    }

    /// Rebuilds the dynamic colliders from replicated entities.
    pub fn set_remote_entities(&mut self, entities: &[RemoteEntity], radius: f32, height: f32) {
        let colliders = entities
            .iter()
            .map(|entity| DynamicCollider {
                id: entity.id,
                position: entity.position,
                radius,
                height,
            })
            .collect();
        self.set_colliders(colliders);
    }

    pub fn colliders(&self) -> &[DynamicCollider] {
        &self.colliders
    }

    /// Query view that ignores the entity `id`, so nobody collides with
    /// themselves.
    pub fn view_for(&self, id: u32) -> EntityView<'_> {
        EntityView {
            world: self,
            exclude: Some(id),
        }
    }

    fn sweep_excluding(
        &self,
        exclude: Option<u32>,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        radius: f32,
    ) -> Option<RayHit> {
        let mut nearest: Option<RayHit> = None;
        for collider in &self.colliders {
            if Some(collider.id) == exclude {
                continue;
            }
            if let Some(hit) = collider.sweep(origin, direction, max_distance, radius) {
                if nearest.map_or(true, |best| hit.distance < best.distance) {
                    nearest = Some(hit);
                }
            }
        }
        nearest
    }

    fn ground_hit(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let height = self.ground_height?;
        if direction.y >= 0.0 || origin.y < height {
            return None;
        }
        let t = (height - origin.y) / direction.y;
        if t > max_distance {
            return None;
        }
        Some(RayHit {
            point: origin + direction.scale(t),
            normal: Vec3::UP,
            distance: t,
        })
    }
}

impl WorldQueries for CollisionWorld {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let mut nearest = self.ground_hit(origin, direction, max_distance);
        for aabb in &self.boxes {
            if let Some(hit) = aabb.raycast(origin, direction, max_distance) {
                if nearest.map_or(true, |best| hit.distance < best.distance) {
                    nearest = Some(hit);
                }
            }
        }
        nearest
    }

    fn sweep(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        radius: f32,
    ) -> Option<RayHit> {
        self.sweep_excluding(None, origin, direction, max_distance, radius)
    }
}

/// A [`CollisionWorld`] seen by one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    world: &'a CollisionWorld,
    exclude: Option<u32>,
}

impl WorldQueries for EntityView<'_> {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        self.world.raycast(origin, direction, max_distance)
    }

    fn sweep(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        radius: f32,
    ) -> Option<RayHit> {
        self.world
            .sweep_excluding(self.exclude, origin, direction, max_distance, radius)
    }
}
