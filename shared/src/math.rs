use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

///Represents a vector in 2D space.
/// Used for the stick-style move input: x is strafe, y is forward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    ///Returns the vector with non-finite components replaced by zero.
    pub fn sanitized(&self) -> Vec2 {
        if self.is_finite() {
            *self
        } else {
            Vec2::ZERO
        }
    }
}

///Represents a vector in 3D space.
/// Y is up, the ground plane is XZ.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
    pub const UP: Vec3 = Vec3 {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };
    pub const DOWN: Vec3 = Vec3 {
        x: 0.0,
        y: -1.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    ///Returns the normalized vector, or zero for a zero-length vector.
    pub fn normalize(&self) -> Vec3 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vec3::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vec3 {
        Vec3 {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    ///Returns the vector shortened to at most `max` in length.
    pub fn clamp_magnitude(&self, max: f32) -> Vec3 {
        let mag = self.magnitude();
        if mag > max && mag > 0.0 {
            self.scale(max / mag)
        } else {
            *self
        }
    }

    ///Returns the vector with its vertical component removed.
    pub fn horizontal(&self) -> Vec3 {
        Vec3 {
            x: self.x,
            y: 0.0,
            z: self.z,
        }
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*self - *other).magnitude()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    ///Moves the vector toward zero by at most `delta` in length.
    pub fn move_toward_zero(&self, delta: f32) -> Vec3 {
        let mag = self.magnitude();
        if mag <= delta || mag == 0.0 {
            Vec3::ZERO
        } else {
            self.scale((mag - delta) / mag)
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, other: Vec3) {
        *self = *self + other;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, scalar: f32) -> Vec3 {
        self.scale(scalar)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;

    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

///Unit quaternion describing an orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    ///Rotation of `radians` around the up axis.
    /// A yaw of zero faces +X for a move vector of (1, 0).
    pub fn from_yaw(radians: f32) -> Quat {
        let half = radians * 0.5;
        Quat::new(0.0, half.sin(), 0.0, half.cos())
    }

    pub fn dot(&self, other: &Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    ///Returns the normalized quaternion, or `None` if it is degenerate.
    pub fn try_normalize(&self) -> Option<Quat> {
        if !self.is_finite() {
            return None;
        }
        let len = self.dot(self).sqrt();
        if len < 1e-6 {
            return None;
        }
        let inv = 1.0 / len;
        Some(Quat::new(
            self.x * inv,
            self.y * inv,
            self.z * inv,
            self.w * inv,
        ))
    }

    ///Rotates a vector by this quaternion.
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        let axis = Vec3::new(self.x, self.y, self.z);
        let t = axis.cross(&v).scale(2.0);
        v + t.scale(self.w) + axis.cross(&t)
    }

    ///Hamilton product `self * other`.
    pub fn mul(&self, other: &Quat) -> Quat {
        Quat::new(
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        )
    }

    ///Smallest angle between two orientations, in degrees.
    pub fn angle_to(&self, other: &Quat) -> f32 {
        let d = self.dot(other).abs().min(1.0);
        (2.0 * d.acos()).to_degrees()
    }
}
