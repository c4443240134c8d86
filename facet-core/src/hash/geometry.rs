//! Hashable encodings of geometric primitives.
//!
//! `f64` has no `Hash` impl, so scalars go through [`Scalar`], which hashes a
//! canonical bit pattern. Points hash their coordinates in x, y, z order.
//! Transforms hash the 3x4 matrix column by column, then the scale factor.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}

/// A double compared and hashed by canonical bit pattern.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Scalar(pub f64);

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        canonical_bits(self.0) == canonical_bits(other.0)
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write(&canonical_bits(self.0).to_le_bytes());
    }
}

/// A point (or vector) in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ORIGIN: Point3 = Point3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Hash for Point3 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Scalar(self.x).hash(state);
        Scalar(self.y).hash(state);
        Scalar(self.z).hash(state);
    }
}

/// An affine placement: a 3x4 matrix (rotation plus translation column) and
/// a uniform scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub matrix: [[f64; 4]; 3],
    pub scale: f64,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            scale: 1.0,
        }
    }

    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        let mut t = Self::identity();
        t.matrix[0][3] = dx;
        t.matrix[1][3] = dy;
        t.matrix[2][3] = dz;
        t
    }

    /// The translation column.
    pub fn offset(&self) -> Point3 {
        Point3::new(self.matrix[0][3], self.matrix[1][3], self.matrix[2][3])
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Hash for Transform {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for c in 0..4 {
            for r in 0..3 {
                Scalar(self.matrix[r][c]).hash(state);
            }
        }
        Scalar(self.scale).hash(state);
    }
}
