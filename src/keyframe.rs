//! Keyframe records handed over by map extraction, and the position record
//! used on every output surface.

use image::DynamicImage;
use nalgebra::{Quaternion, Vector3};
use serde::{Deserialize, Serialize};

/// A point in the map frame with named axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    /// False when any coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Euclidean distance to another position.
    pub fn distance(&self, other: &Position) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }
}

impl From<Vector3<f64>> for Position {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<[f64; 3]> for Position {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// One finalized keyframe of a mapping run.
///
/// The record is never mutated by the engine. `orientation` is kept as a raw
/// quaternion so that a non-unit value coming out of map extraction can be
/// reported instead of being silently renormalized.
#[derive(Debug, Clone)]
pub struct KeyframeRecord {
    pub id: u64,
    pub position: Vector3<f64>,
    pub orientation: Quaternion<f64>,
    pub image: DynamicImage,
}

impl KeyframeRecord {
    /// Builds a record from plain arrays. The quaternion is given in
    /// `[x, y, z, w]` order, as SLAM map files store it.
    pub fn new(
        id: u64,
        position: [f64; 3],
        orientation_xyzw: [f64; 4],
        image: DynamicImage,
    ) -> Self {
        let [qx, qy, qz, qw] = orientation_xyzw;
        Self {
            id,
            position: Vector3::from(position),
            orientation: Quaternion::new(qw, qx, qy, qz),
            image,
        }
    }

    pub fn position(&self) -> Position {
        Position::from(self.position)
    }

    /// False when any coordinate is NaN or infinite.
    pub fn has_finite_position(&self) -> bool {
        self.position.iter().all(|c| c.is_finite())
    }
}
