//! # Direction Score
//!
//! Rates how well a keyframe's viewing direction agrees with a reference
//! direction. The camera looks down its local `+Z` axis; the orientation
//! rotates that axis into the map frame and the cosine similarity with the
//! reference is remapped linearly from `[-1, 1]` onto `[0, 1]`:
//!
//! | separation | cosine | score |
//! |------------|--------|-------|
//! | 0°         | 1      | 1.0   |
//! | 90°        | 0      | 0.5   |
//! | 180°       | -1     | 0.0   |

use nalgebra::{Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default allowed deviation of the quaternion norm from 1.
pub const DEFAULT_QUATERNION_TOLERANCE: f64 = 1e-3;

/// Below this displacement two positions are treated as coincident.
const MIN_MOVEMENT: f64 = 1e-6;

/// Where the reference direction comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DirectionReference {
    /// One direction for the whole batch.
    Fixed { x: f64, y: f64, z: f64 },
    /// Direction of travel from the previous keyframe.
    #[default]
    Movement,
}

impl DirectionReference {
    /// Rejects a zero-length fixed direction.
    pub fn validate(&self) -> Result<()> {
        if let DirectionReference::Fixed { x, y, z } = *self {
            let norm = Vector3::new(x, y, z).norm();
            if !norm.is_finite() || norm < MIN_MOVEMENT {
                return Err(Error::config("fixed reference direction must have non-zero length"));
            }
        }
        Ok(())
    }

    /// Reference direction for a keyframe at `current` whose predecessor (in
    /// batch order) sits at `previous`. `None` means the keyframe has nothing
    /// to be compared against and scores 1.0.
    pub fn resolve(
        &self,
        previous: Option<&Vector3<f64>>,
        current: &Vector3<f64>,
    ) -> Option<Vector3<f64>> {
        match *self {
            DirectionReference::Fixed { x, y, z } => Some(Vector3::new(x, y, z)),
            DirectionReference::Movement => previous.map(|p| movement_direction(p, current)),
        }
    }
}

/// Checks that `q` is a unit quaternion within `tolerance` and returns it as
/// a rotation.
pub fn unit_orientation(
    keyframe_id: u64,
    q: &Quaternion<f64>,
    tolerance: f64,
) -> Result<UnitQuaternion<f64>> {
    let norm = q.norm();
    if !norm.is_finite() || (norm - 1.0).abs() > tolerance {
        return Err(Error::input(
            keyframe_id,
            format!("quaternion norm {norm:.6} deviates from 1 by more than {tolerance}"),
        ));
    }
    Ok(UnitQuaternion::from_quaternion(*q))
}

/// Camera forward axis (`+Z`) expressed in the map frame.
pub fn forward_vector(orientation: &UnitQuaternion<f64>) -> Vector3<f64> {
    orientation * Vector3::z()
}

/// Unit vector pointing from `from` to `to`, or `+Z` when they coincide.
pub fn movement_direction(from: &Vector3<f64>, to: &Vector3<f64>) -> Vector3<f64> {
    let delta = to - from;
    let norm = delta.norm();
    if norm < MIN_MOVEMENT {
        return Vector3::z();
    }
    delta / norm
}

/// Direction agreement score in `[0, 1]`.
///
/// `reference` need not be normalized but must not be zero.
pub fn direction_score(orientation: &UnitQuaternion<f64>, reference: &Vector3<f64>) -> Result<f64> {
    let norm = reference.norm();
    if !norm.is_finite() || norm < MIN_MOVEMENT {
        return Err(Error::config("reference direction must have non-zero length"));
    }
    let cos = forward_vector(orientation).dot(&(reference / norm)).clamp(-1.0, 1.0);
    Ok((cos + 1.0) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn identity() -> UnitQuaternion<f64> {
        let q = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        unit_orientation(0, &q, DEFAULT_QUATERNION_TOLERANCE).unwrap()
    }

    #[test]
    fn test_identity_looks_along_reference() {
        let score = direction_score(&identity(), &Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert_abs_diff_eq!(score, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_right_angle_and_opposite() {
        let quarter = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI / 2.0);
        let half = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), PI);
        let reference = Vector3::new(0.0, 0.0, 1.0);

        assert_abs_diff_eq!(direction_score(&quarter, &reference).unwrap(), 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(direction_score(&half, &reference).unwrap(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_monotone_in_separation() {
        let reference = Vector3::new(0.0, 0.0, 1.0);
        let mut last = f64::INFINITY;
        for deg in 0..=180 {
            let angle = (deg as f64).to_radians();
            let q = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle);
            let score = direction_score(&q, &reference).unwrap();
            assert!(score <= last + 1e-12, "score rose at {deg}°");
            assert!((0.0..=1.0).contains(&score));
            last = score;
        }
    }

    #[test]
    fn test_non_unit_quaternion_rejected() {
        let q = Quaternion::new(1.2, 0.0, 0.0, 0.0);
        let err = unit_orientation(42, &q, DEFAULT_QUATERNION_TOLERANCE).unwrap_err();
        assert!(matches!(err, Error::InvalidInput { keyframe_id: 42, .. }));

        let close = Quaternion::new(1.0005, 0.0, 0.0, 0.0);
        assert!(unit_orientation(1, &close, DEFAULT_QUATERNION_TOLERANCE).is_ok());
    }

    #[test]
    fn test_zero_reference_rejected() {
        assert!(matches!(
            direction_score(&identity(), &Vector3::zeros()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(DirectionReference::Fixed { x: 0.0, y: 0.0, z: 0.0 }.validate().is_err());
        assert!(DirectionReference::Movement.validate().is_ok());
    }

    #[test]
    fn test_movement_reference() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(0.0, 0.0, 3.0);

        assert_eq!(DirectionReference::Movement.resolve(None, &a), None);
        assert_eq!(DirectionReference::Movement.resolve(Some(&a), &b), Some(Vector3::z()));
        assert_eq!(movement_direction(&a, &a), Vector3::z());

        let fixed = DirectionReference::Fixed { x: 1.0, y: 0.0, z: 0.0 };
        assert_eq!(fixed.resolve(None, &a), Some(Vector3::x()));
    }

    #[test]
    fn test_reference_serde() {
        let json = r#"{"mode":"fixed","x":0.0,"y":0.0,"z":1.0}"#;
        let parsed: DirectionReference = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, DirectionReference::Fixed { x: 0.0, y: 0.0, z: 1.0 });

        let movement: DirectionReference = serde_json::from_str(r#"{"mode":"movement"}"#).unwrap();
        assert_eq!(movement, DirectionReference::Movement);
    }
}
