//! # Position Score
//!
//! Rates how far a keyframe sits from a reference keyframe with an
//! unnormalized Gaussian kernel:
//!
//! ```text
//! score = exp(-d² / (2σ²))
//! ```
//!
//! | distance | score (σ = 2 m) |
//! |----------|-----------------|
//! | 0 m      | 1.0000          |
//! | 2 m      | 0.6065          |
//! | 4 m      | 0.1353          |
//! | 6 m      | 0.0111          |
//!
//! The kernel saturates on its own at both ends, so no clamping is needed.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default characteristic map length scale in meters.
pub const DEFAULT_SIGMA: f64 = 2.0;

/// Distances listed by [`distance_score_table`].
const TABLE_DISTANCES: [f64; 10] = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0];

/// Which keyframe a position is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionReference {
    /// Every keyframe against the first keyframe of the batch.
    #[default]
    FirstKeyframe,
    /// Every keyframe against its predecessor in the batch.
    PreviousKeyframe,
}

/// Rejects a non-positive or non-finite sigma.
pub fn validate_sigma(sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::config(format!("sigma must be positive, got {sigma}")));
    }
    Ok(())
}

/// Gaussian novelty score of `current` relative to `reference`.
pub fn position_score(current: &Vector3<f64>, reference: &Vector3<f64>, sigma: f64) -> Result<f64> {
    validate_sigma(sigma)?;
    Ok(kernel((current - reference).norm(), sigma))
}

/// Scores a whole sequence of positions under the given reference policy.
///
/// With [`PositionReference::PreviousKeyframe`] the first position has no
/// predecessor and is compared with itself.
pub fn position_scores(
    positions: &[Vector3<f64>],
    reference: PositionReference,
    sigma: f64,
) -> Result<Vec<f64>> {
    validate_sigma(sigma)?;
    let Some(first) = positions.first() else {
        return Ok(Vec::new());
    };

    let scores = positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let anchor = match reference {
                PositionReference::FirstKeyframe => first,
                PositionReference::PreviousKeyframe => &positions[i.saturating_sub(1)],
            };
            kernel((p - anchor).norm(), sigma)
        })
        .collect();

    Ok(scores)
}

/// `(distance, score)` pairs for a fixed set of distances, scores rounded to
/// four decimals. Handy for documenting a chosen sigma.
pub fn distance_score_table(sigma: f64) -> Result<Vec<(f64, f64)>> {
    validate_sigma(sigma)?;
    Ok(TABLE_DISTANCES
        .iter()
        .map(|&d| (d, (kernel(d, sigma) * 1e4).round() / 1e4))
        .collect())
}

#[inline]
fn kernel(distance: f64, sigma: f64) -> f64 {
    (-(distance * distance) / (2.0 * sigma * sigma)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_distance_scores_one() {
        let p = Vector3::new(1.0, -2.0, 3.0);
        assert_eq!(position_score(&p, &p, DEFAULT_SIGMA).unwrap(), 1.0);
    }

    #[test]
    fn test_two_meters_at_default_sigma() {
        let a = Vector3::new(0.0, 0.0, 0.0);
        let b = Vector3::new(2.0, 0.0, 0.0);
        let score = position_score(&b, &a, 2.0).unwrap();
        assert_relative_eq!(score, (-0.5f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(score, 0.6065, epsilon = 1e-4);
    }

    #[test]
    fn test_monotone_and_symmetric() {
        let origin = Vector3::zeros();
        let mut last = 1.0;
        for step in 1..50 {
            let p = Vector3::new(step as f64 * 0.25, 0.0, 0.0);
            let score = position_score(&p, &origin, 1.5).unwrap();
            assert!(score <= last);
            assert!(score > 0.0);
            assert_eq!(score, position_score(&origin, &p, 1.5).unwrap());
            last = score;
        }
        let far = Vector3::new(1e3, 0.0, 0.0);
        assert!(position_score(&far, &origin, 2.0).unwrap() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_sigma() {
        let p = Vector3::zeros();
        assert!(matches!(position_score(&p, &p, 0.0), Err(Error::InvalidConfig(_))));
        assert!(matches!(position_score(&p, &p, -1.0), Err(Error::InvalidConfig(_))));
        assert!(matches!(position_score(&p, &p, f64::NAN), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_reference_policies() {
        let positions = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(2.0, 0.0, 0.0),
            Vector3::new(4.0, 0.0, 0.0),
        ];

        let first = position_scores(&positions, PositionReference::FirstKeyframe, 2.0).unwrap();
        assert_eq!(first[0], 1.0);
        assert_relative_eq!(first[1], (-0.5f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(first[2], (-2.0f64).exp(), epsilon = 1e-12);

        let prev = position_scores(&positions, PositionReference::PreviousKeyframe, 2.0).unwrap();
        assert_eq!(prev[0], 1.0);
        assert_relative_eq!(prev[1], (-0.5f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(prev[2], (-0.5f64).exp(), epsilon = 1e-12);

        assert!(position_scores(&[], PositionReference::FirstKeyframe, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_distance_table() {
        let table = distance_score_table(2.0).unwrap();
        assert_eq!(table.len(), 10);
        assert_eq!(table[0], (0.0, 1.0));
        assert_eq!(table[4], (2.0, 0.6065));
        assert_eq!(table[7], (4.0, 0.1353));
    }
}
