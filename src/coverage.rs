//! Relating a waypoint plan back to the map: nearest-keyframe matching and
//! spacing statistics.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::keyframe::Position;
use crate::waypoint::Waypoint;

/// Nearest keyframe of one waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaypointMatch {
    pub waypoint_id: u64,
    pub keyframe_id: u64,
    pub distance: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchReport {
    /// Waypoints whose nearest keyframe lies within the distance limit.
    pub matched: Vec<WaypointMatch>,
    /// Waypoints with no keyframe close enough.
    pub unmatched: Vec<u64>,
    /// Sorted, deduplicated ids of matched keyframes.
    pub keyframe_ids: Vec<u64>,
}

impl MatchReport {
    pub fn success_rate(&self) -> f64 {
        let total = self.matched.len() + self.unmatched.len();
        if total == 0 {
            return 0.0;
        }
        self.matched.len() as f64 / total as f64
    }
}

/// Pairs each waypoint with its nearest keyframe if that keyframe lies within
/// `max_distance`. Equidistant keyframes resolve to the lowest id.
pub fn match_waypoints(
    waypoints: &[Waypoint],
    keyframes: &[(u64, Position)],
    max_distance: f64,
) -> MatchReport {
    let mut report = MatchReport::default();
    let mut ids = BTreeSet::new();

    for w in waypoints {
        let nearest = keyframes
            .iter()
            .map(|(id, p)| (*id, w.position.distance(p)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        match nearest {
            Some((keyframe_id, distance)) if distance <= max_distance => {
                ids.insert(keyframe_id);
                report.matched.push(WaypointMatch {
                    waypoint_id: w.id,
                    keyframe_id,
                    distance,
                });
            }
            _ => report.unmatched.push(w.id),
        }
    }

    report.keyframe_ids = ids.into_iter().collect();
    report
}

/// Spacing between consecutive waypoints of a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WaypointStatistics {
    pub count: usize,
    pub avg_distance: f64,
    pub min_distance: f64,
    pub max_distance: f64,
}

impl WaypointStatistics {
    pub fn from_waypoints(waypoints: &[Waypoint]) -> Self {
        let gaps: Vec<f64> = waypoints
            .windows(2)
            .map(|pair| pair[0].position.distance(&pair[1].position))
            .collect();

        if gaps.is_empty() {
            return Self {
                count: waypoints.len(),
                ..Default::default()
            };
        }

        Self {
            count: waypoints.len(),
            avg_distance: gaps.iter().sum::<f64>() / gaps.len() as f64,
            min_distance: gaps.iter().copied().fold(f64::INFINITY, f64::min),
            max_distance: gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}
