//! # Trajectory Rules
//!
//! Keyframes arrive in the order they were created, so the scored batch is
//! also the camera trajectory. This module holds the rules that work on that
//! order directly instead of on the grid:
//!
//! - [`TrajectorySelection`] picks keyframe ids by index interval, travelled
//!   distance, an axis-aligned region, sharp turns, or evenly spaced
//!   milestones.
//! - [`sample_waypoints`] places waypoints along the trajectory, either on
//!   evenly spaced keyframe indices or at even arc-length steps.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{cell_index, validate_cell_size};
use crate::keyframe::Position;
use crate::waypoint::{Waypoint, WaypointSource};

/// Below this total length a trajectory is treated as standing still.
const MIN_PATH_LENGTH: f64 = 1e-9;

/// Inclusive `[min, max]` bound on one axis.
pub type AxisRange = [f64; 2];

/// A rule that picks keyframes from the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum TrajectorySelection {
    /// Every `interval`-th keyframe, starting with the first.
    Interval { interval: usize },
    /// The first keyframe, then each keyframe at least `target_distance`
    /// meters from the last one kept.
    Distance { target_distance: f64 },
    /// Keyframes inside every given axis range.
    Region {
        #[serde(default)]
        x_range: Option<AxisRange>,
        #[serde(default)]
        y_range: Option<AxisRange>,
        #[serde(default)]
        z_range: Option<AxisRange>,
    },
    /// The `count` keyframes with the largest change of heading in the
    /// horizontal plane, in trajectory order.
    Turns { count: usize },
    /// `count` keyframes at evenly spaced indices.
    Milestones { count: usize },
}

impl TrajectorySelection {
    pub fn validate(&self) -> Result<()> {
        match *self {
            TrajectorySelection::Interval { interval: 0 } => {
                Err(Error::config("interval must be positive"))
            }
            TrajectorySelection::Distance { target_distance }
                if !target_distance.is_finite() || target_distance <= 0.0 =>
            {
                Err(Error::config(format!(
                    "target_distance must be positive, got {target_distance}"
                )))
            }
            TrajectorySelection::Region {
                x_range,
                y_range,
                z_range,
            } => {
                let ranges = [x_range, y_range, z_range];
                if ranges.iter().all(Option::is_none) {
                    return Err(Error::config("region needs at least one axis range"));
                }
                for [min, max] in ranges.into_iter().flatten() {
                    if !min.is_finite() || !max.is_finite() || min > max {
                        return Err(Error::config(format!("invalid axis range [{min}, {max}]")));
                    }
                }
                Ok(())
            }
            TrajectorySelection::Turns { count: 0 }
            | TrajectorySelection::Milestones { count: 0 } => {
                Err(Error::config("count must be positive"))
            }
            _ => Ok(()),
        }
    }

    /// Ids picked from `path`, in trajectory order.
    pub fn select(&self, path: &[(u64, Position)]) -> Result<Vec<u64>> {
        self.validate()?;
        if let Some((id, _)) = path.iter().find(|(_, p)| !p.is_finite()) {
            return Err(Error::input(*id, "position is not finite"));
        }

        let ids = match *self {
            TrajectorySelection::Interval { interval } => {
                path.iter().step_by(interval).map(|(id, _)| *id).collect()
            }
            TrajectorySelection::Distance { target_distance } => {
                by_distance(path, target_distance)
            }
            TrajectorySelection::Region {
                x_range,
                y_range,
                z_range,
            } => path
                .iter()
                .filter(|(_, p)| {
                    within(x_range, p.x) && within(y_range, p.y) && within(z_range, p.z)
                })
                .map(|(id, _)| *id)
                .collect(),
            TrajectorySelection::Turns { count } => by_turns(path, count),
            TrajectorySelection::Milestones { count } => {
                if count >= path.len() {
                    path.iter().map(|(id, _)| *id).collect()
                } else {
                    (0..count).map(|i| path[i * path.len() / count].0).collect()
                }
            }
        };

        Ok(ids)
    }
}

fn within(range: Option<AxisRange>, value: f64) -> bool {
    range.map_or(true, |[min, max]| (min..=max).contains(&value))
}

fn by_distance(path: &[(u64, Position)], target_distance: f64) -> Vec<u64> {
    let Some((first_id, first_pos)) = path.first() else {
        return Vec::new();
    };

    let mut ids = vec![*first_id];
    let mut last = *first_pos;
    for (id, p) in &path[1..] {
        if p.distance(&last) >= target_distance {
            ids.push(*id);
            last = *p;
        }
    }
    ids
}

/// The `count` interior keyframes whose heading changes most. Changes are
/// wrapped into `[0, pi]`.
fn by_turns(path: &[(u64, Position)], count: usize) -> Vec<u64> {
    if path.len() < 3 {
        return path.iter().map(|(id, _)| *id).collect();
    }

    let headings: Vec<f64> = path
        .windows(2)
        .map(|pair| (pair[1].1.y - pair[0].1.y).atan2(pair[1].1.x - pair[0].1.x))
        .collect();

    let mut turns: Vec<(usize, f64)> = headings
        .windows(2)
        .enumerate()
        .map(|(i, pair)| {
            let change = (pair[1] - pair[0]).abs();
            let change = if change > std::f64::consts::PI {
                std::f64::consts::TAU - change
            } else {
                change
            };
            (i + 1, change)
        })
        .collect();

    turns.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut picked: Vec<usize> = turns.into_iter().take(count).map(|(i, _)| i).collect();
    picked.sort_unstable();
    picked.into_iter().map(|i| path[i].0).collect()
}

/// Where trajectory waypoints are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrajectorySampling {
    /// On keyframes at evenly spaced indices.
    Index,
    /// At even steps of travelled distance, interpolated between keyframes.
    #[default]
    ArcLength,
}

/// Places up to `count` waypoints along `path`.
///
/// Waypoints are numbered from 1 and carry the keyframe they were taken from
/// (or the nearer end of the segment they were interpolated on) as
/// `representative_keyframe`. `cell` is the grid cell of `cell_size` holding
/// the waypoint. A trajectory that never moves falls back to index sampling.
pub fn sample_waypoints(
    path: &[(u64, Position)],
    count: usize,
    sampling: TrajectorySampling,
    cell_size: f64,
) -> Result<Vec<Waypoint>> {
    validate_cell_size(cell_size)?;
    if count == 0 {
        return Err(Error::config("waypoint count must be positive"));
    }
    if path.is_empty() {
        return Err(Error::EmptyInput);
    }
    if let Some((id, _)) = path.iter().find(|(_, p)| !p.is_finite()) {
        return Err(Error::input(*id, "position is not finite"));
    }

    let samples = match sampling {
        TrajectorySampling::Index => index_samples(path, count),
        TrajectorySampling::ArcLength => arc_length_samples(path, count),
    };

    Ok(samples
        .into_iter()
        .zip(1u64..)
        .map(|((position, keyframe_id), id)| Waypoint {
            id,
            position,
            cell: cell_index(&position.to_vector(), cell_size),
            source: WaypointSource::Generated,
            representative_keyframe: Some(keyframe_id),
        })
        .collect())
}

/// `count` evenly spaced values from `start` to `end`, both included.
fn linspace(start: f64, end: f64, count: usize) -> impl Iterator<Item = f64> {
    (0..count).map(move |i| {
        if count == 1 {
            start
        } else if i == count - 1 {
            end
        } else {
            start + (end - start) * i as f64 / (count - 1) as f64
        }
    })
}

/// Keyframe indices spread evenly over the path, rounded half to even and
/// deduplicated.
fn sample_indices(len: usize, count: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = linspace(0.0, (len - 1) as f64, count.min(len))
        .map(|v| v.round_ties_even() as usize)
        .collect();
    indices.dedup();
    indices
}

fn index_samples(path: &[(u64, Position)], count: usize) -> Vec<(Position, u64)> {
    sample_indices(path.len(), count)
        .into_iter()
        .map(|i| (path[i].1, path[i].0))
        .collect()
}

fn arc_length_samples(path: &[(u64, Position)], count: usize) -> Vec<(Position, u64)> {
    let mut travelled = Vec::with_capacity(path.len());
    let mut total = 0.0;
    travelled.push(0.0);
    for pair in path.windows(2) {
        total += pair[0].1.distance(&pair[1].1);
        travelled.push(total);
    }

    if total < MIN_PATH_LENGTH {
        return index_samples(path, count);
    }

    let last_segment = path.len() - 2;
    linspace(0.0, total, count.min(path.len()))
        .map(|target| {
            let j = travelled
                .partition_point(|&s| s <= target)
                .saturating_sub(1)
                .min(last_segment);
            let (s0, s1) = (travelled[j], travelled[j + 1]);
            let t = if s1 - s0 < 1e-12 { 0.0 } else { (target - s0) / (s1 - s0) };

            let (a, b) = (path[j].1.to_vector(), path[j + 1].1.to_vector());
            let position = Position::from(a.lerp(&b, t));
            let nearest = if t < 0.5 { path[j].0 } else { path[j + 1].0 };
            (position, nearest)
        })
        .collect()
}
