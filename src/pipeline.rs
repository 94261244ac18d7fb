//! Batch scoring of a whole map.
//!
//! Stage 1 validates every record and computes its Laplacian variance in
//! parallel. The position and direction scores are then computed against the
//! surviving keyframes only, so a rejected record is never used as an anchor
//! or as a movement predecessor. Stage 2 reduces the variance range over the
//! survivors and maps every variance into `[0, 1]`. Records that fail
//! validation are skipped and reported, never fatal.

use log::{debug, info, warn};
use nalgebra::{UnitQuaternion, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::composite::{rank, select, CompositeScore, ScoreSummary, ScoreTriplet, Selection};
use crate::config::EngineConfig;
use crate::coverage::{match_waypoints, MatchReport};
use crate::direction::{direction_score, unit_orientation};
use crate::error::{Error, Result};
use crate::keyframe::{KeyframeRecord, Position};
use crate::position::{position_score, PositionReference};
use crate::sharpness::{calculate_sharpness, normalize, SharpnessGrade, VarianceRange};
use crate::trajectory::{sample_waypoints, TrajectorySampling, TrajectorySelection};
use crate::waypoint::{SeedWaypoint, Waypoint, WaypointGenerator, WaypointPlan};

/// A keyframe that made it through scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredKeyframe {
    pub position: Position,
    pub raw_variance: f64,
    pub triplet: ScoreTriplet,
}

impl ScoredKeyframe {
    pub fn id(&self) -> u64 {
        self.triplet.keyframe_id
    }

    pub fn grade(&self) -> SharpnessGrade {
        SharpnessGrade::from_variance(self.raw_variance)
    }
}

/// A keyframe left out of scoring and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedKeyframe {
    pub keyframe_id: u64,
    pub reason: String,
}

impl SkippedKeyframe {
    fn new(keyframe_id: u64, err: Error) -> Self {
        let reason = match err {
            Error::InvalidInput { reason, .. } => reason,
            other => other.to_string(),
        };
        Self { keyframe_id, reason }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringReport {
    /// Scored keyframes in input order.
    pub scored: Vec<ScoredKeyframe>,
    pub skipped: Vec<SkippedKeyframe>,
    /// Variance range the quality scores were normalized against.
    pub variance_range: Option<VarianceRange>,
}

impl ScoringReport {
    pub fn triplets(&self) -> Vec<ScoreTriplet> {
        self.scored.iter().map(|k| k.triplet).collect()
    }

    /// `(id, position)` of every scored keyframe, in trajectory order.
    pub fn path(&self) -> Vec<(u64, Position)> {
        self.scored.iter().map(|k| (k.id(), k.position)).collect()
    }
}

/// Scores, ranking and pruning decision for one map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurationReport {
    pub scoring: ScoringReport,
    pub ranking: Vec<CompositeScore>,
    pub selection: Selection,
    pub summary: ScoreSummary,
}

/// A record that passed validation.
struct Prepared {
    id: u64,
    position: Vector3<f64>,
    orientation: UnitQuaternion<f64>,
    raw_variance: f64,
}

/// Stage 1 output of one record.
struct RawScores {
    id: u64,
    position: Position,
    position_score: f64,
    direction_score: f64,
    raw_variance: f64,
}

type Checked<T> = std::result::Result<T, SkippedKeyframe>;

/// Runs the scoring engine with one validated configuration.
pub struct Curator {
    config: EngineConfig,
}

impl Curator {
    /// Validates `config` up front; no scoring happens with a bad config.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scores every record, skipping invalid ones.
    pub fn score(&self, records: &[KeyframeRecord]) -> ScoringReport {
        let threads = self.config.thread_count();
        debug!("Scoring {} keyframes on {} threads", records.len(), threads);

        let (valid, skipped) = match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| self.raw_scores(records)),
            Err(e) => {
                warn!("Failed to build a {threads}-thread pool ({e}), using the global pool");
                self.raw_scores(records)
            }
        };

        let variances: Vec<f64> = valid.iter().map(|r| r.raw_variance).collect();
        let variance_range = VarianceRange::from_values(&variances);

        let scored = valid
            .into_iter()
            .map(|r| ScoredKeyframe {
                position: r.position,
                raw_variance: r.raw_variance,
                triplet: ScoreTriplet {
                    keyframe_id: r.id,
                    position_score: r.position_score,
                    direction_score: r.direction_score,
                    quality_score: variance_range
                        .map_or(1.0, |range| normalize(r.raw_variance, &range)),
                },
            })
            .collect::<Vec<_>>();

        info!("Scored {} keyframes, skipped {}", scored.len(), skipped.len());

        ScoringReport {
            scored,
            skipped,
            variance_range,
        }
    }

    /// Scores, ranks and prunes a batch. An empty batch yields an empty report.
    pub fn curate(&self, records: &[KeyframeRecord]) -> Result<CurationReport> {
        let scoring = self.score(records);
        let triplets = scoring.triplets();

        let ranking = rank(&triplets, &self.config.weights)?;
        let selection = select(&ranking, &self.config.selection_policy)?;
        let summary = ScoreSummary::new(&triplets, &ranking);

        info!(
            "Retained {} of {} keyframes (composite mean {:.4})",
            selection.retained.len(),
            ranking.len(),
            summary.composite.mean
        );

        Ok(CurationReport {
            scoring,
            ranking,
            selection,
            summary,
        })
    }

    /// Extrapolates waypoints from `seeds` over a curated batch.
    pub fn plan_waypoints(
        &self,
        report: &CurationReport,
        seeds: &[SeedWaypoint],
    ) -> Result<WaypointPlan> {
        let generator = WaypointGenerator::new(self.config.waypoints)?;
        generator.generate(&report.scoring.scored, &report.ranking, seeds)
    }

    /// Samples `num_waypoints` waypoints along the scored trajectory.
    pub fn sample_waypoints(
        &self,
        report: &CurationReport,
        sampling: TrajectorySampling,
    ) -> Result<Vec<Waypoint>> {
        let waypoints = &self.config.waypoints;
        sample_waypoints(
            &report.scoring.path(),
            waypoints.num_waypoints,
            sampling,
            waypoints.cell_size,
        )
    }

    /// Ids of the scored keyframes picked by a trajectory rule.
    pub fn select_along_trajectory(
        &self,
        report: &CurationReport,
        selection: &TrajectorySelection,
    ) -> Result<Vec<u64>> {
        selection.select(&report.scoring.path())
    }

    /// Matches waypoints to the nearest scored keyframe within the configured
    /// `match_distance`.
    pub fn match_waypoints(&self, report: &CurationReport, waypoints: &[Waypoint]) -> MatchReport {
        match_waypoints(waypoints, &report.scoring.path(), self.config.match_distance)
    }

    fn raw_scores(&self, records: &[KeyframeRecord]) -> (Vec<RawScores>, Vec<SkippedKeyframe>) {
        let prepared: Vec<Checked<Prepared>> = records
            .par_iter()
            .map(|record| self.prepare(record).map_err(|e| SkippedKeyframe::new(record.id, e)))
            .collect();
        let (valid, mut skipped) = split_skipped(prepared);

        let first = valid.first().map(|p| p.position);
        let scored: Vec<Checked<RawScores>> = valid
            .par_iter()
            .enumerate()
            .map(|(i, kf)| {
                let previous = i.checked_sub(1).map(|j| &valid[j].position);
                self.axis_scores(kf, first.as_ref(), previous)
                    .map_err(|e| SkippedKeyframe::new(kf.id, e))
            })
            .collect();
        let (scored, late) = split_skipped(scored);
        skipped.extend(late);

        (scored, skipped)
    }

    fn prepare(&self, record: &KeyframeRecord) -> Result<Prepared> {
        if !record.has_finite_position() {
            let p = record.position;
            return Err(Error::input(
                record.id,
                format!("position ({}, {}, {}) is not finite", p.x, p.y, p.z),
            ));
        }
        let tolerance = self.config.quaternion_tolerance;
        let orientation = unit_orientation(record.id, &record.orientation, tolerance)?;
        let raw_variance = calculate_sharpness(record.id, &record.image)?;

        Ok(Prepared {
            id: record.id,
            position: record.position,
            orientation,
            raw_variance,
        })
    }

    fn axis_scores(
        &self,
        kf: &Prepared,
        first: Option<&Vector3<f64>>,
        previous: Option<&Vector3<f64>>,
    ) -> Result<RawScores> {
        let anchor = match self.config.position_reference {
            PositionReference::FirstKeyframe => first,
            PositionReference::PreviousKeyframe => previous,
        }
        .unwrap_or(&kf.position);
        let position_score = position_score(&kf.position, anchor, self.config.sigma)?;

        let reference = self.config.direction_reference.resolve(previous, &kf.position);
        let direction_score = match reference {
            Some(reference) => direction_score(&kf.orientation, &reference)?,
            None => 1.0,
        };

        Ok(RawScores {
            id: kf.id,
            position: Position::from(kf.position),
            position_score,
            direction_score,
            raw_variance: kf.raw_variance,
        })
    }
}

fn split_skipped<T>(results: Vec<Checked<T>>) -> (Vec<T>, Vec<SkippedKeyframe>) {
    let mut valid = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();
    for r in results {
        match r {
            Ok(v) => valid.push(v),
            Err(skip) => {
                warn!("Skipping keyframe {}: {}", skip.keyframe_id, skip.reason);
                skipped.push(skip);
            }
        }
    }
    (valid, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::SelectionPolicy;
    use approx::assert_relative_eq;
    use image::{DynamicImage, GrayImage, Luma};

    const IDENTITY: [f64; 4] = [0.0, 0.0, 0.0, 1.0];

    fn striped(pitch: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, _| {
            if (x / pitch) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        }))
    }

    fn flat() -> DynamicImage {
        DynamicImage::new_luma8(32, 32)
    }

    fn curator() -> Curator {
        Curator::new(EngineConfig::default()).unwrap()
    }

    fn triplet_of(report: &ScoringReport, id: u64) -> ScoreTriplet {
        report.scored.iter().find(|k| k.id() == id).unwrap().triplet
    }

    #[test]
    fn test_skips_invalid_records() {
        let records = vec![
            KeyframeRecord::new(1, [0.0, 0.0, 0.0], IDENTITY, striped(1)),
            KeyframeRecord::new(2, [0.0, 0.0, 1.0], [0.0, 0.0, 0.0, 2.0], striped(1)),
            KeyframeRecord::new(3, [0.0, 0.0, 2.0], IDENTITY, DynamicImage::new_luma8(0, 0)),
            KeyframeRecord::new(4, [0.0, 0.0, 3.0], IDENTITY, flat()),
        ];

        let report = curator().score(&records);
        let scored: Vec<u64> = report.scored.iter().map(|k| k.id()).collect();
        let skipped: Vec<u64> = report.skipped.iter().map(|k| k.keyframe_id).collect();
        assert_eq!(scored, vec![1, 4]);
        assert_eq!(skipped, vec![2, 3]);
    }

    #[test]
    fn test_non_finite_position_is_skipped() {
        let records = vec![
            KeyframeRecord::new(1, [f64::NAN, 0.0, 0.0], IDENTITY, striped(1)),
            KeyframeRecord::new(2, [1.0, 0.0, 0.0], IDENTITY, striped(2)),
            KeyframeRecord::new(3, [2.0, 0.0, 0.0], IDENTITY, striped(3)),
            KeyframeRecord::new(4, [3.0, f64::INFINITY, 0.0], IDENTITY, striped(1)),
        ];

        let report = curator().curate(&records).unwrap();
        let skipped: Vec<u64> = report.scoring.skipped.iter().map(|k| k.keyframe_id).collect();
        assert_eq!(skipped, vec![1, 4]);
        assert!(report.scoring.skipped[0].reason.contains("not finite"));

        // Keyframe 2 is the first valid record, so it anchors position and
        // has no movement predecessor.
        let second = triplet_of(&report.scoring, 2);
        assert_eq!(second.position_score, 1.0);
        assert_eq!(second.direction_score, 1.0);

        // Keyframe 3 moves along +X while looking along +Z.
        let third = triplet_of(&report.scoring, 3);
        assert_relative_eq!(third.position_score, (-1.0f64 / 8.0).exp(), epsilon = 1e-12);
        assert_relative_eq!(third.direction_score, 0.5, epsilon = 1e-9);

        assert_eq!(report.ranking.len(), 2);
        assert!(report.ranking.iter().all(|s| s.score.is_finite()));
    }

    #[test]
    fn test_invalid_record_is_never_an_anchor() {
        let records = vec![
            KeyframeRecord::new(1, [100.0, 0.0, 0.0], [0.0, 0.0, 0.0, 2.0], striped(1)),
            KeyframeRecord::new(2, [0.0, 0.0, 0.0], IDENTITY, striped(1)),
            KeyframeRecord::new(3, [0.0, 0.0, 5.0], IDENTITY, DynamicImage::new_luma8(0, 4)),
            KeyframeRecord::new(4, [1.0, 0.0, 0.0], IDENTITY, striped(2)),
        ];

        let report = curator().curate(&records).unwrap();
        let skipped: Vec<u64> = report.scoring.skipped.iter().map(|k| k.keyframe_id).collect();
        assert_eq!(skipped, vec![1, 3]);

        let second = triplet_of(&report.scoring, 2);
        assert_eq!(second.position_score, 1.0);
        assert_eq!(second.direction_score, 1.0);

        // Anchored on keyframe 2 and moving from it, not from keyframe 3.
        let fourth = triplet_of(&report.scoring, 4);
        assert_relative_eq!(fourth.position_score, (-1.0f64 / 8.0).exp(), epsilon = 1e-12);
        assert_relative_eq!(fourth.direction_score, 0.5, epsilon = 1e-9);

        for s in &report.ranking {
            assert!(s.score.is_finite());
            assert!((0.0..=1.0).contains(&s.score));
        }
    }

    #[test]
    fn test_quality_is_batch_relative() {
        let records = vec![
            KeyframeRecord::new(1, [0.0; 3], IDENTITY, striped(1)),
            KeyframeRecord::new(2, [0.0; 3], IDENTITY, striped(4)),
            KeyframeRecord::new(3, [0.0; 3], IDENTITY, flat()),
        ];
        let report = curator().score(&records);
        let q: Vec<f64> = report.scored.iter().map(|k| k.triplet.quality_score).collect();
        assert_eq!(q[0], 1.0);
        assert!(q[1] > 0.0 && q[1] < 1.0);
        assert_eq!(q[2], 0.0);
        assert_eq!(report.variance_range.unwrap().min, 0.0);
    }

    #[test]
    fn test_movement_direction_scores() {
        // Identity looks along +Z; moving along +Z agrees, moving along -Z opposes.
        let records = vec![
            KeyframeRecord::new(1, [0.0, 0.0, 0.0], IDENTITY, flat()),
            KeyframeRecord::new(2, [0.0, 0.0, 1.0], IDENTITY, flat()),
            KeyframeRecord::new(3, [0.0, 0.0, 0.0], IDENTITY, flat()),
        ];
        let report = curator().score(&records);
        let d: Vec<f64> = report.scored.iter().map(|k| k.triplet.direction_score).collect();
        assert_eq!(d[0], 1.0);
        assert_relative_eq!(d[1], 1.0, epsilon = 1e-9);
        assert_relative_eq!(d[2], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_curate_selects_by_policy() {
        let records: Vec<_> = (0..6)
            .map(|i| KeyframeRecord::new(i, [i as f64, 0.0, 0.0], IDENTITY, striped(1 + i as u32)))
            .collect();
        let config = EngineConfig {
            selection_policy: SelectionPolicy::TopK { k: 2 },
            ..Default::default()
        };
        let report = Curator::new(config).unwrap().curate(&records).unwrap();
        assert_eq!(report.ranking.len(), 6);
        assert_eq!(report.selection.retained.len(), 2);
        assert_eq!(report.selection.pruned.len(), 4);
        assert_eq!(report.selection.retained[0], report.ranking[0]);
        assert_eq!(report.summary.count, 6);
    }

    #[test]
    fn test_empty_batch() {
        let report = curator().curate(&[]).unwrap();
        assert!(report.ranking.is_empty());
        assert!(report.scoring.variance_range.is_none());
        assert!(report.selection.retained.is_empty());
    }

    #[test]
    fn test_single_thread_matches_default() {
        let records: Vec<_> = (0..20)
            .map(|i| {
                let image = striped(1 + (i % 5) as u32);
                KeyframeRecord::new(i, [i as f64 * 0.3, 0.0, 0.0], IDENTITY, image)
            })
            .collect();
        let single = Curator::new(EngineConfig {
            num_threads: Some(1),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(single.score(&records), curator().score(&records));
    }
}
