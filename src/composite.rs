//! Composite filter: merges the three per-keyframe scores into one ranking and
//! decides which keyframes survive pruning.

use std::cmp::Ordering;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Allowed deviation of the weight sum from 1 before renormalizing.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Normalized per-keyframe scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreTriplet {
    pub keyframe_id: u64,
    pub position_score: f64,
    pub direction_score: f64,
    pub quality_score: f64,
}

impl ScoreTriplet {
    pub fn is_finite(&self) -> bool {
        self.position_score.is_finite()
            && self.direction_score.is_finite()
            && self.quality_score.is_finite()
    }
}

/// Weights of the position, direction and quality scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            alpha: 0.4,
            beta: 0.4,
            gamma: 0.2,
        }
    }
}

impl Weights {
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Self {
        Self { alpha, beta, gamma }
    }

    pub fn sum(&self) -> f64 {
        self.alpha + self.beta + self.gamma
    }

    /// Returns weights that sum to 1.
    ///
    /// Negative or non-finite weights and a non-positive sum are rejected.
    /// Any other sum is divided out, with a warning.
    pub fn normalized(&self) -> Result<Self> {
        for (name, w) in [("alpha", self.alpha), ("beta", self.beta), ("gamma", self.gamma)] {
            if !w.is_finite() || w < 0.0 {
                return Err(Error::config(format!("weight {name} must be non-negative, got {w}")));
            }
        }

        let sum = self.sum();
        if !sum.is_finite() || sum <= 0.0 {
            return Err(Error::config(format!(
                "weight sum must be positive and finite, got {sum}"
            )));
        }
        if (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE {
            return Ok(*self);
        }

        warn!(
            "Weights alpha={} beta={} gamma={} sum to {:.4}, renormalizing",
            self.alpha, self.beta, self.gamma, sum
        );
        Ok(Self::new(self.alpha / sum, self.beta / sum, self.gamma / sum))
    }

    /// Weighted sum of a triplet. Assumes normalized weights.
    pub fn combine(&self, t: &ScoreTriplet) -> f64 {
        self.alpha * t.position_score + self.beta * t.direction_score + self.gamma * t.quality_score
    }
}

/// Final score of one keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub keyframe_id: u64,
    pub score: f64,
}

/// Descending by score, ascending by id on ties.
fn ranking_order(a: &CompositeScore, b: &CompositeScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.keyframe_id.cmp(&b.keyframe_id))
}

/// Combines every triplet and sorts the result.
///
/// An empty input gives an empty ranking. A triplet holding a NaN or infinite
/// sub-score is rejected as `InvalidInput` instead of being ranked.
pub fn rank(triplets: &[ScoreTriplet], weights: &Weights) -> Result<Vec<CompositeScore>> {
    let weights = weights.normalized()?;

    if let Some(bad) = triplets.iter().find(|t| !t.is_finite()) {
        return Err(Error::input(bad.keyframe_id, "non-finite sub-score"));
    }

    let mut ranking: Vec<CompositeScore> = triplets
        .iter()
        .map(|t| CompositeScore {
            keyframe_id: t.keyframe_id,
            score: weights.combine(t),
        })
        .collect();
    ranking.sort_by(ranking_order);

    Ok(ranking)
}

/// How many keyframes survive pruning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// The `k` best keyframes.
    TopK { k: usize },
    /// Every keyframe scoring at least `threshold`.
    Threshold { threshold: f64 },
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        SelectionPolicy::Threshold { threshold: 0.5 }
    }
}

impl SelectionPolicy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SelectionPolicy::TopK { k } if k == 0 => Err(Error::config("top_k requires k > 0")),
            SelectionPolicy::Threshold { threshold } if !threshold.is_finite() => {
                Err(Error::config(format!("threshold must be finite, got {threshold}")))
            }
            _ => Ok(()),
        }
    }
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Kept keyframes, in ranking order.
    pub retained: Vec<CompositeScore>,
    /// Ids of dropped keyframes, in ranking order.
    pub pruned: Vec<u64>,
}

/// Splits a ranking into retained and pruned keyframes.
pub fn select(ranking: &[CompositeScore], policy: &SelectionPolicy) -> Result<Selection> {
    policy.validate()?;

    let keep = |i: usize, s: &CompositeScore| match *policy {
        SelectionPolicy::TopK { k } => i < k,
        SelectionPolicy::Threshold { threshold } => s.score >= threshold,
    };

    let mut selection = Selection::default();
    for (i, s) in ranking.iter().enumerate() {
        if keep(i, s) {
            selection.retained.push(*s);
        } else {
            selection.pruned.push(s.keyframe_id);
        }
    }

    Ok(selection)
}

/// Suggests a threshold for composite scores.
///
/// With a target count, returns the score of the keyframe at that rank so
/// that a threshold pass keeps at least that many keyframes (a target of 0 is
/// treated as 1). Otherwise uses mean + 0.5 * standard deviation, clamped to
/// `[0, 1]`.
pub fn suggest_threshold(scores: &[f64], target_count: Option<usize>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }

    if let Some(count) = target_count {
        let mut sorted_scores = scores.to_vec();
        sorted_scores.sort_by(|a, b| b.total_cmp(a));

        let index = count.saturating_sub(1).min(sorted_scores.len() - 1);
        return sorted_scores[index];
    }

    let (mean, std_dev) = mean_and_std(scores);
    (mean + 0.5 * std_dev).clamp(0.0, 1.0)
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Mean, min and max of one score axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AxisSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl AxisSummary {
    fn of(values: impl Iterator<Item = f64>) -> Self {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            mean: sum / count as f64,
            min,
            max,
        }
    }
}

/// Per-axis statistics of a scored batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub position: AxisSummary,
    pub direction: AxisSummary,
    pub quality: AxisSummary,
    pub composite: AxisSummary,
}

impl ScoreSummary {
    pub fn new(triplets: &[ScoreTriplet], ranking: &[CompositeScore]) -> Self {
        Self {
            count: triplets.len(),
            position: AxisSummary::of(triplets.iter().map(|t| t.position_score)),
            direction: AxisSummary::of(triplets.iter().map(|t| t.direction_score)),
            quality: AxisSummary::of(triplets.iter().map(|t| t.quality_score)),
            composite: AxisSummary::of(ranking.iter().map(|s| s.score)),
        }
    }
}
