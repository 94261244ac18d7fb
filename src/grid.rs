//! Uniform 3D grid over keyframe positions.
//!
//! Cell `i` along an axis covers `[i * cell_size, (i + 1) * cell_size)` in the
//! map frame, so the partition only depends on `cell_size`, not on the extent
//! of the batch. Cells are rebuilt on every run.

use std::collections::{BTreeMap, HashMap};

use nalgebra::Vector3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::composite::{CompositeScore, ScoreTriplet};
use crate::error::{Error, Result};
use crate::keyframe::Position;

/// Integer cell coordinates, one per axis.
pub type CellIndex = [i64; 3];

/// Rejects a non-positive or non-finite cell size.
pub fn validate_cell_size(cell_size: f64) -> Result<()> {
    if !cell_size.is_finite() || cell_size <= 0.0 {
        return Err(Error::config(format!("cell_size must be positive, got {cell_size}")));
    }
    Ok(())
}

/// One occupied grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub index: CellIndex,
    pub center: Position,
    /// Keyframe ids in input order.
    pub members: Vec<u64>,
}

/// Occupied cells of a keyframe batch, ordered by cell index.
#[derive(Debug, Clone)]
pub struct Grid {
    cell_size: f64,
    cells: BTreeMap<CellIndex, GridCell>,
}

impl Grid {
    /// Buckets `(keyframe_id, position)` pairs into cells of `cell_size`.
    /// A non-finite coordinate has no cell and fails the whole build.
    pub fn build<I>(points: I, cell_size: f64) -> Result<Self>
    where
        I: IntoIterator<Item = (u64, Vector3<f64>)>,
    {
        validate_cell_size(cell_size)?;

        let mut cells: BTreeMap<CellIndex, GridCell> = BTreeMap::new();
        for (id, p) in points {
            if !p.iter().all(|c| c.is_finite()) {
                return Err(Error::input(id, "position is not finite"));
            }
            let index = cell_index(&p, cell_size);
            cells
                .entry(index)
                .or_insert_with(|| GridCell {
                    index,
                    center: cell_center(&index, cell_size),
                    members: Vec::new(),
                })
                .members
                .push(id);
        }

        if cells.is_empty() {
            return Err(Error::EmptyInput);
        }
        Ok(Self { cell_size, cells })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.values()
    }

    pub fn get(&self, index: &CellIndex) -> Option<&GridCell> {
        self.cells.get(index)
    }

    /// Index of the cell containing `p`, occupied or not.
    pub fn locate(&self, p: &Vector3<f64>) -> CellIndex {
        cell_index(p, self.cell_size)
    }
}

pub fn cell_index(p: &Vector3<f64>, cell_size: f64) -> CellIndex {
    [
        (p.x / cell_size).floor() as i64,
        (p.y / cell_size).floor() as i64,
        (p.z / cell_size).floor() as i64,
    ]
}

pub fn cell_center(index: &CellIndex, cell_size: f64) -> Position {
    let half = cell_size / 2.0;
    Position::new(
        index[0] as f64 * cell_size + half,
        index[1] as f64 * cell_size + half,
        index[2] as f64 * cell_size + half,
    )
}

/// How member composite scores are reduced to one score per cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellAggregate {
    #[default]
    Max,
    Mean,
}

impl CellAggregate {
    /// `None` for an empty slice.
    pub fn apply(&self, scores: &[f64]) -> Option<f64> {
        if scores.is_empty() {
            return None;
        }
        Some(match self {
            CellAggregate::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            CellAggregate::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
        })
    }
}

/// A candidate cell with its aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCell {
    pub index: CellIndex,
    pub center: Position,
    pub aggregate: f64,
}

/// Aggregates composite scores per cell and orders the cells descending by
/// aggregate, ties by cell index ascending.
///
/// Members without a composite score are ignored; cells left without any
/// scored member are dropped.
pub fn rank_cells(
    grid: &Grid,
    ranking: &[CompositeScore],
    aggregate: CellAggregate,
) -> Vec<RankedCell> {
    let scores: HashMap<u64, f64> = ranking.iter().map(|s| (s.keyframe_id, s.score)).collect();

    let cells: Vec<&GridCell> = grid.cells().collect();
    let mut ranked: Vec<RankedCell> = cells
        .par_iter()
        .filter_map(|cell| {
            let member_scores: Vec<f64> = cell
                .members
                .iter()
                .filter_map(|id| scores.get(id).copied())
                .collect();
            aggregate.apply(&member_scores).map(|aggregate| RankedCell {
                index: cell.index,
                center: cell.center,
                aggregate,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.aggregate
            .total_cmp(&a.aggregate)
            .then_with(|| a.index.cmp(&b.index))
    });
    ranked
}

/// Score used to pick the representative keyframe of a cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellSelectionMethod {
    /// 0.6 * direction + 0.4 * quality.
    #[default]
    Balanced,
    Quality,
    Direction,
    Composite,
}

impl CellSelectionMethod {
    fn score(&self, triplet: &ScoreTriplet, composite: Option<f64>) -> Option<f64> {
        match self {
            CellSelectionMethod::Balanced => {
                Some(0.6 * triplet.direction_score + 0.4 * triplet.quality_score)
            }
            CellSelectionMethod::Quality => Some(triplet.quality_score),
            CellSelectionMethod::Direction => Some(triplet.direction_score),
            CellSelectionMethod::Composite => composite,
        }
    }
}

/// Best keyframe of every occupied cell under `method`, lowest id on ties.
pub fn best_keyframe_per_cell(
    grid: &Grid,
    triplets: &[ScoreTriplet],
    ranking: &[CompositeScore],
    method: CellSelectionMethod,
) -> BTreeMap<CellIndex, u64> {
    let triplets: HashMap<u64, &ScoreTriplet> =
        triplets.iter().map(|t| (t.keyframe_id, t)).collect();
    let composite: HashMap<u64, f64> = ranking.iter().map(|s| (s.keyframe_id, s.score)).collect();

    grid.cells()
        .filter_map(|cell| {
            cell.members
                .iter()
                .filter_map(|id| {
                    let t = triplets.get(id)?;
                    method.score(t, composite.get(id).copied()).map(|s| (*id, s))
                })
                .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(id, _)| (cell.index, id))
        })
        .collect()
}
