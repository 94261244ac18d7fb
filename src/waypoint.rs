//! # Waypoint Generation
//!
//! Extrapolates a full waypoint set from two or three user-chosen seed
//! waypoints. The generator walks through fixed stages:
//!
//! ```text
//! Seeding -> GridPartition -> Ranking -> Extrapolating -> Done
//! ```
//!
//! - **Seeding**: validate the 2-3 seeds.
//! - **GridPartition**: bucket keyframe positions into cells of `cell_size`.
//! - **Ranking**: reduce member composite scores to one aggregate per cell.
//! - **Extrapolating**: visit cells by descending aggregate and keep a cell
//!   unless it holds a seed or its center lies within one `cell_size` of a
//!   position already chosen, so face neighbours of a chosen cell are
//!   suppressed. Stops at `num_waypoints` (seeds included).
//! - **Done**: seeds first, unchanged, then generated waypoints.
//!
//! Generated waypoints sit on cell centers, never on a raw keyframe pose, so
//! repeated passes through the same area do not pull a waypoint toward one
//! noisy pose estimate.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::composite::CompositeScore;
use crate::error::{Error, Result};
use crate::grid::{
    self, best_keyframe_per_cell, rank_cells, CellAggregate, CellIndex, CellSelectionMethod, Grid,
    RankedCell,
};
use crate::keyframe::Position;
use crate::pipeline::ScoredKeyframe;

/// Accepted number of seed waypoints.
pub const MIN_SEEDS: usize = 2;
pub const MAX_SEEDS: usize = 3;

/// Slack on the adjacency test so that a neighbour exactly one cell away is
/// still caught after rounding.
const ADJACENCY_EPSILON: f64 = 1e-9;

/// Whether a waypoint was chosen by the user or derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaypointSource {
    Seed,
    Generated,
}

/// A user-chosen waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedWaypoint {
    pub id: u64,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: u64,
    pub position: Position,
    pub cell: CellIndex,
    pub source: WaypointSource,
    /// Best keyframe of the waypoint's cell, for generated waypoints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub representative_keyframe: Option<u64>,
}

/// Stages of one generator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorStage {
    Seeding,
    GridPartition,
    Ranking,
    Extrapolating,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    /// Grid resolution in meters.
    pub cell_size: f64,
    /// Total waypoint target, seeds included.
    pub num_waypoints: usize,
    pub cell_aggregate: CellAggregate,
    pub cell_selection: CellSelectionMethod,
}

impl Default for WaypointConfig {
    fn default() -> Self {
        Self {
            cell_size: 2.0,
            num_waypoints: 20,
            cell_aggregate: CellAggregate::Max,
            cell_selection: CellSelectionMethod::Balanced,
        }
    }
}

impl WaypointConfig {
    pub fn validate(&self) -> Result<()> {
        grid::validate_cell_size(self.cell_size)?;
        if self.num_waypoints == 0 {
            return Err(Error::config("num_waypoints must be positive"));
        }
        Ok(())
    }
}

/// Output of one generator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaypointPlan {
    pub waypoints: Vec<Waypoint>,
    /// The configured `num_waypoints`.
    pub requested: usize,
    /// Fewer waypoints than requested could be placed.
    pub partial: bool,
}

impl WaypointPlan {
    pub fn count(&self) -> usize {
        self.waypoints.len()
    }

    pub fn generated(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.iter().filter(|w| w.source == WaypointSource::Generated)
    }
}

/// Chosen positions carried through the extrapolation fold.
struct Extrapolation<'a> {
    chosen: Vec<Position>,
    picked: Vec<&'a RankedCell>,
}

pub struct WaypointGenerator {
    config: WaypointConfig,
}

impl WaypointGenerator {
    pub fn new(config: WaypointConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &WaypointConfig {
        &self.config
    }

    /// Runs all stages over a scored batch.
    ///
    /// `ranking` supplies the composite score of each keyframe; keyframes
    /// missing from it (for example pruned ones) still occupy cells but do
    /// not contribute to cell aggregates.
    pub fn generate(
        &self,
        keyframes: &[ScoredKeyframe],
        ranking: &[CompositeScore],
        seeds: &[SeedWaypoint],
    ) -> Result<WaypointPlan> {
        let cell_size = self.config.cell_size;

        debug!("Waypoint generator: {:?}", GeneratorStage::Seeding);
        validate_seeds(seeds, self.config.num_waypoints)?;
        if keyframes.is_empty() {
            return Err(Error::EmptyInput);
        }

        debug!("Waypoint generator: {:?}", GeneratorStage::GridPartition);
        let positions = keyframes.iter().map(|k| (k.id(), k.position.to_vector()));
        let grid = Grid::build(positions, cell_size)?;
        debug!(
            "{} keyframes in {} occupied cells of {cell_size} m",
            keyframes.len(),
            grid.len()
        );

        debug!("Waypoint generator: {:?}", GeneratorStage::Ranking);
        let ranked = rank_cells(&grid, ranking, self.config.cell_aggregate);
        let triplets: Vec<_> = keyframes.iter().map(|k| k.triplet).collect();
        let representatives =
            best_keyframe_per_cell(&grid, &triplets, ranking, self.config.cell_selection);

        debug!("Waypoint generator: {:?}", GeneratorStage::Extrapolating);
        let seed_cells: HashSet<CellIndex> = seeds
            .iter()
            .map(|s| grid.locate(&s.position.to_vector()))
            .collect();
        let target = self.config.num_waypoints.saturating_sub(seeds.len());

        let extrapolation = ranked
            .iter()
            .filter(|cell| !seed_cells.contains(&cell.index))
            .fold(
                Extrapolation {
                    chosen: seeds.iter().map(|s| s.position).collect(),
                    picked: Vec::new(),
                },
                |mut acc, cell| {
                    let free = !is_adjacent(&cell.center, &acc.chosen, cell_size);
                    if acc.picked.len() < target && free {
                        acc.chosen.push(cell.center);
                        acc.picked.push(cell);
                    }
                    acc
                },
            );

        debug!("Waypoint generator: {:?}", GeneratorStage::Done);
        let plan = assemble(
            &grid,
            seeds,
            &extrapolation.picked,
            &representatives,
            self.config.num_waypoints,
        );

        if plan.partial {
            info!(
                "Placed {} of {} requested waypoints ({} ranked cells available)",
                plan.count(),
                plan.requested,
                ranked.len()
            );
        } else {
            info!("Placed {} waypoints", plan.count());
        }

        Ok(plan)
    }
}

fn validate_seeds(seeds: &[SeedWaypoint], num_waypoints: usize) -> Result<()> {
    if !(MIN_SEEDS..=MAX_SEEDS).contains(&seeds.len()) {
        return Err(Error::config(format!(
            "expected {MIN_SEEDS} to {MAX_SEEDS} seed waypoints, got {}",
            seeds.len()
        )));
    }
    let mut ids = HashSet::new();
    for seed in seeds {
        if !ids.insert(seed.id) {
            return Err(Error::config(format!("duplicate seed waypoint id {}", seed.id)));
        }
        if !seed.position.is_finite() {
            return Err(Error::config(format!(
                "seed waypoint {} has a non-finite position",
                seed.id
            )));
        }
    }

    // Generated ids continue after the largest seed id and must stay in u64.
    let needed = num_waypoints.saturating_sub(seeds.len()) as u64;
    let max_id = seeds.iter().map(|s| s.id).max().unwrap_or(0);
    if needed > 0 && max_id.checked_add(needed).is_none() {
        return Err(Error::config(format!(
            "seed waypoint id {max_id} leaves no room for {needed} generated ids"
        )));
    }
    Ok(())
}

/// True when `center` lies within one cell size of any chosen position.
/// Face neighbours count as adjacent, diagonal neighbours do not.
fn is_adjacent(center: &Position, chosen: &[Position], cell_size: f64) -> bool {
    chosen
        .iter()
        .any(|p| center.distance(p) <= cell_size + ADJACENCY_EPSILON)
}

fn assemble(
    grid: &Grid,
    seeds: &[SeedWaypoint],
    picked: &[&RankedCell],
    representatives: &BTreeMap<CellIndex, u64>,
    requested: usize,
) -> WaypointPlan {
    let mut waypoints: Vec<Waypoint> = seeds
        .iter()
        .map(|s| Waypoint {
            id: s.id,
            position: s.position,
            cell: grid.locate(&s.position.to_vector()),
            source: WaypointSource::Seed,
            representative_keyframe: None,
        })
        .collect();

    // Seed validation guarantees these ids fit in u64.
    let max_seed = seeds.iter().map(|s| s.id).max().unwrap_or(0);
    waypoints.extend(picked.iter().enumerate().map(|(i, cell)| Waypoint {
        id: max_seed + 1 + i as u64,
        position: cell.center,
        cell: cell.index,
        source: WaypointSource::Generated,
        representative_keyframe: representatives.get(&cell.index).copied(),
    }));

    let partial = waypoints.len() < requested;
    WaypointPlan {
        waypoints,
        requested,
        partial,
    }
}
