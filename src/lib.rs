//! Keyframe curation for visual SLAM maps.
//!
//! Scores every keyframe of a finished map on spatial novelty, viewing
//! direction and image sharpness, ranks and prunes them, and extrapolates a
//! small set of grid-aligned waypoints from a user seed. Keyframes can also
//! be picked, and waypoints sampled, along the recorded trajectory.

pub mod composite;
pub mod config;
pub mod coverage;
pub mod direction;
pub mod error;
pub mod grid;
pub mod keyframe;
pub mod pipeline;
pub mod position;
pub mod sharpness;
pub mod trajectory;
pub mod waypoint;

pub use composite::{
    rank, select, CompositeScore, ScoreTriplet, Selection, SelectionPolicy, Weights,
};
pub use config::EngineConfig;
pub use coverage::{match_waypoints, MatchReport, WaypointStatistics};
pub use error::{Error, Result};
pub use keyframe::{KeyframeRecord, Position};
pub use pipeline::{CurationReport, Curator, ScoredKeyframe, ScoringReport, SkippedKeyframe};
pub use trajectory::{sample_waypoints, TrajectorySampling, TrajectorySelection};
pub use waypoint::{
    SeedWaypoint, Waypoint, WaypointConfig, WaypointGenerator, WaypointPlan, WaypointSource,
};
