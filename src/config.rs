use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::composite::{SelectionPolicy, Weights};
use crate::direction::{DirectionReference, DEFAULT_QUATERNION_TOLERANCE};
use crate::error::Error;
use crate::position::{validate_sigma, PositionReference, DEFAULT_SIGMA};
use crate::waypoint::WaypointConfig;

/// Every tunable of a curation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Position score length scale in meters.
    pub sigma: f64,
    pub weights: Weights,
    pub selection_policy: SelectionPolicy,
    pub quaternion_tolerance: f64,
    pub position_reference: PositionReference,
    pub direction_reference: DirectionReference,
    /// `cell_size`, `num_waypoints`, `cell_aggregate` and `cell_selection`.
    #[serde(flatten)]
    pub waypoints: WaypointConfig,
    /// Maximum waypoint-to-keyframe distance when matching, in meters.
    pub match_distance: f64,
    /// Scoring threads, all cores when unset.
    pub num_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            weights: Weights::default(),
            selection_policy: SelectionPolicy::default(),
            quaternion_tolerance: DEFAULT_QUATERNION_TOLERANCE,
            position_reference: PositionReference::default(),
            direction_reference: DirectionReference::default(),
            waypoints: WaypointConfig::default(),
            match_distance: 0.1,
            num_threads: None,
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON. Missing keys take their defaults.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents).context("Failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Checks every value before any computation runs.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        validate_sigma(self.sigma)?;
        self.weights.normalized()?;
        self.selection_policy.validate()?;
        if !self.quaternion_tolerance.is_finite() || self.quaternion_tolerance <= 0.0 {
            return Err(Error::config(format!(
                "quaternion_tolerance must be positive, got {}",
                self.quaternion_tolerance
            )));
        }
        self.direction_reference.validate()?;
        self.waypoints.validate()?;
        if !self.match_distance.is_finite() || self.match_distance < 0.0 {
            return Err(Error::config(format!(
                "match_distance must be non-negative, got {}",
                self.match_distance
            )));
        }
        if self.num_threads == Some(0) {
            return Err(Error::config("num_threads must be positive"));
        }
        Ok(())
    }

    pub fn thread_count(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::CellAggregate;

    #[test]
    fn test_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.sigma, 2.0);
        assert_eq!(config.weights, Weights::new(0.4, 0.4, 0.2));
        assert_eq!(config.waypoints.cell_size, 2.0);
        assert_eq!(config.quaternion_tolerance, 1e-3);
        assert!(config.validate().is_ok());
        assert!(config.thread_count() >= 1);
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);

        // cell_size and num_waypoints sit at the top level
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["cell_size"], 2.0);
        assert_eq!(value["num_waypoints"], 20);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{
                "sigma": 1.5,
                "cell_size": 4.0,
                "cell_aggregate": "mean",
                "selection_policy": { "policy": "top_k", "k": 12 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.sigma, 1.5);
        assert_eq!(config.waypoints.cell_size, 4.0);
        assert_eq!(config.waypoints.cell_aggregate, CellAggregate::Mean);
        assert_eq!(config.waypoints.num_waypoints, 20);
        assert_eq!(config.selection_policy, SelectionPolicy::TopK { k: 12 });
        assert_eq!(config.weights, Weights::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let bad = [
            EngineConfig { sigma: 0.0, ..Default::default() },
            EngineConfig { weights: Weights::new(0.0, 0.0, 0.0), ..Default::default() },
            EngineConfig { quaternion_tolerance: -1.0, ..Default::default() },
            EngineConfig { num_threads: Some(0), ..Default::default() },
            EngineConfig {
                waypoints: WaypointConfig { cell_size: -2.0, ..Default::default() },
                ..Default::default()
            },
            EngineConfig {
                direction_reference: DirectionReference::Fixed { x: 0.0, y: 0.0, z: 0.0 },
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))), "{config:?}");
        }
        assert!(EngineConfig::from_json_str(r#"{"sigma": -3.0}"#).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curator.json");

        let config = EngineConfig {
            sigma: 3.0,
            num_threads: Some(2),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);

        assert!(EngineConfig::load(&dir.path().join("missing.json")).is_err());
    }
}
