use crate::{error::MeshError, Scalar};
use serde::{Deserialize, Serialize};

/// Settings of terrain mesh synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSettings {
    /// Maximal vertical error in meters tolerated by greedy refinement.
    #[serde(default = "MeshSettings::default_max_error")]
    pub max_error: Scalar,
    /// Total vertex budget of a tile.
    #[serde(default = "MeshSettings::default_max_points")]
    pub max_points: usize,
    /// Optional maximal triangle extent in meters.
    #[serde(default)]
    pub max_triangle_size: Option<Scalar>,
    /// Edges shorter than this (meters) are never subdivided.
    #[serde(default = "MeshSettings::default_min_edge_dist")]
    pub min_edge_dist: Scalar,
    /// Edges longer than this (meters) are always subdivided.
    #[serde(default = "MeshSettings::default_max_edge_dist")]
    pub max_edge_dist: Scalar,
    /// Distance in degrees under which border vertices are paired.
    #[serde(default = "MeshSettings::default_match_tolerance")]
    pub match_tolerance: Scalar,
    /// Passes of water slope limiting.
    #[serde(default = "MeshSettings::default_water_smooth_iterations")]
    pub water_smooth_iterations: usize,
    /// Maximal rise per horizontal meter between adjacent water vertices.
    #[serde(default = "MeshSettings::default_max_water_slope")]
    pub max_water_slope: Scalar,
    /// Split water edges bridging between two shore vertices.
    #[serde(default = "MeshSettings::default_anti_bridging")]
    pub anti_bridging: bool,
    /// Integration step in meters along constraints for ideal density subdivision.
    #[serde(default = "MeshSettings::default_constraint_density_step")]
    pub constraint_density_step: Scalar,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            max_error: Self::default_max_error(),
            max_points: Self::default_max_points(),
            max_triangle_size: None,
            min_edge_dist: Self::default_min_edge_dist(),
            max_edge_dist: Self::default_max_edge_dist(),
            match_tolerance: Self::default_match_tolerance(),
            water_smooth_iterations: Self::default_water_smooth_iterations(),
            max_water_slope: Self::default_max_water_slope(),
            anti_bridging: Self::default_anti_bridging(),
            constraint_density_step: Self::default_constraint_density_step(),
        }
    }
}

impl MeshSettings {
    fn default_max_error() -> Scalar {
        5.0
    }

    fn default_max_points() -> usize {
        65000
    }

    fn default_min_edge_dist() -> Scalar {
        50.0
    }

    fn default_max_edge_dist() -> Scalar {
        500.0
    }

    fn default_match_tolerance() -> Scalar {
        0.001
    }

    fn default_water_smooth_iterations() -> usize {
        20
    }

    fn default_max_water_slope() -> Scalar {
        0.3
    }

    fn default_anti_bridging() -> bool {
        true
    }

    fn default_constraint_density_step() -> Scalar {
        30.0
    }

    /// Rejects settings no build can work with.
    pub fn validate(&self) -> Result<(), MeshError> {
        if !(self.max_error >= 0.0) {
            return Err(MeshError::InvalidConfig(format!(
                "max_error must be non-negative, got {}",
                self.max_error
            )));
        }
        if self.max_points < 4 {
            return Err(MeshError::InvalidConfig(format!(
                "max_points must allow at least the 4 tile corners, got {}",
                self.max_points
            )));
        }
        if let Some(size) = self.max_triangle_size {
            if !(size > 0.0) {
                return Err(MeshError::InvalidConfig(format!(
                    "max_triangle_size must be positive, got {}",
                    size
                )));
            }
        }
        if !(self.min_edge_dist > 0.0) || self.max_edge_dist < self.min_edge_dist {
            return Err(MeshError::InvalidConfig(format!(
                "edge distances must satisfy 0 < min ({}) <= max ({})",
                self.min_edge_dist, self.max_edge_dist
            )));
        }
        if !(self.constraint_density_step > 0.0) {
            return Err(MeshError::InvalidConfig(format!(
                "constraint_density_step must be positive, got {}",
                self.constraint_density_step
            )));
        }
        Ok(())
    }
}
