use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top level phase of a tile build.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    /// Seed triangulation of the tile corners.
    Triangulate,
    /// Constraint-map edges and their subdivision.
    Constraints,
    /// Slave sides pinned onto neighbor borders.
    Borders,
    /// Greedy error and size driven refinement.
    Refine,
    /// Anti-bridging, flattening and smoothing of water.
    Water,
    /// Per-face terrain assignment.
    Classify,
    /// Border layer propagation.
    Blend,
}

impl BuildPhase {
    pub fn all() -> [Self; 7] {
        [
            Self::Triangulate,
            Self::Constraints,
            Self::Borders,
            Self::Refine,
            Self::Water,
            Self::Classify,
            Self::Blend,
        ]
    }
}
