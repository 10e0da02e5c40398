use crate::{builder::BuildPhase, dem::DemError, Scalar};
use std::path::PathBuf;
use thiserror::Error;

/// Error thrown during terrain mesh synthesis.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Raster model error.
    #[error("DEM error: {0}")]
    Dem(#[from] DemError),
    /// Seed triangulation of the tile corners failed.
    #[error("Failed seed triangulation")]
    FailedTriangulation,
    /// Point lies outside of the triangulated tile.
    #[error("Point ({0}, {1}) lies outside of the tile")]
    OutsideTile(Scalar, Scalar),
    /// Attempt to insert a DEM sample without data.
    #[error("DEM sample at ({0}, {1}) has no data")]
    NoData(usize, usize),
    /// No valid height could be found for an arbitrary point.
    #[error("No valid height around ({0}, {1})")]
    NoHeight(Scalar, Scalar),
    /// Constrained edge could not be forced into the triangulation.
    #[error("Could not constrain edge ({0}, {1}) - ({2}, {3})")]
    Constraint(Scalar, Scalar, Scalar, Scalar),
    /// Required raster plane is not loaded.
    #[error("Missing DEM plane: {0}")]
    MissingPlane(String),
    /// Progress callback requested abort.
    #[error("Build aborted during {0} phase")]
    Aborted(BuildPhase),
    /// Border match file could not be read or written.
    #[error("Border file {path:?}: {source}")]
    BorderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Border match file is malformed.
    #[error("Border file line {line}: {message}")]
    BorderParse { line: usize, message: String },
    /// Neighbor referenced a terrain this session does not define.
    #[error("Unknown terrain or border type: {0}")]
    UnknownTerrain(String),
    /// Terrain rule table has no entry for the feature vector.
    #[error("No terrain rule matches features: {0}")]
    NoTerrainRule(String),
    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for terrain mesh operations.
pub type MeshResult<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::UnknownTerrain("lava_rock".to_owned());
        assert_eq!(format!("{err}"), "Unknown terrain or border type: lava_rock");

        let err = MeshError::Aborted(BuildPhase::Refine);
        assert!(format!("{err}").contains("refine"));
    }
}
