//! Seamless borders between adjacent tiles.
//!
//! Every tile records its four outline sides. West and south sides are slaves: they adopt
//! the east and north records written by the neighbors built before.

mod file;
mod matching;

pub use file::*;
pub use matching::*;

use crate::{
    coord::{Bounds, Coord},
    error::MeshResult,
    mesh::FaceId,
    terrain::{TerrainId, TerrainTable},
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strum::{Display, EnumString};

/// Side of a tile outline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BorderSide {
    West,
    South,
    East,
    North,
}

impl BorderSide {
    pub fn all() -> [Self; 4] {
        [Self::West, Self::South, Self::East, Self::North]
    }

    /// Master sides are written for neighbors, slave sides adopt neighbor data.
    pub fn is_master(self) -> bool {
        matches!(self, Self::East | Self::North)
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::West => Self::East,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::North => Self::South,
        }
    }

    /// Side runs along a meridian.
    pub fn is_vertical(self) -> bool {
        matches!(self, Self::West | Self::East)
    }

    /// Constant coordinate of the side line.
    pub fn line(self, bounds: &Bounds) -> Scalar {
        match self {
            Self::West => bounds.west,
            Self::South => bounds.south,
            Self::East => bounds.east,
            Self::North => bounds.north,
        }
    }

    /// Coordinate of a point along the side.
    pub fn along(self, p: Coord) -> Scalar {
        if self.is_vertical() {
            p.y
        } else {
            p.x
        }
    }

    /// Offset of the neighbor tile sharing this side.
    pub fn neighbor_offset(self) -> (i32, i32) {
        match self {
            Self::West => (-1, 0),
            Self::South => (0, -1),
            Self::East => (1, 0),
            Self::North => (0, 1),
        }
    }
}

/// Border vertex as stored in match files.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderVertex {
    pub pos: Coord,
    pub height: Scalar,
    /// Blend alpha per border layer name.
    pub blends: BTreeMap<String, Scalar>,
}

/// Border edge between two consecutive border vertices as stored in match files.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderSegment {
    pub terrain: String,
    pub borders: Vec<String>,
}

/// One outline side: vertices sorted along the side and one segment per vertex pair.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderRecord {
    pub vertices: Vec<BorderVertex>,
    pub segments: Vec<BorderSegment>,
}

impl BorderRecord {
    /// Resolves names against the session terrain table. Unknown names are fatal.
    pub fn resolve(&self, terrains: &TerrainTable) -> MeshResult<MatchBorder> {
        let vertices = self
            .vertices
            .iter()
            .map(|v| {
                let blends = v
                    .blends
                    .iter()
                    .map(|(name, alpha)| Ok((terrains.resolve(name)?, *alpha)))
                    .collect::<MeshResult<BTreeMap<_, _>>>()?;
                Ok(MatchVertex {
                    pos: v.pos,
                    height: v.height,
                    blends,
                    vertex: None,
                })
            })
            .collect::<MeshResult<Vec<_>>>()?;
        let segments = self
            .segments
            .iter()
            .map(|s| {
                Ok(MatchSegment {
                    terrain: terrains.resolve(&s.terrain)?,
                    borders: s
                        .borders
                        .iter()
                        .map(|name| terrains.resolve(name))
                        .collect::<MeshResult<BTreeSet<_>>>()?,
                    faces: vec![],
                })
            })
            .collect::<MeshResult<Vec<_>>>()?;
        Ok(MatchBorder { vertices, segments })
    }
}

/// Match data of a whole tile, keyed by the side of the tile that wrote it.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFile {
    pub sides: BTreeMap<BorderSide, BorderRecord>,
}

/// Resolved border vertex with the mesh vertex it got pinned to.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchVertex {
    pub pos: Coord,
    pub height: Scalar,
    pub blends: BTreeMap<TerrainId, Scalar>,
    pub vertex: Option<crate::mesh::VertexId>,
}

/// Resolved border segment with the mesh faces adjoining it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSegment {
    pub terrain: TerrainId,
    pub borders: BTreeSet<TerrainId>,
    /// Faces along the segment, empty when the segment has no exact mesh counterpart.
    pub faces: Vec<FaceId>,
}

/// Resolved neighbor border adopted by a slave side.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchBorder {
    pub vertices: Vec<MatchVertex>,
    pub segments: Vec<MatchSegment>,
}
