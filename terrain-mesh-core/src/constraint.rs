use crate::{
    coord::{Bounds, Coord},
    terrain::TerrainId,
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attributes of a constraint-map face.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Terrain forced by vector data; `None` means classify from rasters.
    #[serde(default)]
    pub terrain: Option<TerrainId>,
    #[serde(default)]
    pub water: bool,
    #[serde(default)]
    pub airport: bool,
    /// Heights inside this face come from vector data, not from the DEM.
    #[serde(default)]
    pub has_elevation: bool,
}

/// Vertex of a constraint-map edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintVertex {
    pub pos: Coord,
    /// Authoritative elevation carried by vector data.
    #[serde(default)]
    pub elevation: Option<Scalar>,
}

/// One side of a constraint-map edge.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSide {
    pub region: RegionInfo,
    /// Side lies outside of the mapped area (tile edge).
    pub unbounded: bool,
}

/// Undirected constraint-map edge with both adjacent faces.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEdge {
    pub source: ConstraintVertex,
    pub target: ConstraintVertex,
    pub left: EdgeSide,
    pub right: EdgeSide,
    /// Edge blocks border blending.
    pub hard: bool,
}

/// Read-only view of the planar vector subdivision.
pub trait ConstraintMap {
    /// Every edge of the subdivision, each undirected edge once.
    fn edges(&self) -> Vec<ConstraintEdge>;

    /// Face attributes at given point, `None` outside of any mapped face.
    fn region_at(&self, point: Coord) -> Option<RegionInfo>;

    /// Tells if edge is a real land-use or feature boundary that must appear in the mesh.
    fn must_burn(&self, edge: &ConstraintEdge) -> bool {
        if edge.left.unbounded || edge.right.unbounded {
            return false;
        }
        edge.hard || edge.left.region != edge.right.region
    }
}

/// Constraint map without any edges or faces.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EmptyMap;

impl ConstraintMap for EmptyMap {
    fn edges(&self) -> Vec<ConstraintEdge> {
        vec![]
    }

    fn region_at(&self, _: Coord) -> Option<RegionInfo> {
        None
    }
}

/// Polygonal region of a [`VectorMap`].
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRegion {
    pub info: RegionInfo,
    /// Outline blocks border blending.
    #[serde(default)]
    pub hard: bool,
    /// Closed ring, last vertex is implicitly connected to the first.
    pub ring: Vec<ConstraintVertex>,
}

/// In-memory constraint map made of polygonal regions over a background.
///
/// Later regions lie on top of earlier ones. Shared outline segments between regions are
/// merged into single edges carrying both sides.
///
/// # Examples
/// ```
/// use terrain_mesh_core::prelude::*;
///
/// let lake = VectorRegion {
///     info: RegionInfo { water: true, ..Default::default() },
///     hard: false,
///     ring: [(0.2, 0.2), (0.4, 0.2), (0.4, 0.4), (0.2, 0.4)]
///         .iter()
///         .map(|(x, y)| ConstraintVertex { pos: Coord::new(*x, *y), elevation: None })
///         .collect(),
/// };
/// let map = VectorMap::new(Bounds::new(0.0, 0.0, 1.0, 1.0), vec![lake]);
/// assert_eq!(map.edges().len(), 4);
/// assert!(map.region_at(Coord::new(0.3, 0.3)).unwrap().water);
/// assert!(map.region_at(Coord::new(0.7, 0.7)).is_none());
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMap {
    pub bounds: Bounds,
    pub regions: Vec<VectorRegion>,
}

impl VectorMap {
    pub fn new(bounds: Bounds, regions: Vec<VectorRegion>) -> Self {
        Self { bounds, regions }
    }

    fn region_index_at(&self, p: Coord) -> Option<usize> {
        self.regions
            .iter()
            .rposition(|r| point_in_ring(p, &r.ring))
    }

    fn side_of(&self, a: Coord, b: Coord, left: bool) -> EdgeSide {
        let mid = a.midpoint(b);
        let dir = b - a;
        let len = dir.magnitude();
        if len <= 0.0 {
            return EdgeSide::default();
        }
        // Sample just beside the segment midpoint.
        let side = if left { -dir.right() } else { dir.right() };
        let normal = side / len;
        let sample = mid + normal * (len * 1.0e-4).max(1.0e-9);
        let unbounded = !self.bounds.contains(sample);
        EdgeSide {
            region: self
                .region_index_at(sample)
                .map(|i| self.regions[i].info)
                .unwrap_or_default(),
            unbounded,
        }
    }
}

fn edge_key(a: Coord, b: Coord) -> ([u64; 2], [u64; 2]) {
    let ka = [a.x.to_bits(), a.y.to_bits()];
    let kb = [b.x.to_bits(), b.y.to_bits()];
    if ka <= kb {
        (ka, kb)
    } else {
        (kb, ka)
    }
}

impl ConstraintMap for VectorMap {
    fn edges(&self) -> Vec<ConstraintEdge> {
        let mut result: BTreeMap<([u64; 2], [u64; 2]), ConstraintEdge> = BTreeMap::new();
        for region in &self.regions {
            let n = region.ring.len();
            if n < 3 {
                continue;
            }
            for i in 0..n {
                let source = region.ring[i];
                let target = region.ring[(i + 1) % n];
                if source.pos == target.pos {
                    continue;
                }
                let key = edge_key(source.pos, target.pos);
                let entry = result.entry(key).or_insert_with(|| ConstraintEdge {
                    source,
                    target,
                    left: self.side_of(source.pos, target.pos, true),
                    right: self.side_of(source.pos, target.pos, false),
                    hard: false,
                });
                entry.hard |= region.hard;
                for v in [source, target] {
                    for end in [&mut entry.source, &mut entry.target] {
                        if end.pos == v.pos && end.elevation.is_none() {
                            end.elevation = v.elevation;
                        }
                    }
                }
            }
        }
        result.into_values().collect()
    }

    fn region_at(&self, point: Coord) -> Option<RegionInfo> {
        self.region_index_at(point).map(|i| self.regions[i].info)
    }
}

/// Even-odd point in polygon test.
pub fn point_in_ring(p: Coord, ring: &[ConstraintVertex]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = ring[i].pos;
        let b = ring[j].pos;
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
