mod constrain;
mod insert;
mod locate;
pub mod predicates;
pub mod settings;

pub use insert::Insertion;
pub use locate::Location;

use crate::{
    constraint::RegionInfo,
    coord::{Bounds, Coord, DEG_TO_MTR_LAT},
    error::{MeshError, MeshResult},
    terrain::TerrainId,
    utils::triangulate,
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Stable handle of a mesh vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexId(pub usize);

/// Stable handle of a mesh face. Splits and flips recycle handles in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FaceId(pub usize);

/// Per-edge flags of a face.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeFlags {
    /// Edge is forced by the constraint map.
    pub constrained: bool,
    /// Edge blocks border blend propagation.
    pub hard: bool,
}

impl EdgeFlags {
    pub fn constraint(hard: bool) -> Self {
        Self {
            constrained: true,
            hard,
        }
    }
}

/// Height plane `h = a * lon + b * lat + c`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub a: Scalar,
    pub b: Scalar,
    pub c: Scalar,
}

impl Plane {
    /// Plane through three points, `None` for degenerate triangles.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let plane = Plane::from_points(
    ///     [Coord::new(0.0, 0.0), Coord::new(1.0, 0.0), Coord::new(0.0, 1.0)],
    ///     [1.0, 3.0, 5.0],
    /// )
    /// .unwrap();
    /// assert_eq!(plane.height_at(Coord::new(1.0, 1.0)), 7.0);
    /// ```
    pub fn from_points(p: [Coord; 3], h: [Scalar; 3]) -> Option<Self> {
        let d1 = p[1] - p[0];
        let d2 = p[2] - p[0];
        let det = d1.cross(d2);
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let h1 = h[1] - h[0];
        let h2 = h[2] - h[0];
        let a = (h1 * d2.y - h2 * d1.y) / det;
        let b = (d1.x * h2 - d2.x * h1) / det;
        let c = h[0] - a * p[0].x - b * p[0].y;
        Some(Self { a, b, c })
    }

    #[inline]
    pub fn height_at(&self, p: Coord) -> Scalar {
        self.a * p.x + self.b * p.y + self.c
    }

    /// Unit normal in local meters at latitude `lat`.
    pub fn normal(&self, lat: Scalar) -> [Scalar; 3] {
        let gx = self.a / (DEG_TO_MTR_LAT * lat.to_radians().cos());
        let gy = self.b / DEG_TO_MTR_LAT;
        let len = (gx * gx + gy * gy + 1.0).sqrt();
        [-gx / len, -gy / len, 1.0 / len]
    }
}

/// Where a vertex came from.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexSource {
    /// Tile corner.
    #[default]
    Seed,
    /// DEM grid sample.
    Dem { x: usize, y: usize },
    /// Constraint-map vertex or a point on a constraint edge.
    Constraint,
    /// Pinned to a neighbor tile border vertex.
    Border,
    /// Any other arbitrary point.
    Derived,
}

/// Mesh vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    pub pos: Coord,
    pub height: Scalar,
    /// Border blend alpha per terrain layer.
    pub blends: BTreeMap<TerrainId, Scalar>,
    pub source: VertexSource,
    /// Height is authoritative (vector data or neighbor border).
    pub explicit_height: bool,
    /// Vertex lies on the tile outline.
    pub edge_of_world: bool,
    /// Position, height and blends must not change any more.
    pub locked: bool,
    pub(crate) face: FaceId,
}

impl MeshVertex {
    pub fn blend(&self, terrain: TerrainId) -> Scalar {
        self.blends.get(&terrain).copied().unwrap_or(0.0)
    }
}

/// Mesh triangle. Vertices are in counter-clockwise order, edge `i` is opposite vertex `i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshFace {
    pub vertices: [VertexId; 3],
    pub(crate) neighbors: [Option<FaceId>; 3],
    pub edges: [EdgeFlags; 3],
    /// Worst height residual of any free DEM sample inside the face.
    pub insert_err: Scalar,
    /// DEM cell of the worst residual.
    pub insert_at: Option<(usize, usize)>,
    pub plane: Plane,
    /// Constraint-map face under the centroid.
    pub region: RegionInfo,
    pub terrain: Option<TerrainId>,
    pub borders: BTreeSet<TerrainId>,
}

impl MeshFace {
    fn new(vertices: [VertexId; 3]) -> Self {
        Self {
            vertices,
            neighbors: [None; 3],
            edges: [EdgeFlags::default(); 3],
            insert_err: 0.0,
            insert_at: None,
            plane: Plane::default(),
            region: RegionInfo::default(),
            terrain: None,
            borders: BTreeSet::new(),
        }
    }

    /// Face replacing (part of) `parent`, keeping its classification.
    fn child(
        parent: &Self,
        vertices: [VertexId; 3],
        neighbors: [Option<FaceId>; 3],
        edges: [EdgeFlags; 3],
    ) -> Self {
        Self {
            vertices,
            neighbors,
            edges,
            insert_err: 0.0,
            insert_at: None,
            plane: parent.plane,
            region: parent.region,
            terrain: parent.terrain,
            borders: parent.borders.clone(),
        }
    }

    pub fn neighbor(&self, edge: usize) -> Option<FaceId> {
        self.neighbors[edge]
    }

    pub fn index_of(&self, v: VertexId) -> Option<usize> {
        self.vertices.iter().position(|x| *x == v)
    }

    /// Endpoints of edge `i` in counter-clockwise order.
    pub fn edge(&self, i: usize) -> (VertexId, VertexId) {
        (self.vertices[(i + 1) % 3], self.vertices[(i + 2) % 3])
    }
}

/// Constrained Delaunay triangulation of a rectangular tile, stored in index arenas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainMesh {
    bounds: Bounds,
    vertices: Vec<MeshVertex>,
    faces: Vec<MeshFace>,
}

impl TerrainMesh {
    /// Triangulates the seed points (which must span the whole tile) into a new mesh.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
    /// let seeds = bounds.corners().iter().map(|c| (*c, 0.0)).collect::<Vec<_>>();
    /// let mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
    /// assert_eq!(mesh.vertex_count(), 4);
    /// assert_eq!(mesh.face_count(), 2);
    /// assert!(mesh.check_topology().is_ok());
    /// ```
    pub fn from_seed(bounds: Bounds, seeds: &[(Coord, Scalar)]) -> MeshResult<Self> {
        let points = seeds.iter().map(|(p, _)| *p).collect::<Vec<_>>();
        let triangles = triangulate(&points, bounds)?;
        let mut mesh = Self {
            bounds,
            vertices: Vec::with_capacity(seeds.len()),
            faces: Vec::with_capacity(triangles.len()),
        };
        for (p, h) in seeds {
            mesh.push_vertex(*p, *h);
        }
        let mut edges: HashMap<(VertexId, VertexId), (FaceId, usize)> = HashMap::new();
        for t in triangles {
            let f = FaceId(mesh.faces.len());
            let vertices = [VertexId(t[0]), VertexId(t[1]), VertexId(t[2])];
            mesh.faces.push(MeshFace::new(vertices));
            for (k, v) in vertices.iter().enumerate() {
                mesh.vertices[v.0].face = f;
                let (a, b) = mesh.faces[f.0].edge(k);
                if let Some((g, j)) = edges.remove(&(b, a)) {
                    mesh.faces[f.0].neighbors[k] = Some(g);
                    mesh.faces[g.0].neighbors[j] = Some(f);
                } else {
                    edges.insert((a, b), (f, k));
                }
            }
        }
        if mesh.faces.is_empty() {
            return Err(MeshError::FailedTriangulation);
        }
        let edges = mesh
            .face_ids()
            .flat_map(|f| {
                let face = &mesh.faces[f.0];
                (0..3).map(move |i| face.edge(i)).collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let mut affected = vec![];
        mesh.legalize_edges(edges, &mut affected);
        Ok(mesh)
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> {
        (0..self.vertices.len()).map(VertexId)
    }

    pub fn face_ids(&self) -> impl Iterator<Item = FaceId> {
        (0..self.faces.len()).map(FaceId)
    }

    pub fn vertex(&self, v: VertexId) -> &MeshVertex {
        &self.vertices[v.0]
    }

    pub fn vertex_mut(&mut self, v: VertexId) -> &mut MeshVertex {
        &mut self.vertices[v.0]
    }

    pub fn face(&self, f: FaceId) -> &MeshFace {
        &self.faces[f.0]
    }

    pub fn face_mut(&mut self, f: FaceId) -> &mut MeshFace {
        &mut self.faces[f.0]
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn faces(&self) -> &[MeshFace] {
        &self.faces
    }

    pub fn face_coords(&self, f: FaceId) -> [Coord; 3] {
        let v = self.faces[f.0].vertices;
        [
            self.vertices[v[0].0].pos,
            self.vertices[v[1].0].pos,
            self.vertices[v[2].0].pos,
        ]
    }

    pub fn face_heights(&self, f: FaceId) -> [Scalar; 3] {
        let v = self.faces[f.0].vertices;
        [
            self.vertices[v[0].0].height,
            self.vertices[v[1].0].height,
            self.vertices[v[2].0].height,
        ]
    }

    pub fn face_centroid(&self, f: FaceId) -> Coord {
        let [a, b, c] = self.face_coords(f);
        Coord::new((a.x + b.x + c.x) / 3.0, (a.y + b.y + c.y) / 3.0)
    }

    /// Face area in square meters.
    pub fn face_area_m(&self, f: FaceId) -> Scalar {
        let [a, b, c] = self.face_coords(f);
        let lat = (a.y + b.y + c.y) / 3.0;
        ((b - a).to_meters(lat).cross((c - a).to_meters(lat)) * 0.5).abs()
    }

    /// Plane through the current vertex heights of a face.
    pub fn face_plane(&self, f: FaceId) -> Option<Plane> {
        Plane::from_points(self.face_coords(f), self.face_heights(f))
    }

    /// Recomputes stored planes of all faces from current vertex heights.
    pub fn update_planes(&mut self) {
        for f in 0..self.faces.len() {
            if let Some(plane) = self.face_plane(FaceId(f)) {
                self.faces[f].plane = plane;
            }
        }
    }

    /// Unit face normal in local meters.
    pub fn face_normal(&self, f: FaceId) -> [Scalar; 3] {
        let lat = self.face_centroid(f).y;
        self.face_plane(f)
            .map(|p| p.normal(lat))
            .unwrap_or([0.0, 0.0, 1.0])
    }

    /// Area weighted vertex normal.
    pub fn vertex_normal(&self, v: VertexId) -> [Scalar; 3] {
        let mut n = [0.0; 3];
        for f in self.faces_around(v) {
            let w = self.face_area_m(f);
            let fnormal = self.face_normal(f);
            for i in 0..3 {
                n[i] += fnormal[i] * w;
            }
        }
        let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if len > 0.0 {
            [n[0] / len, n[1] / len, n[2] / len]
        } else {
            [0.0, 0.0, 1.0]
        }
    }

    /// Faces incident to a vertex in counter-clockwise order.
    pub fn faces_around(&self, v: VertexId) -> Vec<FaceId> {
        let start = self.vertices[v.0].face;
        let limit = self.faces.len() + 1;
        let mut result = vec![start];
        let mut f = start;
        for _ in 0..limit {
            let face = &self.faces[f.0];
            let Some(k) = face.index_of(v) else {
                break;
            };
            match face.neighbors[(k + 1) % 3] {
                Some(g) if g == start => return result,
                Some(g) => {
                    result.push(g);
                    f = g;
                }
                None => break,
            }
        }
        let mut before = vec![];
        f = start;
        for _ in 0..limit {
            let face = &self.faces[f.0];
            let Some(k) = face.index_of(v) else {
                break;
            };
            match face.neighbors[(k + 2) % 3] {
                Some(g) if g == start => break,
                Some(g) => {
                    before.push(g);
                    f = g;
                }
                None => break,
            }
        }
        before.reverse();
        before.extend(result);
        before
    }

    /// Vertices connected to `v` by an edge.
    pub fn vertex_neighbors(&self, v: VertexId) -> Vec<VertexId> {
        let mut result = Vec::new();
        for f in self.faces_around(v) {
            let face = &self.faces[f.0];
            if let Some(k) = face.index_of(v) {
                for w in [face.vertices[(k + 1) % 3], face.vertices[(k + 2) % 3]] {
                    if !result.contains(&w) {
                        result.push(w);
                    }
                }
            }
        }
        result
    }

    /// Finds a face containing edge `a`-`b` in either direction and the edge index.
    pub fn find_edge(&self, a: VertexId, b: VertexId) -> Option<(FaceId, usize)> {
        for f in self.faces_around(a) {
            let face = &self.faces[f.0];
            let k = face.index_of(a)?;
            if face.vertices[(k + 1) % 3] == b {
                return Some((f, (k + 2) % 3));
            }
            if face.vertices[(k + 2) % 3] == b {
                return Some((f, (k + 1) % 3));
            }
        }
        None
    }

    /// All faces adjacent to edge `a`-`b`.
    pub fn edge_faces(&self, a: VertexId, b: VertexId) -> Vec<FaceId> {
        match self.find_edge(a, b) {
            Some((f, i)) => std::iter::once(f)
                .chain(self.faces[f.0].neighbors[i])
                .collect(),
            None => vec![],
        }
    }

    pub fn is_constrained(&self, a: VertexId, b: VertexId) -> bool {
        self.find_edge(a, b)
            .map(|(f, i)| self.faces[f.0].edges[i].constrained)
            .unwrap_or(false)
    }

    /// Every constrained edge once, as vertex pairs.
    pub fn constrained_edges(&self) -> Vec<(VertexId, VertexId)> {
        let mut result = vec![];
        for (fi, face) in self.faces.iter().enumerate() {
            for i in 0..3 {
                if !face.edges[i].constrained {
                    continue;
                }
                let (a, b) = face.edge(i);
                let owner = match face.neighbors[i] {
                    Some(g) => fi < g.0,
                    None => true,
                };
                if owner {
                    result.push((a, b));
                }
            }
        }
        result
    }

    /// Vertices lying exactly on the line `x == value` (or `y == value`), sorted along it.
    pub fn vertices_on_line(&self, vertical: bool, value: Scalar) -> Vec<VertexId> {
        let mut result = self
            .vertex_ids()
            .filter(|v| {
                let p = self.vertices[v.0].pos;
                if vertical {
                    p.x == value
                } else {
                    p.y == value
                }
            })
            .collect::<Vec<_>>();
        result.sort_by(|a, b| {
            let pa = self.vertices[a.0].pos;
            let pb = self.vertices[b.0].pos;
            let (ka, kb) = if vertical { (pa.y, pb.y) } else { (pa.x, pb.x) };
            ka.total_cmp(&kb)
        });
        result
    }

    /// Moves a vertex if no incident face gets inverted by the move.
    pub fn try_move_vertex(&mut self, v: VertexId, pos: Coord) -> bool {
        let old = self.vertices[v.0].pos;
        self.vertices[v.0].pos = pos;
        let valid = self.faces_around(v).into_iter().all(|f| {
            let [a, b, c] = self.face_coords(f);
            predicates::orient2d(a, b, c) > 0.0
        });
        if !valid {
            self.vertices[v.0].pos = old;
        }
        valid
    }

    /// Validates adjacency symmetry, orientation and constraint flag consistency.
    pub fn check_topology(&self) -> Result<(), String> {
        for (fi, face) in self.faces.iter().enumerate() {
            let [a, b, c] = self.face_coords(FaceId(fi));
            if predicates::orient2d(a, b, c) <= 0.0 {
                return Err(format!("face {} is not counter-clockwise", fi));
            }
            for i in 0..3 {
                let (u, w) = face.edge(i);
                if let Some(g) = face.neighbors[i] {
                    let other = &self.faces[g.0];
                    let Some(j) = (0..3).find(|j| other.edge(*j) == (w, u)) else {
                        return Err(format!("face {} edge {} has no twin in face {}", fi, i, g.0));
                    };
                    if other.neighbors[j] != Some(FaceId(fi)) {
                        return Err(format!("face {} edge {} twin points elsewhere", fi, i));
                    }
                    if other.edges[j] != face.edges[i] {
                        return Err(format!("face {} edge {} flags differ from twin", fi, i));
                    }
                }
            }
        }
        for (vi, vertex) in self.vertices.iter().enumerate() {
            if self.faces[vertex.face.0].index_of(VertexId(vi)).is_none() {
                return Err(format!("vertex {} points to a face it is not part of", vi));
            }
        }
        Ok(())
    }

    /// Tells if every unconstrained interior edge satisfies the empty circumcircle property.
    pub fn is_delaunay(&self) -> bool {
        self.faces.iter().all(|face| {
            (0..3).all(|i| {
                if face.edges[i].constrained {
                    return true;
                }
                let Some(g) = face.neighbors[i] else {
                    return true;
                };
                let (u, w) = face.edge(i);
                let other = &self.faces[g.0];
                let Some(q) = other.vertices.iter().find(|x| **x != u && **x != w) else {
                    return true;
                };
                let [a, b, c] = face.vertices.map(|v| self.vertices[v.0].pos);
                !predicates::in_circle(a, b, c, self.vertices[q.0].pos)
            })
        })
    }

    pub(crate) fn push_vertex(&mut self, pos: Coord, height: Scalar) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(MeshVertex {
            pos,
            height,
            blends: BTreeMap::new(),
            source: VertexSource::Derived,
            explicit_height: false,
            edge_of_world: self.bounds.on_boundary(pos),
            locked: false,
            face: FaceId(0),
        });
        id
    }

    /// Points the neighbor across edge `a`-`b` of `target` back at `face`.
    fn relink(&mut self, target: Option<FaceId>, a: VertexId, b: VertexId, face: FaceId) {
        if let Some(t) = target {
            let other = &mut self.faces[t.0];
            for j in 0..3 {
                let (u, w) = other.edge(j);
                if (u == a && w == b) || (u == b && w == a) {
                    other.neighbors[j] = Some(face);
                    return;
                }
            }
        }
    }

    fn set_edge_flags(&mut self, f: FaceId, i: usize, flags: EdgeFlags) {
        self.faces[f.0].edges[i] = flags;
        let (a, b) = self.faces[f.0].edge(i);
        if let Some(g) = self.faces[f.0].neighbors[i] {
            let other = &mut self.faces[g.0];
            if let Some(j) = (0..3).find(|j| other.edge(*j) == (b, a)) {
                other.edges[j] = flags;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn unit_mesh() -> TerrainMesh {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, 0.0))
            .collect::<Vec<_>>();
        TerrainMesh::from_seed(bounds, &seeds).unwrap()
    }

    #[test]
    fn test_seed_mesh_topology() {
        let mesh = unit_mesh();
        assert_eq!(mesh.face_count(), 2);
        assert!(mesh.check_topology().is_ok());
        assert!(mesh.vertices().iter().all(|v| v.edge_of_world));
        for v in mesh.vertex_ids() {
            assert!(!mesh.faces_around(v).is_empty());
        }
    }

    #[test]
    fn test_fan_and_neighbors_after_split() {
        let mut mesh = unit_mesh();
        let ins = mesh.insert_point(Coord::new(0.5, 0.4), 1.0, None).unwrap();
        assert!(ins.created);
        assert_eq!(mesh.faces_around(ins.vertex).len(), 4);
        assert_eq!(mesh.vertex_neighbors(ins.vertex).len(), 4);
        assert!(mesh.check_topology().is_ok());
        assert!(mesh.is_delaunay());
    }

    #[test]
    fn test_plane_normal_of_flat_face_points_up() {
        let plane = Plane {
            a: 0.0,
            b: 0.0,
            c: 10.0,
        };
        assert_eq!(plane.normal(45.0), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_vertices_on_line_sorted() {
        let mut mesh = unit_mesh();
        mesh.insert_point(Coord::new(0.0, 0.7), 0.0, None).unwrap();
        mesh.insert_point(Coord::new(0.0, 0.2), 0.0, None).unwrap();
        let line = mesh.vertices_on_line(true, 0.0);
        let ys = line
            .iter()
            .map(|v| mesh.vertex(*v).pos.y)
            .collect::<Vec<_>>();
        assert_eq!(ys, vec![0.0, 0.2, 0.7, 1.0]);
    }
}
