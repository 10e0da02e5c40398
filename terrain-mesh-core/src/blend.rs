//! Border blending between terrains of different priority.
//!
//! Every classified land face spreads its terrain as a border layer onto adjacent faces of
//! strictly lower priority. Vertex alphas fall off linearly with the distance from the
//! spreading face and reach zero at the transition distance of the terrain pair.

use crate::{
    coord::Coord,
    mesh::{predicates, FaceId, TerrainMesh},
    terrain::{TerrainId, TerrainTable},
    Scalar,
};
use std::collections::{HashSet, VecDeque};

/// Distance in meters from a point to a triangle, zero inside.
fn distance_to_face_m(p: Coord, tri: [Coord; 3]) -> Scalar {
    let [a, b, c] = tri.map(|q| (q - p).to_meters(p.y));
    let origin = Coord::default();
    let inside = [(a, b), (b, c), (c, a)]
        .iter()
        .all(|(u, w)| predicates::orient2d(*u, *w, origin) >= 0.0);
    if inside {
        return 0.0;
    }
    [(a, b), (b, c), (c, a)]
        .iter()
        .map(|(u, w)| predicates::point_segment_distance(origin, *u, *w))
        .fold(Scalar::INFINITY, Scalar::min)
}

fn blocks(mesh: &TerrainMesh, f: FaceId, i: usize) -> bool {
    mesh.face(f).edges[i].hard
}

/// Spreads the terrain of `source` onto lower priority faces around it.
///
/// Returns number of faces that received the layer.
fn propagate_from(mesh: &mut TerrainMesh, terrains: &TerrainTable, source: FaceId) -> usize {
    let Some(layer) = mesh.face(source).terrain else {
        return 0;
    };
    let tri = mesh.face_coords(source);
    let mut visited = HashSet::from([source]);
    let mut open = VecDeque::new();
    for i in 0..3 {
        if let Some(g) = mesh.face(source).neighbor(i) {
            if !blocks(mesh, source, i) && visited.insert(g) {
                open.push_back(g);
            }
        }
    }
    let mut count = 0;
    while let Some(f) = open.pop_front() {
        let Some(base) = mesh.face(f).terrain else {
            continue;
        };
        if !terrains.is_lower_priority(base, layer) {
            continue;
        }
        let xon = terrains.xon_dist(layer, base) * mesh.face_normal(f)[2];
        if xon <= 0.0 {
            continue;
        }
        let mut increased = false;
        for v in mesh.face(f).vertices {
            let vertex = mesh.vertex(v);
            if vertex.locked {
                continue;
            }
            let d = distance_to_face_m(vertex.pos, tri);
            let alpha = ((xon - d) / xon).clamp(0.0, 1.0);
            if alpha > vertex.blend(layer) {
                mesh.vertex_mut(v).blends.insert(layer, alpha);
                increased = true;
            }
        }
        let vertices = mesh.face(f).vertices;
        if vertices.iter().any(|v| mesh.vertex(*v).blend(layer) > 0.0)
            && mesh.face_mut(f).borders.insert(layer)
        {
            count += 1;
        }
        if !increased {
            continue;
        }
        for i in 0..3 {
            if let Some(g) = mesh.face(f).neighbor(i) {
                if !blocks(mesh, f, i) && visited.insert(g) {
                    open.push_back(g);
                }
            }
        }
    }
    count
}

/// Spreads every land terrain onto its lower priority surroundings.
///
/// Propagation stops at hard edges, at faces of equal or higher priority and wherever no
/// corner alpha grows any more. Locked vertices keep their alphas. Returns number of
/// added face border layers.
pub fn propagate_borders(mesh: &mut TerrainMesh, terrains: &TerrainTable) -> usize {
    let mut count = 0;
    for f in mesh.face_ids().collect::<Vec<_>>() {
        let face = mesh.face(f);
        let water = face.region.water || face.terrain.map(|t| terrains.is_water(t)).unwrap_or(true);
        if !water {
            count += propagate_from(mesh, terrains, f);
        }
    }
    log::debug!("Border propagation added {} face layers", count);
    count
}

/// Promotes border layers that fully cover a face to its base terrain.
///
/// The highest priority layer that is opaque at all three corners becomes the base, layers
/// below it are dropped since they can not show through. Faces in `protected` keep their
/// layers. Returns number of promoted faces.
pub fn optimize_borders(
    mesh: &mut TerrainMesh,
    terrains: &TerrainTable,
    protected: &HashSet<FaceId>,
) -> usize {
    let mut count = 0;
    for f in mesh.face_ids().collect::<Vec<_>>() {
        if protected.contains(&f) {
            continue;
        }
        let face = mesh.face(f);
        let promoted = face
            .borders
            .iter()
            .copied()
            .filter(|layer| {
                face.vertices
                    .iter()
                    .all(|v| mesh.vertex(*v).blend(*layer) >= 1.0)
            })
            .max_by(|a, b| terrains.compare_priority(*a, *b));
        let Some(promoted) = promoted else {
            continue;
        };
        let face = mesh.face_mut(f);
        face.terrain = Some(promoted);
        face.borders
            .retain(|layer| terrains.is_lower_priority(promoted, *layer));
        count += 1;
    }
    log::debug!("Promoted {} saturated border layers", count);
    count
}

/// Border layers of a face ordered by ascending priority.
pub fn sorted_borders(mesh: &TerrainMesh, terrains: &TerrainTable, f: FaceId) -> Vec<TerrainId> {
    let mut layers = mesh.face(f).borders.iter().copied().collect::<Vec<_>>();
    layers.sort_by(|a, b| terrains.compare_priority(*a, *b));
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coord::Bounds, mesh::EdgeFlags, terrain::TerrainDef};
    use approx::assert_relative_eq;

    fn terrains() -> TerrainTable {
        TerrainTable::new(vec![
            TerrainDef::new("rock", 20, 100.0),
            TerrainDef::new("grass", 10, 100.0),
            TerrainDef::new("water", 0, 100.0).water(),
        ])
        .unwrap()
    }

    /// Flat tile split along the meridian at 0.01 into two halves of two faces each.
    fn halves() -> (TerrainMesh, TerrainTable) {
        let t = terrains();
        let bounds = Bounds::new(0.0, 0.0, 0.02, 0.01);
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, 0.0))
            .collect::<Vec<_>>();
        let mut mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
        let a = mesh.insert_point(Coord::new(0.01, 0.0), 0.0, None).unwrap();
        let b = mesh.insert_point(Coord::new(0.01, 0.01), 0.0, None).unwrap();
        mesh.insert_constraint(a.vertex, b.vertex, EdgeFlags::constraint(false))
            .unwrap();
        let rock = t.find("rock");
        let grass = t.find("grass");
        for f in mesh.face_ids().collect::<Vec<_>>() {
            let west = mesh.face_centroid(f).x < 0.01;
            mesh.face_mut(f).terrain = if west { rock } else { grass };
        }
        (mesh, t)
    }

    #[test]
    fn test_distance_to_face() {
        let tri = [Coord::new(0.0, 0.0), Coord::new(0.01, 0.0), Coord::new(0.0, 0.01)];
        assert_eq!(distance_to_face_m(Coord::new(0.002, 0.002), tri), 0.0);
        let d = distance_to_face_m(Coord::new(0.0, -0.001), tri);
        assert_relative_eq!(d, 0.001 * crate::coord::DEG_TO_MTR_LAT, max_relative = 1.0e-9);
    }

    #[test]
    fn test_alpha_falls_off_with_distance() {
        let (mut mesh, t) = halves();
        let rock = t.find("rock").unwrap();
        // 100 m transition, put grass vertices at 0, 50 and 150 meters from the seam
        let deg = |m: Scalar| m / crate::coord::DEG_TO_MTR_LAT;
        let near = mesh
            .insert_point(Coord::new(0.01 + deg(50.0), 0.005), 0.0, None)
            .unwrap();
        let far = mesh
            .insert_point(Coord::new(0.01 + deg(150.0), 0.002), 0.0, None)
            .unwrap();
        for f in mesh.face_ids().collect::<Vec<_>>() {
            let west = mesh.face_centroid(f).x < 0.01;
            mesh.face_mut(f).terrain = if west { Some(rock) } else { t.find("grass") };
        }
        let added = propagate_borders(&mut mesh, &t);
        assert!(added > 0);
        let seam = mesh
            .vertex_ids()
            .filter(|v| mesh.vertex(*v).pos.x == 0.01)
            .collect::<Vec<_>>();
        assert_eq!(seam.len(), 2);
        for v in seam {
            assert_eq!(mesh.vertex(v).blend(rock), 1.0);
        }
        // the near vertex is 50 m off the seam but may be closer to a rock face corner
        let near_alpha = mesh.vertex(near.vertex).blend(rock);
        assert!(near_alpha >= 0.5 - 1.0e-6 && near_alpha < 1.0);
        assert_eq!(mesh.vertex(far.vertex).blend(rock), 0.0);
        // rock never receives its own layer
        for face in mesh.faces() {
            if face.terrain == Some(rock) {
                assert!(face.borders.is_empty());
            }
        }
    }

    #[test]
    fn test_hard_edges_block_propagation() {
        let (mut mesh, t) = halves();
        let (a, b) = {
            let line = mesh.vertices_on_line(true, 0.01);
            (line[0], line[1])
        };
        let (f, i) = mesh.find_edge(a, b).unwrap();
        let g = mesh.face(f).neighbor(i).unwrap();
        let k = (0..3)
            .find(|k| mesh.face(g).edge(*k) == (b, a) || mesh.face(g).edge(*k) == (a, b))
            .unwrap();
        mesh.face_mut(f).edges[i].hard = true;
        mesh.face_mut(g).edges[k].hard = true;
        assert_eq!(propagate_borders(&mut mesh, &t), 0);
        assert!(mesh.vertices().iter().all(|v| v.blends.is_empty()));
    }

    #[test]
    fn test_water_does_not_spread() {
        let (mut mesh, t) = halves();
        let water = t.find("water");
        for f in mesh.face_ids().collect::<Vec<_>>() {
            mesh.face_mut(f).terrain = water;
        }
        let f = FaceId(0);
        mesh.face_mut(f).terrain = t.find("grass");
        propagate_borders(&mut mesh, &t);
        let grass = t.find("grass").unwrap();
        // grass spreads onto lower priority water, never the other way round
        assert!(mesh.faces().iter().any(|face| face.borders.contains(&grass)));
        assert!(mesh
            .faces()
            .iter()
            .all(|face| face.terrain != Some(grass) || face.borders.is_empty()));
    }

    #[test]
    fn test_optimize_promotes_saturated_layer() {
        let (mut mesh, t) = halves();
        let rock = t.find("rock").unwrap();
        let grass = t.find("grass").unwrap();
        let f = mesh
            .face_ids()
            .find(|f| mesh.face(*f).terrain == Some(grass))
            .unwrap();
        mesh.face_mut(f).borders.insert(rock);
        for v in mesh.face(f).vertices {
            mesh.vertex_mut(v).blends.insert(rock, 1.0);
        }
        let mut protected = HashSet::new();
        protected.insert(f);
        assert_eq!(optimize_borders(&mut mesh, &t, &protected), 0);
        protected.clear();
        assert_eq!(optimize_borders(&mut mesh, &t, &protected), 1);
        assert_eq!(mesh.face(f).terrain, Some(rock));
        assert!(mesh.face(f).borders.is_empty());
        assert!(sorted_borders(&mesh, &t, f).is_empty());
    }
}
