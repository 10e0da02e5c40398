use super::{BorderRecord, BorderSegment, BorderSide, BorderVertex, MatchBorder, MatchFile};
use crate::{
    coord::Coord,
    error::{MeshError, MeshResult},
    insertion::{insert_any_point, MeshContext},
    mesh::{FaceId, TerrainMesh, VertexId, VertexSource},
    terrain::{TerrainId, TerrainTable},
    utils::lerp,
    Scalar,
};
use std::collections::BTreeMap;

/// Summary of a single side match.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BorderMatchStats {
    /// Existing vertices snapped onto neighbor vertices.
    pub matched: usize,
    /// Neighbor vertices inserted as new vertices.
    pub inserted: usize,
    /// Own side vertices without neighbor counterpart, interpolated along the neighbor side.
    pub interpolated: usize,
}

/// Pins a slave side onto the neighbor border.
///
/// Vertices are paired greedily by distance within the match tolerance. Paired vertices
/// move onto the neighbor position and adopt its height and blends; unpaired neighbor
/// vertices are inserted. Every side vertex ends up locked, and the DEM samples on the
/// side are marked used so refinement never adds vertices there.
pub fn match_border(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    side: BorderSide,
    border: &mut MatchBorder,
) -> MeshResult<BorderMatchStats> {
    let bounds = mesh.bounds();
    let line = side.line(&bounds);
    let vertical = side.is_vertical();
    let tolerance = ctx.settings.match_tolerance;
    let mut stats = BorderMatchStats::default();

    // snap neighbor vertices onto the side line, dropping the ones outside of it
    border.vertices.retain_mut(|v| {
        let offset = if vertical { v.pos.x - line } else { v.pos.y - line };
        if offset.abs() > tolerance || !bounds.contains(on_line(v.pos, vertical, line)) {
            log::warn!("Ignoring {} border vertex off the side at {:?}", side, v.pos);
            return false;
        }
        v.pos = on_line(v.pos, vertical, line);
        true
    });
    if border.segments.len() + 1 != border.vertices.len() {
        border.segments.truncate(border.vertices.len().saturating_sub(1));
        while border.segments.len() + 1 < border.vertices.len() {
            let last = border.segments.last().cloned();
            match last {
                Some(last) => border.segments.push(last),
                None => break,
            }
        }
    }

    let corners = bounds.corners();
    let slaves = mesh.vertices_on_line(vertical, line);
    let mut candidates = vec![];
    for (mi, m) in border.vertices.iter().enumerate() {
        for (si, s) in slaves.iter().enumerate() {
            let d = (side.along(m.pos) - side.along(mesh.vertex(*s).pos)).abs();
            if d <= tolerance {
                candidates.push((d, mi, si));
            }
        }
    }
    candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    let mut master_taken = vec![false; border.vertices.len()];
    let mut slave_taken = vec![false; slaves.len()];
    for (_, mi, si) in candidates {
        if master_taken[mi] || slave_taken[si] {
            continue;
        }
        let v = slaves[si];
        let m = &border.vertices[mi];
        let current = mesh.vertex(v);
        let fixed = current.locked || corners.contains(&current.pos);
        if !fixed && !mesh.try_move_vertex(v, m.pos) {
            continue;
        }
        master_taken[mi] = true;
        slave_taken[si] = true;
        pin(mesh, v, m.height, &m.blends);
        border.vertices[mi].vertex = Some(v);
        stats.matched += 1;
    }

    let mut hint = None;
    for mi in 0..border.vertices.len() {
        if master_taken[mi] {
            continue;
        }
        let m = &border.vertices[mi];
        let (pos, height, blends) = (m.pos, m.height, m.blends.clone());
        let ins = insert_any_point(ctx, mesh, pos, Some(height), hint)?;
        hint = ins.affected.first().copied();
        pin(mesh, ins.vertex, height, &blends);
        border.vertices[mi].vertex = Some(ins.vertex);
        if ins.created {
            stats.inserted += 1;
        }
    }

    for (si, v) in slaves.iter().enumerate() {
        if slave_taken[si] || mesh.vertex(*v).locked {
            continue;
        }
        let along = side.along(mesh.vertex(*v).pos);
        if let Some(height) = interpolate_height(border, side, along) {
            let vertex = mesh.vertex_mut(*v);
            vertex.height = height;
            vertex.explicit_height = true;
            vertex.locked = true;
            stats.interpolated += 1;
        }
    }

    lock_dem_line(ctx, vertical, line);
    log::debug!(
        "Matched {} border: {} pinned, {} inserted, {} interpolated",
        side,
        stats.matched,
        stats.inserted,
        stats.interpolated
    );
    Ok(stats)
}

fn on_line(p: Coord, vertical: bool, line: Scalar) -> Coord {
    if vertical {
        Coord::new(line, p.y)
    } else {
        Coord::new(p.x, line)
    }
}

fn pin(
    mesh: &mut TerrainMesh,
    v: VertexId,
    height: Scalar,
    blends: &BTreeMap<TerrainId, Scalar>,
) {
    let vertex = mesh.vertex_mut(v);
    if vertex.locked {
        return;
    }
    vertex.height = height;
    vertex.blends = blends.clone();
    vertex.explicit_height = true;
    vertex.locked = true;
    if vertex.source != VertexSource::Seed {
        vertex.source = VertexSource::Border;
    }
}

/// Height along the neighbor polyline at given position along the side.
fn interpolate_height(border: &MatchBorder, side: BorderSide, along: Scalar) -> Option<Scalar> {
    border.vertices.windows(2).find_map(|pair| {
        let a = side.along(pair[0].pos);
        let b = side.along(pair[1].pos);
        let (lo, hi, ha, hb) = if a <= b {
            (a, b, pair[0].height, pair[1].height)
        } else {
            (b, a, pair[1].height, pair[0].height)
        };
        if along < lo || along > hi {
            return None;
        }
        let t = if hi > lo { (along - lo) / (hi - lo) } else { 0.0 };
        Some(lerp(ha, hb, t))
    })
}

/// Marks every DEM sample lying on the side line as used.
fn lock_dem_line(ctx: &mut MeshContext, vertical: bool, line: Scalar) {
    let dem = ctx.dem;
    if vertical {
        let x = dem.lon_to_x(line).round();
        if x < 0.0 || x >= dem.width() as Scalar || dem.x_to_lon(x) != line {
            return;
        }
        for y in 0..dem.height() {
            ctx.used.set(x as usize, y);
        }
    } else {
        let y = dem.lat_to_y(line).round();
        if y < 0.0 || y >= dem.height() as Scalar || dem.y_to_lat(y) != line {
            return;
        }
        for x in 0..dem.width() {
            ctx.used.set(x, y as usize);
        }
    }
}

/// Finds the mesh faces adjoining each segment of a matched border.
///
/// Segments whose vertices are not connected by side edges keep an empty face list.
pub fn border_find_edge_tris(mesh: &TerrainMesh, side: BorderSide, border: &mut MatchBorder) {
    let bounds = mesh.bounds();
    let line = side.line(&bounds);
    let chain = mesh.vertices_on_line(side.is_vertical(), line);
    let mut missing = 0;
    for k in 0..border.segments.len() {
        let (Some(a), Some(b)) = (border.vertices[k].vertex, border.vertices[k + 1].vertex) else {
            border.segments[k].faces.clear();
            missing += 1;
            continue;
        };
        let ia = chain.iter().position(|v| *v == a);
        let ib = chain.iter().position(|v| *v == b);
        let faces = match (ia, ib) {
            (Some(ia), Some(ib)) if ia != ib => {
                let (lo, hi) = (ia.min(ib), ia.max(ib));
                chain[lo..=hi]
                    .windows(2)
                    .map(|pair| mesh.find_edge(pair[0], pair[1]).map(|(f, _)| f))
                    .collect::<Option<Vec<FaceId>>>()
            }
            _ => None,
        };
        if faces.is_none() {
            missing += 1;
        }
        border.segments[k].faces = faces.unwrap_or_default();
    }
    if missing > 0 {
        log::debug!("{} border segments on {} side have no mesh edge", missing, side);
    }
}

/// Makes slave faces along a border agree with the neighbor terrain.
///
/// When the neighbor terrain has lower priority than the face terrain, the face is rebased
/// onto the neighbor terrain and its own terrain becomes a border layer fading in from the
/// side. Neighbor border layers above the face base carry over. Returns rebased faces.
pub fn rebase_border_faces(
    mesh: &mut TerrainMesh,
    terrains: &TerrainTable,
    side: BorderSide,
    border: &MatchBorder,
) -> usize {
    let line = side.line(&mesh.bounds());
    let vertical = side.is_vertical();
    let mut count = 0;
    for segment in &border.segments {
        for f in &segment.faces {
            let Some(own) = mesh.face(*f).terrain else {
                continue;
            };
            let master = segment.terrain;
            if terrains.is_lower_priority(master, own) {
                let vertices = mesh.face(*f).vertices;
                {
                    let face = mesh.face_mut(*f);
                    face.terrain = Some(master);
                    face.borders.insert(own);
                }
                for v in vertices {
                    let vertex = mesh.vertex_mut(v);
                    let on_side = if vertical {
                        vertex.pos.x == line
                    } else {
                        vertex.pos.y == line
                    };
                    if !on_side && !vertex.locked {
                        vertex.blends.insert(own, 1.0);
                    }
                }
                count += 1;
            }
            let face = mesh.face_mut(*f);
            let Some(base) = face.terrain else {
                continue;
            };
            for b in &segment.borders {
                if terrains.is_lower_priority(base, *b) {
                    face.borders.insert(*b);
                }
            }
        }
    }
    count
}

/// Records all four outline sides of a finished mesh.
pub fn build_border_records(mesh: &TerrainMesh, terrains: &TerrainTable) -> MeshResult<MatchFile> {
    let bounds = mesh.bounds();
    let mut file = MatchFile::default();
    for side in BorderSide::all() {
        let chain = mesh.vertices_on_line(side.is_vertical(), side.line(&bounds));
        let vertices = chain
            .iter()
            .map(|v| {
                let vertex = mesh.vertex(*v);
                BorderVertex {
                    pos: vertex.pos,
                    height: vertex.height,
                    blends: vertex
                        .blends
                        .iter()
                        .filter(|(_, alpha)| **alpha > 0.0)
                        .map(|(t, alpha)| (terrains.name(*t).to_owned(), *alpha))
                        .collect(),
                }
            })
            .collect::<Vec<_>>();
        let segments = chain
            .windows(2)
            .map(|pair| {
                let (f, _) = mesh.find_edge(pair[0], pair[1]).ok_or_else(|| {
                    MeshError::InvalidConfig(format!("broken {} side outline", side))
                })?;
                let face = mesh.face(f);
                let terrain = face.terrain.ok_or_else(|| {
                    MeshError::InvalidConfig(format!("unclassified face on {} side", side))
                })?;
                Ok(BorderSegment {
                    terrain: terrains.name(terrain).to_owned(),
                    borders: face
                        .borders
                        .iter()
                        .map(|b| terrains.name(*b).to_owned())
                        .collect(),
                })
            })
            .collect::<MeshResult<Vec<_>>>()?;
        file.sides.insert(side, BorderRecord { vertices, segments });
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        border::{MatchSegment, MatchVertex},
        coord::Bounds,
        dem::{Dem, UsedMask},
        mesh::settings::MeshSettings,
        terrain::TerrainDef,
    };
    use std::collections::BTreeSet;

    fn setup() -> (Dem, TerrainMesh) {
        let dem = Dem::filled(11, 11, Bounds::new(0.0, 0.0, 0.01, 0.01), true, 10.0);
        let bounds = dem.bounds();
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, 10.0))
            .collect::<Vec<_>>();
        let mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
        (dem, mesh)
    }

    fn vertex(y: Scalar, height: Scalar) -> MatchVertex {
        MatchVertex {
            pos: Coord::new(0.0, y),
            height,
            blends: BTreeMap::new(),
            vertex: None,
        }
    }

    fn segment() -> MatchSegment {
        MatchSegment {
            terrain: TerrainId(0),
            borders: BTreeSet::new(),
            faces: vec![],
        }
    }

    #[test]
    fn test_match_inserts_and_pins() {
        let (dem, mut mesh) = setup();
        mesh.insert_point(Coord::new(0.0, 0.005), 10.0, None)
            .unwrap();
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut border = MatchBorder {
            vertices: vec![
                vertex(0.0, 1.0),
                vertex(0.0050004, 2.0),
                vertex(0.008, 3.0),
                vertex(0.01, 4.0),
            ],
            segments: vec![segment(), segment(), segment()],
        };
        let stats = match_border(&mut ctx, &mut mesh, BorderSide::West, &mut border).unwrap();
        assert_eq!(stats.matched, 3);
        assert_eq!(stats.inserted, 1);
        let chain = mesh.vertices_on_line(true, 0.0);
        assert_eq!(chain.len(), 4);
        let heights = chain
            .iter()
            .map(|v| mesh.vertex(*v).height)
            .collect::<Vec<_>>();
        assert_eq!(heights, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(chain.iter().all(|v| mesh.vertex(*v).locked));
        // side vertex got snapped onto the neighbor position
        assert_eq!(mesh.vertex(chain[1]).pos.y, 0.0050004);
        assert!((0..11).all(|y| ctx.used.get(0, y)));
        assert!(mesh.check_topology().is_ok());

        border_find_edge_tris(&mesh, BorderSide::West, &mut border);
        assert!(border.segments.iter().all(|s| s.faces.len() == 1));
    }

    #[test]
    fn test_unmatched_slave_gets_interpolated() {
        let (dem, mut mesh) = setup();
        mesh.insert_point(Coord::new(0.0, 0.005), 10.0, None)
            .unwrap();
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut border = MatchBorder {
            vertices: vec![vertex(0.0, 0.0), vertex(0.01, 100.0)],
            segments: vec![segment()],
        };
        let stats = match_border(&mut ctx, &mut mesh, BorderSide::West, &mut border).unwrap();
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.interpolated, 1);
        let middle = mesh
            .vertices()
            .iter()
            .find(|v| v.pos == Coord::new(0.0, 0.005))
            .unwrap();
        assert!((middle.height - 50.0).abs() < 1.0e-9);
        border_find_edge_tris(&mesh, BorderSide::West, &mut border);
        assert_eq!(border.segments[0].faces.len(), 2);
    }

    #[test]
    fn test_rebase_lower_priority_neighbor() {
        let (dem, mut mesh) = setup();
        let terrains = TerrainTable::new(vec![
            TerrainDef::new("grass", 1, 100.0),
            TerrainDef::new("rock", 5, 100.0),
        ])
        .unwrap();
        let grass = terrains.find("grass").unwrap();
        let rock = terrains.find("rock").unwrap();
        for f in mesh.face_ids().collect::<Vec<_>>() {
            mesh.face_mut(f).terrain = Some(rock);
        }
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut border = MatchBorder {
            vertices: vec![vertex(0.0, 10.0), vertex(0.01, 10.0)],
            segments: vec![MatchSegment {
                terrain: grass,
                borders: BTreeSet::new(),
                faces: vec![],
            }],
        };
        match_border(&mut ctx, &mut mesh, BorderSide::West, &mut border).unwrap();
        border_find_edge_tris(&mesh, BorderSide::West, &mut border);
        assert_eq!(rebase_border_faces(&mut mesh, &terrains, BorderSide::West, &border), 1);
        let f = border.segments[0].faces[0];
        let face = mesh.face(f);
        assert_eq!(face.terrain, Some(grass));
        assert!(face.borders.contains(&rock));
        let alphas = face
            .vertices
            .iter()
            .map(|v| mesh.vertex(*v).blend(rock))
            .collect::<Vec<_>>();
        assert_eq!(alphas.iter().filter(|a| **a == 1.0).count(), 1);
        assert_eq!(alphas.iter().filter(|a| **a == 0.0).count(), 2);
    }

    #[test]
    fn test_records_of_all_sides() {
        let (_, mut mesh) = setup();
        let terrains = TerrainTable::new(vec![TerrainDef::new("grass", 1, 100.0)]).unwrap();
        for f in mesh.face_ids().collect::<Vec<_>>() {
            mesh.face_mut(f).terrain = Some(TerrainId(0));
        }
        mesh.insert_point(Coord::new(0.01, 0.003), 4.0, None).unwrap();
        for f in mesh.face_ids().collect::<Vec<_>>() {
            mesh.face_mut(f).terrain = Some(TerrainId(0));
        }
        let file = build_border_records(&mesh, &terrains).unwrap();
        assert_eq!(file.sides.len(), 4);
        let east = &file.sides[&BorderSide::East];
        assert_eq!(east.vertices.len(), 3);
        assert_eq!(east.segments.len(), 2);
        assert_eq!(east.vertices[1].height, 4.0);
        assert!(east.segments.iter().all(|s| s.terrain == "grass"));
    }
}
