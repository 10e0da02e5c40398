//! Point insertion primitives shared by every refinement stage.

use crate::{
    constraint::ConstraintMap,
    coord::Coord,
    dem::{has_data, Dem, UsedMask},
    error::{MeshError, MeshResult},
    mesh::{settings::MeshSettings, EdgeFlags, FaceId, Insertion, TerrainMesh, VertexId, VertexSource},
    utils::lerp,
    Scalar,
};

/// Lengths within this many meters of an edge limit count as meeting it.
const LENGTH_EPSILON: Scalar = 1.0e-6;

/// Refinement state threaded through every insertion helper.
pub struct MeshContext<'a> {
    pub dem: &'a Dem,
    pub used: &'a mut UsedMask,
    pub settings: &'a MeshSettings,
}

impl<'a> MeshContext<'a> {
    pub fn new(dem: &'a Dem, used: &'a mut UsedMask, settings: &'a MeshSettings) -> Self {
        Self {
            dem,
            used,
            settings,
        }
    }

    /// Height of an arbitrary point: bilinear where possible, nearest valid sample otherwise.
    pub fn height_at(&self, p: Coord) -> MeshResult<Scalar> {
        self.dem
            .value_or_nearest(p)
            .ok_or(MeshError::NoHeight(p.x, p.y))
    }
}

/// Inserts the DEM sample at cell `(x, y)` and marks the cell used.
pub fn insert_dem_point(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    x: usize,
    y: usize,
    hint: Option<FaceId>,
) -> MeshResult<Insertion> {
    debug_assert!(!ctx.used.get(x, y), "DEM cell ({}, {}) already used", x, y);
    let value = ctx.dem.get(x, y);
    if !has_data(value) {
        return Err(MeshError::NoData(x, y));
    }
    let p = ctx.dem.xy_to_coord(x as Scalar, y as Scalar);
    let ins = mesh.insert_point(p, value as Scalar, hint)?;
    ctx.used.set(x, y);
    if ins.created {
        mesh.vertex_mut(ins.vertex).source = VertexSource::Dem { x, y };
    }
    Ok(ins)
}

/// Inserts an arbitrary point with explicit height, or with height sampled from the DEM.
///
/// An explicit height overrides the height of a coincident unlocked vertex.
pub fn insert_any_point(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    p: Coord,
    height: Option<Scalar>,
    hint: Option<FaceId>,
) -> MeshResult<Insertion> {
    let h = match height {
        Some(h) => h,
        None => ctx.height_at(p)?,
    };
    let ins = mesh.insert_point(p, h, hint)?;
    let vertex = mesh.vertex_mut(ins.vertex);
    if let Some(h) = height {
        if ins.created || !vertex.locked {
            vertex.height = h;
            vertex.explicit_height = true;
        }
    }
    Ok(ins)
}

/// Height for a point between two mesh vertices.
///
/// Linear between authoritative endpoints, sampled from the DEM otherwise.
fn mid_height(
    ctx: &MeshContext,
    mesh: &TerrainMesh,
    a: VertexId,
    b: VertexId,
    p: Coord,
    t: Scalar,
) -> MeshResult<(Scalar, bool)> {
    let va = mesh.vertex(a);
    let vb = mesh.vertex(b);
    if va.explicit_height && vb.explicit_height {
        Ok((lerp(va.height, vb.height, t), true))
    } else {
        Ok((ctx.height_at(p)?, false))
    }
}

/// Inserts a point on segment `a`-`b`, splitting the mesh edge directly when it exists.
fn insert_on_segment(
    mesh: &mut TerrainMesh,
    a: VertexId,
    b: VertexId,
    p: Coord,
    height: Scalar,
    hint: Option<FaceId>,
) -> MeshResult<Insertion> {
    match mesh.find_edge(a, b) {
        Some((f, i)) => Ok(mesh.split_edge(f, i, p, height)),
        None => mesh.insert_point(p, height, hint),
    }
}

/// Recursively bisects segment `v1`-`v2` while it is longer than the maximal edge length, or
/// while its midpoint deviates from the linear interpolation by more than the error limit.
/// Segments shorter than the minimal edge length are never split.
///
/// Returns number of inserted vertices.
pub fn insert_mid_points(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    v1: VertexId,
    v2: VertexId,
    hint: Option<FaceId>,
) -> MeshResult<usize> {
    let min_dist = ctx.settings.min_edge_dist;
    let max_dist = ctx.settings.max_edge_dist;
    let max_error = ctx.settings.max_error;
    let mut count = 0;
    let mut stack = vec![(v1, v2)];
    while let Some((a, b)) = stack.pop() {
        if mesh.vertex_count() >= ctx.settings.max_points {
            log::warn!("Vertex budget exhausted while subdividing edges");
            break;
        }
        let pa = mesh.vertex(a).pos;
        let pb = mesh.vertex(b).pos;
        let len = pa.distance_m(pb);
        if len < min_dist - LENGTH_EPSILON {
            continue;
        }
        let mid = pa.midpoint(pb);
        let (height, explicit) = mid_height(ctx, mesh, a, b, mid, 0.5)?;
        let linear = (mesh.vertex(a).height + mesh.vertex(b).height) * 0.5;
        if len <= max_dist + LENGTH_EPSILON && (height - linear).abs() <= max_error {
            continue;
        }
        let ins = insert_on_segment(mesh, a, b, mid, height, hint)?;
        if !ins.created {
            continue;
        }
        let vertex = mesh.vertex_mut(ins.vertex);
        vertex.explicit_height = explicit;
        if mesh.is_constrained(a, ins.vertex) {
            mesh.vertex_mut(ins.vertex).source = VertexSource::Constraint;
        }
        count += 1;
        stack.push((ins.vertex, b));
        stack.push((a, ins.vertex));
    }
    Ok(count)
}

/// Burns every must-burn edge of the constraint map into the mesh.
///
/// Endpoints carrying vector elevation become authoritative vertices. Returns number of
/// burned edges.
pub fn add_constraint_points(
    ctx: &mut MeshContext,
    map: &dyn ConstraintMap,
    mesh: &mut TerrainMesh,
) -> MeshResult<usize> {
    let bounds = mesh.bounds();
    let mut count = 0;
    let mut hint = None;
    for edge in map.edges() {
        if !map.must_burn(&edge) {
            continue;
        }
        if !bounds.contains(edge.source.pos) || !bounds.contains(edge.target.pos) {
            log::warn!(
                "Skipping constraint edge {:?} - {:?} outside of the tile",
                edge.source.pos,
                edge.target.pos
            );
            continue;
        }
        let a = insert_any_point(ctx, mesh, edge.source.pos, edge.source.elevation, hint)?;
        let b = insert_any_point(ctx, mesh, edge.target.pos, edge.target.elevation, hint)?;
        for v in [a.vertex, b.vertex] {
            let vertex = mesh.vertex_mut(v);
            if vertex.source != VertexSource::Seed {
                vertex.source = VertexSource::Constraint;
            }
        }
        let affected = mesh.insert_constraint(a.vertex, b.vertex, EdgeFlags::constraint(edge.hard))?;
        hint = affected.first().copied();
        count += 1;
    }
    log::debug!("Burned {} constraint edges", count);
    Ok(count)
}

/// Subdivides every constrained edge.
///
/// With an ideal density raster (points per square kilometer), points are placed so that
/// the integrated linear density between consecutive points is one. Remaining segments are
/// then bisected by [`insert_mid_points`]. Returns number of inserted vertices.
pub fn subdivide_constraints(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    density: Option<&Dem>,
) -> MeshResult<usize> {
    let mut count = 0;
    if let Some(density) = density {
        for (a, b) in mesh.constrained_edges() {
            count += subdivide_by_density(ctx, mesh, density, a, b)?;
        }
    }
    for (a, b) in mesh.constrained_edges() {
        count += insert_mid_points(ctx, mesh, a, b, None)?;
    }
    log::debug!("Subdivided constraints with {} vertices", count);
    Ok(count)
}

fn subdivide_by_density(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    density: &Dem,
    a: VertexId,
    b: VertexId,
) -> MeshResult<usize> {
    let pa = mesh.vertex(a).pos;
    let pb = mesh.vertex(b).pos;
    let len = pa.distance_m(pb);
    let step = ctx.settings.constraint_density_step;
    let steps = (len / step).ceil().max(1.0) as usize;
    // cumulative number of points per sample position
    let mut cumulative = Vec::with_capacity(steps + 1);
    cumulative.push(0.0);
    let mut total = 0.0;
    for k in 0..steps {
        let t = (k as Scalar + 0.5) / steps as Scalar;
        let d = density
            .value_or_nearest(pa.lerp(pb, t))
            .unwrap_or(0.0)
            .max(0.0);
        total += d.sqrt() / 1000.0 * len / steps as Scalar;
        cumulative.push(total);
    }
    let segments = total.round() as usize;
    if segments < 2 {
        return Ok(0);
    }
    let mut count = 0;
    let mut current = a;
    let mut k = 0;
    for n in 1..segments {
        if mesh.vertex_count() >= ctx.settings.max_points {
            break;
        }
        let target = total * n as Scalar / segments as Scalar;
        while k + 1 < cumulative.len() && cumulative[k + 1] < target {
            k += 1;
        }
        let span = cumulative[k + 1] - cumulative[k];
        let local = if span > 0.0 {
            (target - cumulative[k]) / span
        } else {
            0.0
        };
        let t = (k as Scalar + local) / steps as Scalar;
        let p = pa.lerp(pb, t);
        let (height, explicit) = mid_height(ctx, mesh, a, b, p, t)?;
        let ins = insert_on_segment(mesh, current, b, p, height, None)?;
        if !ins.created {
            continue;
        }
        let vertex = mesh.vertex_mut(ins.vertex);
        vertex.explicit_height = explicit;
        vertex.source = VertexSource::Constraint;
        current = ins.vertex;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::{ConstraintVertex, RegionInfo, VectorMap, VectorRegion},
        coord::{Bounds, DEG_TO_MTR_LAT},
    };

    fn flat_dem(bounds: Bounds) -> Dem {
        Dem::filled(11, 11, bounds, true, 100.0)
    }

    fn seeded(dem: &Dem) -> TerrainMesh {
        let bounds = dem.bounds();
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, dem.value_or_nearest(*c).unwrap()))
            .collect::<Vec<_>>();
        TerrainMesh::from_seed(bounds, &seeds).unwrap()
    }

    #[test]
    fn test_insert_dem_point_marks_used() {
        let dem = flat_dem(Bounds::new(0.0, 0.0, 0.01, 0.01));
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        let ins = insert_dem_point(&mut ctx, &mut mesh, 3, 4, None).unwrap();
        assert!(ctx.used.get(3, 4));
        assert_eq!(mesh.vertex(ins.vertex).source, VertexSource::Dem { x: 3, y: 4 });
        assert_eq!(mesh.vertex(ins.vertex).height, 100.0);
    }

    #[test]
    fn test_insert_dem_point_without_data() {
        let mut dem = flat_dem(Bounds::new(0.0, 0.0, 0.01, 0.01));
        dem.set(5, 5, crate::dem::NO_DATA);
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        assert!(matches!(
            insert_dem_point(&mut ctx, &mut mesh, 5, 5, None),
            Err(MeshError::NoData(5, 5))
        ));
    }

    #[test]
    fn test_mid_points_on_long_flat_edge() {
        let len = 1000.0 / DEG_TO_MTR_LAT;
        let bounds = Bounds::new(0.0, 0.0, len, len);
        let dem = flat_dem(bounds);
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        // west side runs exactly 1000 m north-south
        let count = insert_mid_points(&mut ctx, &mut mesh, VertexId(0), VertexId(3), None).unwrap();
        assert_eq!(count, 1);
        assert_eq!(mesh.vertex_count(), 5);
        let mid = mesh.vertex(VertexId(4));
        assert_eq!(mid.pos.x, 0.0);
        assert!((mid.pos.y - len * 0.5).abs() < 1.0e-15);
    }

    #[test]
    fn test_mid_points_skip_short_edge() {
        let len = 40.0 / DEG_TO_MTR_LAT;
        let dem = Dem::from_fn(3, 3, Bounds::new(0.0, 0.0, len, len), true, |x, _, _| {
            x as f32 * 100.0
        });
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        let count = insert_mid_points(&mut ctx, &mut mesh, VertexId(0), VertexId(1), None).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_mid_points_by_error() {
        let len = 400.0 / DEG_TO_MTR_LAT;
        // ridge along the middle column
        let dem = Dem::from_fn(3, 3, Bounds::new(0.0, 0.0, len, len), true, |x, _, _| {
            if x == 1 {
                50.0
            } else {
                0.0
            }
        });
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        let count = insert_mid_points(&mut ctx, &mut mesh, VertexId(0), VertexId(1), None).unwrap();
        assert!(count >= 1);
        let mid = mesh
            .vertices()
            .iter()
            .find(|v| v.pos.y == 0.0 && (v.pos.x - len * 0.5).abs() < 1.0e-15)
            .unwrap();
        assert_eq!(mid.height, 50.0);
    }

    #[test]
    fn test_constraint_points_with_elevation() {
        let bounds = Bounds::new(0.0, 0.0, 0.01, 0.01);
        let dem = flat_dem(bounds);
        let mut used = UsedMask::for_dem(&dem);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let mut mesh = seeded(&dem);
        let ring = [(0.002, 0.002), (0.008, 0.002), (0.008, 0.008), (0.002, 0.008)]
            .iter()
            .map(|(x, y)| ConstraintVertex {
                pos: Coord::new(*x, *y),
                elevation: Some(42.0),
            })
            .collect();
        let map = VectorMap::new(
            bounds,
            vec![VectorRegion {
                info: RegionInfo {
                    water: true,
                    ..Default::default()
                },
                hard: true,
                ring,
            }],
        );
        let count = add_constraint_points(&mut ctx, &map, &mut mesh).unwrap();
        assert_eq!(count, 4);
        assert!(mesh.check_topology().is_ok());
        let explicit = mesh
            .vertices()
            .iter()
            .filter(|v| v.explicit_height)
            .collect::<Vec<_>>();
        assert_eq!(explicit.len(), 4);
        assert!(explicit.iter().all(|v| v.height == 42.0));
        assert_eq!(mesh.constrained_edges().len(), 4);

        let added = subdivide_constraints(&mut ctx, &mut mesh, None).unwrap();
        // every constraint is about 667 m long so each gets one midpoint
        assert_eq!(added, 4);
        assert!(mesh
            .vertices()
            .iter()
            .filter(|v| v.source == VertexSource::Constraint)
            .all(|v| v.height == 42.0));
    }
}
