//! Greedy error-driven refinement.

mod queue;

pub use queue::FaceQueue;

use crate::{
    constraint::ConstraintMap,
    coord::{Coord, DEG_TO_MTR_LAT},
    dem::{has_data, Dem, UsedMask},
    error::MeshResult,
    insertion::{insert_any_point, insert_dem_point, MeshContext},
    mesh::{predicates, FaceId, Plane, TerrainMesh},
    Scalar,
};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Grid tolerance when clipping scanlines against triangle edges.
const SCANLINE_EPSILON: Scalar = 1.0e-7;

/// Vertex insertions between progress reports.
const PROGRESS_INTERVAL: usize = 256;

/// Stop criteria of a greedy pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineLimits {
    /// Faces with larger error get refined.
    pub err_lim: Scalar,
    /// Faces with larger extent in meters get refined.
    pub size_lim: Option<Scalar>,
}

impl RefineLimits {
    pub fn error(err_lim: Scalar) -> Self {
        Self {
            err_lim,
            size_lim: None,
        }
    }

    pub fn size(size_lim: Scalar) -> Self {
        Self {
            err_lim: Scalar::INFINITY,
            size_lim: Some(size_lim),
        }
    }
}

/// Worst residual of a face.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TriError {
    pub err: Scalar,
    pub at: Option<(usize, usize)>,
    pub plane: Option<Plane>,
}

/// Tells if point lies inside face or on its edge, but not on one of its corners.
pub fn really_ok_point(mesh: &TerrainMesh, f: FaceId, p: Coord) -> bool {
    let coords = mesh.face_coords(f);
    if coords.iter().any(|c| predicates::coincident(*c, p)) {
        return false;
    }
    (0..3).all(|i| predicates::orient_sign(coords[(i + 1) % 3], coords[(i + 2) % 3], p) >= 0)
}

/// Scans every free DEM sample covered by the face and finds the one farthest from the
/// face plane. Used and no-data samples are skipped. Degenerate faces report zero error.
pub fn calc_one_tri_error(dem: &Dem, used: &UsedMask, mesh: &TerrainMesh, f: FaceId) -> TriError {
    let Some(plane) = mesh.face_plane(f) else {
        return TriError::default();
    };
    let grid = mesh
        .face_coords(f)
        .map(|c| Coord::new(dem.lon_to_x(c.x), dem.lat_to_y(c.y)));
    let min_y = grid.iter().map(|c| c.y).fold(Scalar::INFINITY, Scalar::min);
    let max_y = grid.iter().map(|c| c.y).fold(Scalar::NEG_INFINITY, Scalar::max);
    let last_row = dem.height() as Scalar - 1.0;
    let last_col = dem.width() as Scalar - 1.0;
    let from_y = (min_y - SCANLINE_EPSILON).ceil().max(0.0);
    let to_y = (max_y + SCANLINE_EPSILON).floor().min(last_row);
    let mut result = TriError {
        err: 0.0,
        at: None,
        plane: Some(plane),
    };
    if from_y > to_y {
        return result;
    }
    for y in from_y as usize..=to_y as usize {
        let row = y as Scalar;
        let mut min_x = Scalar::INFINITY;
        let mut max_x = Scalar::NEG_INFINITY;
        for i in 0..3 {
            let a = grid[i];
            let b = grid[(i + 1) % 3];
            let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
            if row < lo.y - SCANLINE_EPSILON || row > hi.y + SCANLINE_EPSILON {
                continue;
            }
            if hi.y - lo.y <= SCANLINE_EPSILON {
                min_x = min_x.min(lo.x.min(hi.x));
                max_x = max_x.max(lo.x.max(hi.x));
            } else {
                let t = ((row - lo.y) / (hi.y - lo.y)).clamp(0.0, 1.0);
                let x = lo.x + (hi.x - lo.x) * t;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
            }
        }
        if min_x > max_x {
            continue;
        }
        let from_x = (min_x - SCANLINE_EPSILON).ceil().max(0.0);
        let to_x = (max_x + SCANLINE_EPSILON).floor().min(last_col);
        if from_x > to_x {
            continue;
        }
        for x in from_x as usize..=to_x as usize {
            if used.get(x, y) {
                continue;
            }
            let value = dem.get(x, y);
            if !has_data(value) {
                continue;
            }
            let p = dem.xy_to_coord(x as Scalar, y as Scalar);
            if !really_ok_point(mesh, f, p) {
                continue;
            }
            let err = (plane.height_at(p) - value as Scalar).abs();
            if err > result.err {
                result.err = err;
                result.at = Some((x, y));
            }
        }
    }
    result
}

/// Tells if the face bounding box is larger than the size limit.
pub fn is_too_big(mesh: &TerrainMesh, f: FaceId, size_lim: Scalar) -> bool {
    let coords = mesh.face_coords(f);
    let extent = |get: fn(&Coord) -> Scalar| {
        let min = coords.iter().map(get).fold(Scalar::INFINITY, Scalar::min);
        let max = coords.iter().map(get).fold(Scalar::NEG_INFINITY, Scalar::max);
        max - min
    };
    let limit = size_lim / DEG_TO_MTR_LAT;
    extent(|c| c.x) > limit || extent(|c| c.y) > limit
}

/// Midpoint of the edge spanning the largest extent along either axis, when that extent
/// exceeds the size limit.
///
/// Outline edges between locked vertices are matched tile seams and never split.
fn size_split_point(mesh: &TerrainMesh, f: FaceId, size_lim: Scalar) -> Option<Coord> {
    let limit = size_lim / DEG_TO_MTR_LAT;
    let face = mesh.face(f);
    let mut best: Option<(Scalar, Coord)> = None;
    for i in 0..3 {
        let (u, w) = face.edge(i);
        let (a, b) = (mesh.vertex(u), mesh.vertex(w));
        if face.neighbor(i).is_none() && a.locked && b.locked {
            continue;
        }
        let d = b.pos - a.pos;
        let extent = d.x.abs().max(d.y.abs());
        if extent <= limit {
            continue;
        }
        if best.map(|(e, _)| extent > e).unwrap_or(true) {
            best = Some((extent, a.pos.midpoint(b.pos)));
        }
    }
    best.map(|(_, p)| p)
}

fn needs_refinement(mesh: &TerrainMesh, f: FaceId, limits: RefineLimits) -> bool {
    mesh.face(f).insert_err > limits.err_lim
        || limits
            .size_lim
            .map(|size| is_too_big(mesh, f, size))
            .unwrap_or(false)
}

fn store_error(mesh: &mut TerrainMesh, f: FaceId, error: TriError) {
    let face = mesh.face_mut(f);
    face.insert_err = error.err;
    face.insert_at = error.at;
    if let Some(plane) = error.plane {
        face.plane = plane;
    }
}

/// Computes error of every face and queues the ones that need refinement.
pub fn init_mesh(ctx: &MeshContext, mesh: &mut TerrainMesh, limits: RefineLimits) -> FaceQueue {
    let faces = mesh.face_ids().collect::<Vec<_>>();
    let errors = {
        let dem = ctx.dem;
        let used = &*ctx.used;
        let view = &*mesh;
        into_iter!(faces)
            .map(|f| (f, calc_one_tri_error(dem, used, view, f)))
            .collect::<Vec<_>>()
    };
    let mut queue = FaceQueue::new();
    for (f, error) in errors {
        store_error(mesh, f, error);
        if needs_refinement(mesh, f, limits) {
            queue.push(f, error.err);
        }
    }
    queue
}

/// Inserts worst samples until every face meets the limits or the vertex budget is spent.
///
/// Samples inside constraint regions with authoritative elevation are marked used instead
/// of inserted. `progress` receives the vertex count and aborts the pass by returning
/// `false`. Returns number of inserted vertices, or `None` when aborted.
pub fn greedy_mesh_build(
    ctx: &mut MeshContext,
    mesh: &mut TerrainMesh,
    map: &dyn ConstraintMap,
    limits: RefineLimits,
    progress: &mut dyn FnMut(usize) -> bool,
) -> MeshResult<Option<usize>> {
    let mut queue = init_mesh(ctx, mesh, limits);
    log::debug!(
        "Greedy pass with {} faces to refine (error {}, size {:?})",
        queue.len(),
        limits.err_lim,
        limits.size_lim
    );
    let mut inserted = 0;
    let mut skipped = 0;
    while mesh.vertex_count() < ctx.settings.max_points {
        let Some((f, _)) = queue.pop() else {
            break;
        };
        let affected = match mesh.face(f).insert_at {
            Some((x, y)) if ctx.used.get(x, y) => vec![f],
            Some((x, y)) => {
                let p = ctx.dem.xy_to_coord(x as Scalar, y as Scalar);
                if map.region_at(p).map(|r| r.has_elevation).unwrap_or(false) {
                    ctx.used.set(x, y);
                    skipped += 1;
                    vec![f]
                } else {
                    let ins = insert_dem_point(ctx, mesh, x, y, Some(f))?;
                    if ins.created {
                        inserted += 1;
                        ins.affected
                    } else {
                        vec![f]
                    }
                }
            }
            None => match limits
                .size_lim
                .and_then(|size| size_split_point(mesh, f, size))
            {
                Some(p) => {
                    let ins = insert_any_point(ctx, mesh, p, None, Some(f))?;
                    if ins.created {
                        inserted += 1;
                    }
                    ins.affected
                }
                None => vec![],
            },
        };
        for a in affected {
            queue.remove(a);
            let error = calc_one_tri_error(ctx.dem, ctx.used, mesh, a);
            store_error(mesh, a, error);
            if needs_refinement(mesh, a, limits) {
                queue.push(a, error.err);
            }
        }
        if inserted > 0 && inserted % PROGRESS_INTERVAL == 0 && !progress(mesh.vertex_count()) {
            return Ok(None);
        }
    }
    if !queue.is_empty() {
        log::warn!(
            "Vertex budget of {} reached with {} faces above limits",
            ctx.settings.max_points,
            queue.len()
        );
    }
    log::debug!(
        "Greedy pass inserted {} vertices, skipped {} samples",
        inserted,
        skipped
    );
    Ok(Some(inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::EmptyMap,
        coord::Bounds,
        mesh::settings::MeshSettings,
    };

    fn seeded(dem: &Dem, used: &mut UsedMask) -> TerrainMesh {
        let bounds = dem.bounds();
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, dem.value_or_nearest(*c).unwrap()))
            .collect::<Vec<_>>();
        for (x, y) in [
            (0, 0),
            (dem.width() - 1, 0),
            (dem.width() - 1, dem.height() - 1),
            (0, dem.height() - 1),
        ] {
            used.set(x, y);
        }
        TerrainMesh::from_seed(bounds, &seeds).unwrap()
    }

    #[test]
    fn test_error_of_planar_dem_is_zero() {
        let dem = Dem::from_fn(5, 5, Bounds::new(0.0, 0.0, 0.01, 0.01), true, |x, y, _| {
            (x * 10 + y * 3) as f32
        });
        let mut used = UsedMask::for_dem(&dem);
        let mesh = seeded(&dem, &mut used);
        for f in mesh.face_ids() {
            let error = calc_one_tri_error(&dem, &used, &mesh, f);
            assert!(error.err < 1.0e-6);
        }
    }

    #[test]
    fn test_error_finds_peak() {
        let dem = Dem::from_fn(5, 5, Bounds::new(0.0, 0.0, 0.01, 0.01), true, |x, y, _| {
            if (x, y) == (2, 1) {
                80.0
            } else {
                0.0
            }
        });
        let mut used = UsedMask::for_dem(&dem);
        let mesh = seeded(&dem, &mut used);
        let worst = mesh
            .face_ids()
            .map(|f| calc_one_tri_error(&dem, &used, &mesh, f))
            .max_by(|a, b| a.err.total_cmp(&b.err))
            .unwrap();
        assert_eq!(worst.err, 80.0);
        assert_eq!(worst.at, Some((2, 1)));
    }

    #[test]
    fn test_really_ok_point() {
        let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
        let seeds = bounds
            .corners()
            .iter()
            .map(|c| (*c, 0.0))
            .collect::<Vec<_>>();
        let mesh = TerrainMesh::from_seed(bounds, &seeds).unwrap();
        let f = FaceId(0);
        let [a, b, _] = mesh.face_coords(f);
        assert!(!really_ok_point(&mesh, f, a));
        assert!(really_ok_point(&mesh, f, a.midpoint(b)));
        assert!(really_ok_point(&mesh, f, mesh.face_centroid(f)));
        assert!(!really_ok_point(&mesh, f, Coord::new(5.0, 5.0)));
    }

    #[test]
    fn test_greedy_respects_error_bound() {
        let dem = Dem::from_fn(17, 17, Bounds::new(0.0, 0.0, 0.02, 0.02), true, |x, y, _| {
            let dx = x as f32 - 8.0;
            let dy = y as f32 - 8.0;
            200.0 - (dx * dx + dy * dy) * 2.0
        });
        let mut used = UsedMask::for_dem(&dem);
        let mut mesh = seeded(&dem, &mut used);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        let inserted = greedy_mesh_build(
            &mut ctx,
            &mut mesh,
            &EmptyMap,
            RefineLimits::error(settings.max_error),
            &mut |_| true,
        )
        .unwrap()
        .unwrap();
        assert!(inserted > 0);
        assert!(mesh.check_topology().is_ok());
        assert!(mesh.is_delaunay());
        for f in mesh.face_ids() {
            assert!(calc_one_tri_error(&dem, ctx.used, &mesh, f).err <= settings.max_error);
        }
    }

    #[test]
    fn test_greedy_respects_budget() {
        let dem = Dem::from_fn(33, 33, Bounds::new(0.0, 0.0, 0.03, 0.03), true, |x, y, _| {
            ((x * 37 + y * 91) % 50) as f32 * 10.0
        });
        let mut used = UsedMask::for_dem(&dem);
        let mut mesh = seeded(&dem, &mut used);
        let settings = MeshSettings {
            max_points: 40,
            ..Default::default()
        };
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        greedy_mesh_build(
            &mut ctx,
            &mut mesh,
            &EmptyMap,
            RefineLimits::error(settings.max_error),
            &mut |_| true,
        )
        .unwrap();
        assert_eq!(mesh.vertex_count(), 40);
    }

    #[test]
    fn test_size_pass_splits_large_faces() {
        let dem = Dem::filled(3, 3, Bounds::new(0.0, 0.0, 0.01, 0.01), true, 5.0);
        let mut used = UsedMask::for_dem(&dem);
        let mut mesh = seeded(&dem, &mut used);
        let settings = MeshSettings::default();
        let mut ctx = MeshContext::new(&dem, &mut used, &settings);
        greedy_mesh_build(
            &mut ctx,
            &mut mesh,
            &EmptyMap,
            RefineLimits::size(300.0),
            &mut |_| true,
        )
        .unwrap();
        assert!(mesh.face_ids().all(|f| !is_too_big(&mesh, f, 300.0)));
        assert!(mesh.vertices().iter().all(|v| v.height == 5.0));
    }
}
