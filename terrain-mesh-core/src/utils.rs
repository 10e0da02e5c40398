use crate::{
    coord::{Bounds, Coord},
    error::{MeshError, MeshResult},
    mesh::predicates::orient2d,
    Scalar,
};
use triangulation::{Delaunay, Point};

/// Delaunay triangulation of seed points as counter-clockwise index triplets.
///
/// Points are normalized into the unit square of `bounds` before single precision
/// triangulation. Sliver triangles with no area are dropped.
pub(crate) fn triangulate(points: &[Coord], bounds: Bounds) -> MeshResult<Vec<[usize; 3]>> {
    if points.len() < 3 {
        return Err(MeshError::FailedTriangulation);
    }
    let width = bounds.width().max(Scalar::EPSILON);
    let height = bounds.height().max(Scalar::EPSILON);
    let normalized = points
        .iter()
        .map(|p| {
            Point::new(
                ((p.x - bounds.west) / width) as f32,
                ((p.y - bounds.south) / height) as f32,
            )
        })
        .collect::<Vec<_>>();
    let triangles = match Delaunay::new(&normalized) {
        Some(del) => del
            .dcel
            .vertices
            .chunks(3)
            .filter(|t| t.len() == 3)
            .map(|t| [t[0], t[1], t[2]])
            .collect::<Vec<_>>(),
        None => {
            log::debug!("Seed triangulation failed, falling back to fan triangulation");
            fan(points)
        }
    };
    let triangles = triangles
        .into_iter()
        .filter_map(|[a, b, c]| {
            let area = orient2d(points[a], points[b], points[c]);
            if area > 0.0 {
                Some([a, b, c])
            } else if area < 0.0 {
                Some([a, c, b])
            } else {
                None
            }
        })
        .collect::<Vec<_>>();
    if triangles.is_empty() {
        Err(MeshError::FailedTriangulation)
    } else {
        Ok(triangles)
    }
}

/// Fan triangulation of a convex polygon given in counter-clockwise order.
fn fan(points: &[Coord]) -> Vec<[usize; 3]> {
    (1..points.len().saturating_sub(1))
        .map(|i| [0, i, i + 1])
        .collect()
}

/// Linear interpolation between two scalars.
#[inline]
pub(crate) fn lerp(a: Scalar, b: Scalar, t: Scalar) -> Scalar {
    a * (1.0 - t) + b * t
}
