//! Geometric predicates with relative tolerance.

use crate::{coord::Coord, Scalar};

/// Relative tolerance below which an orientation counts as collinear.
pub const ORIENT_EPSILON: Scalar = 1.0e-12;

/// Positions closer than this (in degrees) count as the same point.
pub const COINCIDENT_EPSILON: Scalar = 1.0e-10;

/// Twice the signed area of triangle `a`, `b`, `c`. Positive for counter-clockwise order.
#[inline]
pub fn orient2d(a: Coord, b: Coord, c: Coord) -> Scalar {
    (b - a).cross(c - a)
}

/// Sign of orientation: `1` for left turn, `-1` for right turn, `0` for (nearly) collinear.
pub fn orient_sign(a: Coord, b: Coord, c: Coord) -> i8 {
    orient_sign_eps(a, b, c, ORIENT_EPSILON)
}

/// [`orient_sign`] with custom relative tolerance.
pub fn orient_sign_eps(a: Coord, b: Coord, c: Coord, epsilon: Scalar) -> i8 {
    let ab = b - a;
    let ac = c - a;
    let value = ab.cross(ac);
    let scale = ab.magnitude() * ac.magnitude();
    if value.abs() <= scale * epsilon {
        0
    } else if value > 0.0 {
        1
    } else {
        -1
    }
}

/// Tells if `d` lies strictly inside the circumcircle of counter-clockwise triangle `a`, `b`, `c`.
///
/// Coordinates are translated to `d` before evaluation to keep precision for geographic values.
pub fn in_circle(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    let a = a - d;
    let b = b - d;
    let c = c - d;
    let la = a.sqr_magnitude();
    let lb = b.sqr_magnitude();
    let lc = c.sqr_magnitude();
    let det = la * b.cross(c) + lb * c.cross(a) + lc * a.cross(b);
    let scale = la * (b.magnitude() * c.magnitude())
        + lb * (c.magnitude() * a.magnitude())
        + lc * (a.magnitude() * b.magnitude());
    det > scale * ORIENT_EPSILON
}

#[inline]
pub fn coincident(a: Coord, b: Coord) -> bool {
    (a - b).sqr_magnitude() <= COINCIDENT_EPSILON * COINCIDENT_EPSILON
}

/// Tells if open segments `a`-`b` and `c`-`d` cross at a single interior point.
pub fn segments_cross(a: Coord, b: Coord, c: Coord, d: Coord) -> bool {
    orient_sign(a, b, c) * orient_sign(a, b, d) < 0 && orient_sign(c, d, a) * orient_sign(c, d, b) < 0
}

/// Intersection point of lines `a`-`b` and `c`-`d`, together with the parameter along `c`-`d`.
pub fn line_intersection(a: Coord, b: Coord, c: Coord, d: Coord) -> Option<(Coord, Scalar)> {
    let r = b - a;
    let s = d - c;
    let denom = r.cross(s);
    if denom == 0.0 {
        return None;
    }
    let u = (c - a).cross(r) / denom;
    Some((c + s * u, u))
}

/// Distance from `p` to segment `a`-`b`, all in the same planar units.
pub fn point_segment_distance(p: Coord, a: Coord, b: Coord) -> Scalar {
    let ab = b - a;
    let len = ab.sqr_magnitude();
    if len <= 0.0 {
        return (p - a).magnitude();
    }
    let t = ((p - a).dot(ab) / len).clamp(0.0, 1.0);
    (p - (a + ab * t)).magnitude()
}
