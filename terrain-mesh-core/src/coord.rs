use crate::Scalar;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Length of one degree of latitude in meters.
pub const DEG_TO_MTR_LAT: Scalar = 1852.0 * 60.0;

/// Geographic position (longitude, latitude in degrees) or an offset between two of them.
///
/// # Examples
/// ```
/// use terrain_mesh_core::prelude::*;
///
/// let sw = Coord::new(8.0, 47.0);
/// let ne = Coord::new(9.0, 48.0);
/// assert_eq!(sw.midpoint(ne), Coord::new(8.5, 47.5));
/// assert_eq!((ne - sw).cross(Coord::new(1.0, 0.0)), -1.0);
/// assert!((ne - sw).to_meters(47.5).x < DEG_TO_MTR_LAT);
/// ```
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    /// Longitude.
    pub x: Scalar,
    /// Latitude.
    pub y: Scalar,
}

impl Coord {
    #[inline]
    pub fn new(x: Scalar, y: Scalar) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn sqr_magnitude(self) -> Scalar {
        self.x * self.x + self.y * self.y
    }

    #[inline]
    pub fn magnitude(self) -> Scalar {
        self.sqr_magnitude().sqrt()
    }

    #[inline]
    pub fn dot(self, other: Self) -> Scalar {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the cross product, positive when `other` turns counter-clockwise.
    #[inline]
    pub fn cross(self, other: Self) -> Scalar {
        self.x * other.y - self.y * other.x
    }

    /// Offset rotated a quarter turn clockwise.
    #[inline]
    pub fn right(self) -> Self {
        Self::new(self.y, -self.x)
    }

    #[inline]
    pub fn midpoint(self, other: Self) -> Self {
        (self + other) * 0.5
    }

    #[inline]
    pub fn lerp(self, other: Self, t: Scalar) -> Self {
        self + (other - self) * t
    }

    /// Converts a degree-space offset at latitude `lat` into meters.
    #[inline]
    pub fn to_meters(self, lat: Scalar) -> Self {
        Self::new(
            self.x * DEG_TO_MTR_LAT * lat.to_radians().cos(),
            self.y * DEG_TO_MTR_LAT,
        )
    }

    /// Local planar distance in meters, accurate within a single tile.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let a = Coord::new(10.0, 0.0);
    /// let b = Coord::new(10.0, 1.0);
    /// assert!((a.distance_m(b) - DEG_TO_MTR_LAT).abs() < 1.0e-6);
    /// ```
    #[inline]
    pub fn distance_m(self, other: Self) -> Scalar {
        let lat = (self.y + other.y) * 0.5;
        (other - self).to_meters(lat).magnitude()
    }
}

macro_rules! impl_coord_op {
    ($trait:ident, $method:ident, $op:tt, Coord) => {
        impl $trait for Coord {
            type Output = Self;

            fn $method(self, other: Self) -> Self {
                Self::new(self.x $op other.x, self.y $op other.y)
            }
        }
    };
    ($trait:ident, $method:ident, $op:tt, Scalar) => {
        impl $trait<Scalar> for Coord {
            type Output = Self;

            fn $method(self, other: Scalar) -> Self {
                Self::new(self.x $op other, self.y $op other)
            }
        }
    };
}

impl_coord_op!(Add, add, +, Coord);
impl_coord_op!(Sub, sub, -, Coord);
impl_coord_op!(Mul, mul, *, Scalar);
impl_coord_op!(Div, div, /, Scalar);

impl Neg for Coord {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis aligned geographic rectangle.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: Scalar,
    pub south: Scalar,
    pub east: Scalar,
    pub north: Scalar,
}

impl Bounds {
    pub fn new(west: Scalar, south: Scalar, east: Scalar, north: Scalar) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// One degree tile with given south-west corner.
    pub fn tile(lon: i32, lat: i32) -> Self {
        Self::new(
            lon as Scalar,
            lat as Scalar,
            lon as Scalar + 1.0,
            lat as Scalar + 1.0,
        )
    }

    pub fn width(&self) -> Scalar {
        self.east - self.west
    }

    pub fn height(&self) -> Scalar {
        self.north - self.south
    }

    pub fn contains(&self, p: Coord) -> bool {
        p.x >= self.west && p.x <= self.east && p.y >= self.south && p.y <= self.north
    }

    /// Corners in counter-clockwise order starting at south-west.
    pub fn corners(&self) -> [Coord; 4] {
        [
            Coord::new(self.west, self.south),
            Coord::new(self.east, self.south),
            Coord::new(self.east, self.north),
            Coord::new(self.west, self.north),
        ]
    }

    /// Tells if point lies exactly on the rectangle outline.
    pub fn on_boundary(&self, p: Coord) -> bool {
        self.contains(p)
            && (p.x == self.west || p.x == self.east || p.y == self.south || p.y == self.north)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vector_ops() {
        let a = Coord::new(1.0, 2.0);
        let b = Coord::new(4.0, 6.0);
        assert_eq!((b - a).magnitude(), 5.0);
        assert_eq!(a.dot(b), 16.0);
        assert_eq!(Coord::new(1.0, 0.0).cross(Coord::new(0.0, 1.0)), 1.0);
        assert_eq!(Coord::new(0.0, 1.0).right(), Coord::new(1.0, 0.0));
        assert_eq!(-a, Coord::new(-1.0, -2.0));
        assert_eq!(b / 2.0, Coord::new(2.0, 3.0));
        assert_eq!(a.midpoint(b), Coord::new(2.5, 4.0));
        assert_eq!(a.lerp(b, 0.25), Coord::new(1.75, 3.0));
    }

    #[test]
    fn test_meters_shrink_towards_poles() {
        let offset = Coord::new(1.0, 1.0);
        let equator = offset.to_meters(0.0);
        assert_relative_eq!(equator.x, DEG_TO_MTR_LAT);
        assert_relative_eq!(equator.y, DEG_TO_MTR_LAT);
        let north = offset.to_meters(60.0);
        assert_relative_eq!(north.x, DEG_TO_MTR_LAT * 0.5, epsilon = 1.0e-6);
        assert_relative_eq!(north.y, DEG_TO_MTR_LAT);

        let a = Coord::new(8.0, 60.0);
        let b = Coord::new(9.0, 60.0);
        assert_relative_eq!(a.distance_m(b), DEG_TO_MTR_LAT * 0.5, epsilon = 1.0e-6);
        assert_eq!(a.distance_m(b), b.distance_m(a));
    }

    #[test]
    fn test_bounds() {
        let tile = Bounds::tile(-3, 45);
        assert_eq!(tile, Bounds::new(-3.0, 45.0, -2.0, 46.0));
        assert_eq!((tile.width(), tile.height()), (1.0, 1.0));
        assert_eq!(tile.corners()[0], Coord::new(-3.0, 45.0));
        assert_eq!(tile.corners()[2], Coord::new(-2.0, 46.0));
        assert!(tile.contains(Coord::new(-2.5, 45.5)));
        assert!(!tile.on_boundary(Coord::new(-2.5, 45.5)));
        assert!(tile.on_boundary(Coord::new(-3.0, 45.5)));
        assert!(tile.on_boundary(Coord::new(-2.5, 46.0)));
        assert!(!tile.on_boundary(Coord::new(-3.5, 45.0)));
    }
}
