use crate::{
    coord::{Bounds, Coord},
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};
use thiserror::Error;

/// Sentinel value of raster cells without data.
pub const NO_DATA: f32 = -32768.0;

/// Error thrown during DEM construction.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum DemError {
    /// Wrong data length.
    /// (provided, expected)
    #[error("Wrong data length: {0} (expected {1})")]
    WrongDataLength(usize, usize),
    /// Raster has no rows or columns.
    #[error("DEM must be at least 1x1")]
    Empty,
}

/// Tells if raster value carries data.
#[inline]
pub fn has_data(value: f32) -> bool {
    value != NO_DATA && value.is_finite()
}

/// Geo-referenced raster of scalar samples.
///
/// Row `0` is the southern edge. With `post` spacing the outermost samples sit exactly on the
/// bounds, otherwise samples are pixel centered.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dem {
    width: usize,
    height: usize,
    bounds: Bounds,
    post: bool,
    data: Vec<f32>,
}

impl Dem {
    /// Create new DEM.
    ///
    /// # Arguments
    /// * `width` - Columns.
    /// * `height` - Rows.
    /// * `bounds` - Geographic bounds.
    /// * `post` - Post (edge aligned) or area (pixel centered) sample spacing.
    /// * `data` - Row major samples, south row first.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let bounds = Bounds::new(0.0, 0.0, 1.0, 1.0);
    /// assert!(Dem::new(2, 2, bounds, true, vec![0.0; 4]).is_ok());
    /// assert_eq!(
    ///     Dem::new(1, 2, bounds, true, vec![0.0; 4]),
    ///     Err(DemError::WrongDataLength(4, 2)),
    /// );
    /// ```
    pub fn new(
        width: usize,
        height: usize,
        bounds: Bounds,
        post: bool,
        data: Vec<f32>,
    ) -> Result<Self, DemError> {
        if width == 0 || height == 0 {
            return Err(DemError::Empty);
        }
        if data.len() != width * height {
            return Err(DemError::WrongDataLength(data.len(), width * height));
        }
        Ok(Self {
            width,
            height,
            bounds,
            post,
            data,
        })
    }

    /// Create DEM filled with a single value.
    pub fn filled(width: usize, height: usize, bounds: Bounds, post: bool, value: f32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            bounds,
            post,
            data: vec![value; width.max(1) * height.max(1)],
        }
    }

    /// Create DEM by evaluating a function at every sample position.
    pub fn from_fn<F>(width: usize, height: usize, bounds: Bounds, post: bool, mut f: F) -> Self
    where
        F: FnMut(usize, usize, Coord) -> f32,
    {
        let mut result = Self::filled(width, height, bounds, post, NO_DATA);
        for y in 0..result.height {
            for x in 0..result.width {
                let p = result.xy_to_coord(x as Scalar, y as Scalar);
                result.data[y * result.width + x] = f(x, y, p);
            }
        }
        result
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_post(&self) -> bool {
        self.post
    }

    /// Returns values buffer.
    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Returns sample at given cell or `NO_DATA` if out of range.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        if x < self.width && y < self.height {
            self.data[y * self.width + x]
        } else {
            NO_DATA
        }
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        if x < self.width && y < self.height {
            self.data[y * self.width + x] = value;
        }
    }

    fn x_span(&self) -> Scalar {
        if self.post {
            (self.width.max(2) - 1) as Scalar
        } else {
            self.width as Scalar
        }
    }

    fn y_span(&self) -> Scalar {
        if self.post {
            (self.height.max(2) - 1) as Scalar
        } else {
            self.height as Scalar
        }
    }

    fn offset(&self) -> Scalar {
        if self.post {
            0.0
        } else {
            0.5
        }
    }

    /// Continuous column index to longitude.
    #[inline]
    pub fn x_to_lon(&self, x: Scalar) -> Scalar {
        let t = (x + self.offset()) / self.x_span();
        self.bounds.west * (1.0 - t) + self.bounds.east * t
    }

    /// Continuous row index to latitude.
    #[inline]
    pub fn y_to_lat(&self, y: Scalar) -> Scalar {
        let t = (y + self.offset()) / self.y_span();
        self.bounds.south * (1.0 - t) + self.bounds.north * t
    }

    /// Longitude to continuous column index.
    #[inline]
    pub fn lon_to_x(&self, lon: Scalar) -> Scalar {
        (lon - self.bounds.west) * self.x_span() / self.bounds.width() - self.offset()
    }

    /// Latitude to continuous row index.
    #[inline]
    pub fn lat_to_y(&self, lat: Scalar) -> Scalar {
        (lat - self.bounds.south) * self.y_span() / self.bounds.height() - self.offset()
    }

    #[inline]
    pub fn xy_to_coord(&self, x: Scalar, y: Scalar) -> Coord {
        Coord::new(self.x_to_lon(x), self.y_to_lat(y))
    }

    /// Nearest cell to geographic coordinate, clamped into the raster.
    pub fn xy_nearest(&self, p: Coord) -> (usize, usize) {
        let x = self.lon_to_x(p.x).round().max(0.0) as usize;
        let y = self.lat_to_y(p.y).round().max(0.0) as usize;
        (x.min(self.width - 1), y.min(self.height - 1))
    }

    /// Bilinear interpolation; `None` when any contributing sample has no data.
    ///
    /// # Examples
    /// ```
    /// use terrain_mesh_core::prelude::*;
    ///
    /// let dem = Dem::new(2, 2, Bounds::new(0.0, 0.0, 1.0, 1.0), true, vec![0.0, 10.0, 0.0, 10.0])
    ///     .unwrap();
    /// assert_eq!(dem.value_linear(Coord::new(0.5, 0.5)), Some(5.0));
    /// ```
    pub fn value_linear(&self, p: Coord) -> Option<Scalar> {
        let fx = self.lon_to_x(p.x).clamp(0.0, (self.width - 1) as Scalar);
        let fy = self.lat_to_y(p.y).clamp(0.0, (self.height - 1) as Scalar);
        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let tx = fx - x0 as Scalar;
        let ty = fy - y0 as Scalar;
        let a = self.get(x0, y0);
        let b = self.get(x1, y0);
        let c = self.get(x0, y1);
        let d = self.get(x1, y1);
        if ![a, b, c, d].iter().all(|v| has_data(*v)) {
            return None;
        }
        let bottom = a as Scalar + (b as Scalar - a as Scalar) * tx;
        let top = c as Scalar + (d as Scalar - c as Scalar) * tx;
        Some(bottom + (top - bottom) * ty)
    }

    /// Value of the nearest cell, `None` if it has no data.
    pub fn value_nearest(&self, p: Coord) -> Option<Scalar> {
        let (x, y) = self.xy_nearest(p);
        let v = self.get(x, y);
        has_data(v).then_some(v as Scalar)
    }

    /// Searches rings of growing radius around the nearest cell for the closest valid sample.
    pub fn search_nearest(&self, p: Coord) -> Option<Scalar> {
        let (cx, cy) = self.xy_nearest(p);
        let cx = cx as isize;
        let cy = cy as isize;
        let limit = self.width.max(self.height) as isize;
        for radius in 0..=limit {
            let mut best: Option<(isize, Scalar)> = None;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dx.abs() != radius && dy.abs() != radius {
                        continue;
                    }
                    let x = cx + dx;
                    let y = cy + dy;
                    if x < 0 || y < 0 {
                        continue;
                    }
                    let v = self.get(x as usize, y as usize);
                    if has_data(v) {
                        let d = dx * dx + dy * dy;
                        if best.map(|(bd, _)| d < bd).unwrap_or(true) {
                            best = Some((d, v as Scalar));
                        }
                    }
                }
            }
            if let Some((_, v)) = best {
                return Some(v);
            }
        }
        None
    }

    /// Bilinear value falling back to the nearest valid sample.
    pub fn value_or_nearest(&self, p: Coord) -> Option<Scalar> {
        self.value_linear(p).or_else(|| self.search_nearest(p))
    }
}

/// One bit per raster cell marking samples already consumed by the mesh.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsedMask {
    width: usize,
    height: usize,
    bits: Vec<u64>,
}

impl UsedMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![0; (width * height + 63) / 64],
        }
    }

    pub fn for_dem(dem: &Dem) -> Self {
        Self::new(dem.width(), dem.height())
    }

    /// Out of range cells count as used.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        if x >= self.width || y >= self.height {
            return true;
        }
        let i = y * self.width + x;
        self.bits[i / 64] & (1 << (i % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize) {
        if x < self.width && y < self.height {
            let i = y * self.width + x;
            self.bits[i / 64] |= 1 << (i % 64);
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

/// Named raster planes consumed by the engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DemPlane {
    Elevation,
    LandUse,
    Climate,
    AgriStyle,
    Temperature,
    TemperatureRange,
    Rainfall,
    RelativeElevation,
    RelativeElevationRange,
    UrbanDensity,
    UrbanRadial,
    UrbanTransport,
    UrbanSquare,
    Bathymetry,
    WaterSurface,
    IdealDensity,
}

/// Set of raster planes looked up by name.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemSet {
    planes: HashMap<DemPlane, Dem>,
}

impl DemSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, plane: DemPlane, dem: Dem) -> Self {
        self.insert(plane, dem);
        self
    }

    pub fn insert(&mut self, plane: DemPlane, dem: Dem) -> Option<Dem> {
        self.planes.insert(plane, dem)
    }

    pub fn get(&self, plane: DemPlane) -> Option<&Dem> {
        self.planes.get(&plane)
    }

    pub fn contains(&self, plane: DemPlane) -> bool {
        self.planes.contains_key(&plane)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds::new(10.0, 40.0, 11.0, 41.0)
    }

    #[test]
    fn test_post_geocoding_round_trips_corners() {
        let dem = Dem::filled(11, 11, bounds(), true, 0.0);
        assert_eq!(dem.x_to_lon(0.0), 10.0);
        assert_eq!(dem.x_to_lon(10.0), 11.0);
        assert_eq!(dem.y_to_lat(10.0), 41.0);
        assert!((dem.lon_to_x(10.5) - 5.0).abs() < 1.0e-9);
    }

    #[test]
    fn test_area_geocoding_is_pixel_centered() {
        let dem = Dem::filled(10, 10, bounds(), false, 0.0);
        assert!((dem.x_to_lon(0.0) - 10.05).abs() < 1.0e-9);
        assert!((dem.lon_to_x(10.05)).abs() < 1.0e-9);
    }

    #[test]
    fn test_linear_rejects_no_data() {
        let mut dem = Dem::filled(3, 3, bounds(), true, 100.0);
        dem.set(1, 1, NO_DATA);
        assert_eq!(dem.value_linear(Coord::new(10.25, 40.25)), None);
        assert_eq!(dem.value_or_nearest(Coord::new(10.25, 40.25)), Some(100.0));
        assert_eq!(dem.value_linear(Coord::new(10.0, 40.0)), None);
    }

    #[test]
    fn test_search_nearest_finds_closest_ring() {
        let mut dem = Dem::filled(5, 5, bounds(), true, NO_DATA);
        dem.set(4, 4, 7.0);
        dem.set(2, 3, 3.0);
        assert_eq!(dem.search_nearest(Coord::new(10.5, 40.5)), Some(3.0));
        let empty = Dem::filled(2, 2, bounds(), true, NO_DATA);
        assert_eq!(empty.search_nearest(Coord::new(10.5, 40.5)), None);
    }

    #[test]
    fn test_used_mask() {
        let mut mask = UsedMask::new(70, 2);
        assert!(!mask.get(69, 1));
        mask.set(69, 1);
        mask.set(0, 0);
        assert!(mask.get(69, 1));
        assert!(mask.get(70, 0));
        assert_eq!(mask.count(), 2);
    }

    #[test]
    fn test_plane_names() {
        assert_eq!(DemPlane::WaterSurface.to_string(), "water_surface");
        assert_eq!("land_use".parse::<DemPlane>().unwrap(), DemPlane::LandUse);
    }
}
