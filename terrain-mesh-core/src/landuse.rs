//! Per-face terrain classification.

use crate::{
    constraint::ConstraintMap,
    coord::Coord,
    dem::{Dem, DemPlane, DemSet},
    error::{MeshError, MeshResult},
    mesh::{FaceId, TerrainMesh},
    terrain::{TerrainFeatures, TerrainId, TerrainSelector, TerrainTable},
    Scalar,
};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::{BTreeMap, VecDeque};

/// Urban square plane values above this mark a square.
const URBAN_SQUARE_THRESHOLD: Scalar = 0.5;

/// Records the constraint-map region under every face centroid.
///
/// Faces with a forced terrain take it over, water faces get the first water terrain.
/// Returns number of faces lying inside any mapped region.
pub fn tag_faces(mesh: &mut TerrainMesh, map: &dyn ConstraintMap, terrains: &TerrainTable) -> usize {
    let water = terrains.water_terrain();
    let mut count = 0;
    for f in mesh.face_ids().collect::<Vec<_>>() {
        let region = map.region_at(mesh.face_centroid(f));
        let face = mesh.face_mut(f);
        face.region = region.unwrap_or_default();
        face.terrain = match (face.region.terrain, face.region.water) {
            (Some(terrain), _) => Some(terrain),
            (None, true) => water,
            (None, false) => None,
        };
        if region.is_some() {
            count += 1;
        }
    }
    count
}

fn majority(values: &[i32]) -> Option<i32> {
    let mut best: Option<(i32, usize)> = None;
    for v in values {
        let n = values.iter().filter(|o| *o == v).count();
        // first sample wins ties, which is the centroid
        if best.map(|(_, m)| n > m).unwrap_or(true) {
            best = Some((*v, n));
        }
    }
    best.map(|(v, _)| v)
}

fn samples(dem: Option<&Dem>, points: &[Coord]) -> Vec<Scalar> {
    match dem {
        Some(dem) => points
            .iter()
            .filter_map(|p| dem.value_linear(*p).or_else(|| dem.value_nearest(*p)))
            .collect(),
        None => vec![],
    }
}

fn category(dems: &DemSet, plane: DemPlane, points: &[Coord]) -> Option<i32> {
    let values = match dems.get(plane) {
        Some(dem) => points
            .iter()
            .filter_map(|p| dem.value_nearest(*p))
            .map(|v| v.round() as i32)
            .collect::<Vec<_>>(),
        None => return None,
    };
    majority(&values)
}

fn mean(dems: &DemSet, plane: DemPlane, points: &[Coord]) -> Option<Scalar> {
    let values = samples(dems.get(plane), points);
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<Scalar>() / values.len() as Scalar)
    }
}

fn maximum(dems: &DemSet, plane: DemPlane, points: &[Coord]) -> Option<Scalar> {
    samples(dems.get(plane), points)
        .into_iter()
        .fold(None, |acc, v| Some(acc.map(|a: Scalar| a.max(v)).unwrap_or(v)))
}

/// Derives the feature vector of a face.
///
/// Rasters are sampled at the centroid and the three corners. Categorical planes take the
/// majority, continuous planes the mean and urban density the maximum. Slope and heading
/// come from the face plane.
pub fn compute_features(mesh: &TerrainMesh, dems: &DemSet, f: FaceId) -> TerrainFeatures {
    let [a, b, c] = mesh.face_coords(f);
    let centroid = mesh.face_centroid(f);
    let points = [centroid, a, b, c];
    let normal = mesh.face_normal(f);
    let slope = normal[2].clamp(-1.0, 1.0).acos().to_degrees();
    let heading = if normal[0] == 0.0 && normal[1] == 0.0 {
        0.0
    } else {
        let h = normal[0].atan2(normal[1]).to_degrees();
        if h < 0.0 {
            h + 360.0
        } else {
            h
        }
    };
    let heights = mesh.face_heights(f);
    TerrainFeatures {
        land_use: category(dems, DemPlane::LandUse, &points),
        climate: category(dems, DemPlane::Climate, &points),
        agri_style: category(dems, DemPlane::AgriStyle, &points),
        slope,
        heading,
        elevation: heights.iter().sum::<Scalar>() / 3.0,
        temperature: mean(dems, DemPlane::Temperature, &points),
        temperature_range: mean(dems, DemPlane::TemperatureRange, &points),
        rainfall: mean(dems, DemPlane::Rainfall, &points),
        relative_elevation: mean(dems, DemPlane::RelativeElevation, &points),
        relative_elevation_range: mean(dems, DemPlane::RelativeElevationRange, &points),
        urban_density: maximum(dems, DemPlane::UrbanDensity, &points),
        urban_radial: mean(dems, DemPlane::UrbanRadial, &points),
        urban_transport: mean(dems, DemPlane::UrbanTransport, &points),
        urban_square: maximum(dems, DemPlane::UrbanSquare, &points)
            .map(|v| v > URBAN_SQUARE_THRESHOLD)
            .unwrap_or(false),
        latitude: centroid.y,
    }
}

/// Assigns a terrain to every face without a forced one.
///
/// A feature vector no rule matches is fatal. Returns number of classified faces.
pub fn classify_faces(
    mesh: &mut TerrainMesh,
    dems: &DemSet,
    selector: &dyn TerrainSelector,
) -> MeshResult<usize> {
    let faces = mesh
        .face_ids()
        .filter(|f| mesh.face(*f).terrain.is_none())
        .collect::<Vec<_>>();
    let features = {
        let view = &*mesh;
        into_iter!(faces)
            .map(|f| (f, compute_features(view, dems, f)))
            .collect::<Vec<_>>()
    };
    let count = features.len();
    for (f, features) in features {
        let terrain = selector
            .select(&features)
            .ok_or_else(|| MeshError::NoTerrainRule(features.to_string()))?;
        mesh.face_mut(f).terrain = Some(terrain);
    }
    log::debug!("Classified {} faces", count);
    Ok(count)
}

/// Unifies the terrain of connected airport faces.
///
/// Each cluster takes the terrain covering most of its area, preferring airport terrains.
/// Returns number of changed faces.
pub fn harmonize_airports(mesh: &mut TerrainMesh, terrains: &TerrainTable) -> usize {
    let mut visited = vec![false; mesh.face_count()];
    let mut changed = 0;
    for start in mesh.face_ids().collect::<Vec<_>>() {
        if visited[start.0] || !mesh.face(start).region.airport {
            continue;
        }
        visited[start.0] = true;
        let mut cluster = vec![];
        let mut open = VecDeque::from([start]);
        while let Some(f) = open.pop_front() {
            cluster.push(f);
            for i in 0..3 {
                if let Some(g) = mesh.face(f).neighbor(i) {
                    if !visited[g.0] && mesh.face(g).region.airport {
                        visited[g.0] = true;
                        open.push_back(g);
                    }
                }
            }
        }
        let mut areas: BTreeMap<TerrainId, Scalar> = BTreeMap::new();
        for f in &cluster {
            if let Some(t) = mesh.face(*f).terrain {
                *areas.entry(t).or_default() += mesh.face_area_m(*f);
            }
        }
        let has_airport = areas.keys().any(|t| terrains.is_airport(*t));
        let dominant = areas
            .iter()
            .filter(|(t, _)| !has_airport || terrains.is_airport(**t))
            .fold(None, |best: Option<(TerrainId, Scalar)>, (t, area)| match best {
                Some((_, a)) if a >= *area => best,
                _ => Some((*t, *area)),
            })
            .map(|(t, _)| t);
        let Some(dominant) = dominant else {
            continue;
        };
        for f in cluster {
            let face = mesh.face_mut(f);
            if face.terrain != Some(dominant) {
                face.terrain = Some(dominant);
                changed += 1;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::{ConstraintVertex, RegionInfo, VectorMap, VectorRegion},
        coord::Bounds,
        terrain::TerrainDef,
    };
    use approx::assert_relative_eq;

    fn terrains() -> TerrainTable {
        TerrainTable::new(vec![
            TerrainDef::new("water", 0, 0.0).water(),
            TerrainDef::new("grass", 10, 100.0),
            TerrainDef::new("concrete", 20, 50.0).airport(),
            TerrainDef::new("asphalt", 30, 50.0).airport(),
        ])
        .unwrap()
    }

    fn mesh(h: [Scalar; 4]) -> TerrainMesh {
        let bounds = Bounds::new(0.0, 0.0, 0.01, 0.01);
        let seeds = bounds
            .corners()
            .iter()
            .zip(h.iter())
            .map(|(c, h)| (*c, *h))
            .collect::<Vec<_>>();
        TerrainMesh::from_seed(bounds, &seeds).unwrap()
    }

    #[test]
    fn test_majority() {
        assert_eq!(majority(&[3, 1, 1, 2]), Some(1));
        assert_eq!(majority(&[3, 1, 2, 4]), Some(3));
        assert_eq!(majority(&[]), None);
    }

    #[test]
    fn test_tagging_forces_water() {
        let t = terrains();
        let mut mesh = mesh([0.0; 4]);
        let lake = VectorRegion {
            info: RegionInfo {
                water: true,
                ..Default::default()
            },
            hard: false,
            ring: [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
                .iter()
                .map(|(x, y)| ConstraintVertex {
                    pos: Coord::new(*x, *y),
                    elevation: None,
                })
                .collect(),
        };
        let map = VectorMap::new(mesh.bounds(), vec![lake]);
        assert_eq!(tag_faces(&mut mesh, &map, &t), 2);
        assert!(mesh
            .faces()
            .iter()
            .all(|f| f.region.water && f.terrain == t.find("water")));
    }

    #[test]
    fn test_features_of_slope() {
        let mut mesh = mesh([0.0; 4]);
        // heights rise to the north by one meter per meter
        let span = 0.01 * crate::coord::DEG_TO_MTR_LAT;
        for v in mesh.vertex_ids().collect::<Vec<_>>() {
            let y = mesh.vertex(v).pos.y;
            mesh.vertex_mut(v).height = y / 0.01 * span;
        }
        let dems = DemSet::new().with(
            DemPlane::LandUse,
            Dem::filled(3, 3, mesh.bounds(), true, 7.0),
        );
        let features = compute_features(&mesh, &dems, FaceId(0));
        assert_relative_eq!(features.slope, 45.0, epsilon = 1.0e-6);
        // downhill is south
        assert_relative_eq!(features.heading, 180.0, epsilon = 1.0e-6);
        assert_eq!(features.land_use, Some(7));
        assert_eq!(features.climate, None);
        assert_eq!(features.rainfall, None);
        assert!(!features.urban_square);
    }

    #[test]
    fn test_classification_errors_without_rule() {
        let t = terrains();
        let mut mesh = mesh([0.0; 4]);
        let grass = t.find("grass").unwrap();
        let selector = move |f: &TerrainFeatures| (f.slope < 10.0).then_some(grass);
        assert_eq!(classify_faces(&mut mesh, &DemSet::new(), &selector).unwrap(), 2);
        assert!(mesh.faces().iter().all(|f| f.terrain == Some(grass)));

        let mut steep = self::mesh([0.0, 0.0, 5000.0, 5000.0]);
        let err = classify_faces(&mut steep, &DemSet::new(), &selector).unwrap_err();
        assert!(matches!(err, MeshError::NoTerrainRule(msg) if msg.contains("slope=")));
    }

    #[test]
    fn test_airport_harmonized_to_dominant_airport_terrain() {
        let t = terrains();
        let mut mesh = mesh([0.0; 4]);
        mesh.insert_point(Coord::new(0.002, 0.002), 0.0, None)
            .unwrap();
        let faces = mesh.face_ids().collect::<Vec<_>>();
        let largest = faces
            .iter()
            .copied()
            .max_by(|a, b| mesh.face_area_m(*a).total_cmp(&mesh.face_area_m(*b)))
            .unwrap();
        for f in &faces {
            let face = mesh.face_mut(*f);
            face.region.airport = true;
            face.terrain = if *f == largest {
                t.find("concrete")
            } else {
                t.find("grass")
            };
        }
        let changed = harmonize_airports(&mut mesh, &t);
        assert_eq!(changed, faces.len() - 1);
        assert!(mesh.faces().iter().all(|f| f.terrain == t.find("concrete")));
    }
}
