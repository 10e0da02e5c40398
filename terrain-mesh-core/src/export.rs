use crate::{
    coord::{Bounds, Coord},
    mesh::TerrainMesh,
    terrain::TerrainTable,
    Scalar,
};
use serde::{Deserialize, Serialize};

/// Exported vertex.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportVertex {
    pub lon: Scalar,
    pub lat: Scalar,
    pub height: Scalar,
    /// Unit normal in local meters, `[east, north, up]`.
    pub normal: [Scalar; 3],
}

/// Border layer of an exported triangle.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportLayer {
    pub terrain: String,
    /// Alpha at each triangle corner.
    pub alphas: [Scalar; 3],
}

/// Exported triangle.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTriangle {
    /// Counter-clockwise vertex indices.
    pub indices: [usize; 3],
    pub terrain: String,
    #[serde(default)]
    pub water: bool,
    /// Border layers by ascending priority.
    #[serde(default)]
    pub borders: Vec<ExportLayer>,
}

/// Finished tile in the form handed to mesh writers.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshExport {
    pub bounds: Bounds,
    pub vertices: Vec<ExportVertex>,
    pub triangles: Vec<ExportTriangle>,
}

impl MeshExport {
    pub fn from_mesh(mesh: &TerrainMesh, terrains: &TerrainTable) -> Self {
        let vertices = mesh
            .vertex_ids()
            .map(|v| {
                let vertex = mesh.vertex(v);
                ExportVertex {
                    lon: vertex.pos.x,
                    lat: vertex.pos.y,
                    height: vertex.height,
                    normal: mesh.vertex_normal(v),
                }
            })
            .collect();
        let triangles = mesh
            .face_ids()
            .map(|f| {
                let face = mesh.face(f);
                let mut layers = face.borders.iter().copied().collect::<Vec<_>>();
                layers.sort_by(|a, b| terrains.compare_priority(*a, *b));
                ExportTriangle {
                    indices: face.vertices.map(|v| v.0),
                    terrain: face
                        .terrain
                        .map(|t| terrains.name(t).to_owned())
                        .unwrap_or_default(),
                    water: face.region.water,
                    borders: layers
                        .into_iter()
                        .map(|layer| ExportLayer {
                            terrain: terrains.name(layer).to_owned(),
                            alphas: face.vertices.map(|v| mesh.vertex(v).blend(layer)),
                        })
                        .collect(),
                }
            })
            .collect();
        Self {
            bounds: mesh.bounds(),
            vertices,
            triangles,
        }
    }

    /// Lowest and highest vertex height, `None` for an empty mesh.
    pub fn height_range(&self) -> Option<(Scalar, Scalar)> {
        self.vertices.iter().fold(None, |acc, v| match acc {
            Some((lo, hi)) => Some((v.height.min(lo), v.height.max(hi))),
            None => Some((v.height, v.height)),
        })
    }

    pub fn position(&self, index: usize) -> Coord {
        let v = &self.vertices[index];
        Coord::new(v.lon, v.lat)
    }
}
