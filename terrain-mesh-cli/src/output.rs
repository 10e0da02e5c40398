use anyhow::{Context, Result};
use image::{DynamicImage, GenericImage, GenericImageView, Rgba};
use obj_exporter::{Geometry, ObjSet, Object, Primitive, Shape, TVertex, Vertex};
use std::{fs::write, path::Path};
use terrain_mesh_core::prelude::*;
use terrain_mesh_image::dem_to_image;

use crate::cli::Format;

pub fn write_mesh(export: &MeshExport, elevation: &Dem, format: &Format, output: &Path) -> Result<()> {
    if format.json {
        let contents = serde_json::to_string(export).context("Could not serialize JSON mesh")?;
        write(output, contents).context("Could not save mesh file")?;
    } else if format.json_pretty {
        let contents =
            serde_json::to_string_pretty(export).context("Could not serialize pretty JSON mesh")?;
        write(output, contents).context("Could not save mesh file")?;
    } else if format.yaml {
        let contents = serde_yaml::to_string(export).context("Could not serialize YAML mesh")?;
        write(output, contents).context("Could not save mesh file")?;
    } else if format.obj {
        obj_exporter::export_to_file(&make_obj(export), output).context("Cannot save mesh file")?;
    } else if format.png {
        let mut image = DynamicImage::ImageRgba8(dem_to_image(elevation).to_rgba8());
        apply_mesh_on_map(&mut image, export);
        image.save(output).context("Cannot save output image")?;
    }
    Ok(())
}

/// Mesh in local meters around the south-west corner, texture coordinates span the tile.
fn make_obj(export: &MeshExport) -> ObjSet {
    let bounds = export.bounds;
    let origin = Coord::new(bounds.west, bounds.south);
    let mid_lat = (bounds.south + bounds.north) * 0.5;
    let object = Object {
        name: "terrain".to_owned(),
        vertices: export
            .vertices
            .iter()
            .map(|v| {
                let p = (Coord::new(v.lon, v.lat) - origin).to_meters(mid_lat);
                Vertex {
                    x: p.x,
                    y: v.height,
                    z: -p.y,
                }
            })
            .collect(),
        tex_vertices: export
            .vertices
            .iter()
            .map(|v| TVertex {
                u: (v.lon - bounds.west) / bounds.width(),
                v: (v.lat - bounds.south) / bounds.height(),
                w: 0.0,
            })
            .collect(),
        normals: export
            .vertices
            .iter()
            .map(|v| Vertex {
                x: v.normal[0],
                y: v.normal[2],
                z: -v.normal[1],
            })
            .collect(),
        geometry: vec![Geometry {
            material_name: None,
            shapes: export
                .triangles
                .iter()
                .map(|t| {
                    let [a, b, c] = t.indices;
                    Shape {
                        primitive: Primitive::Triangle(
                            (a, Some(a), Some(a)),
                            (b, Some(b), Some(b)),
                            (c, Some(c), Some(c)),
                        ),
                        groups: vec![t.terrain.clone()],
                        smoothing_groups: vec![],
                    }
                })
                .collect(),
        }],
    };
    ObjSet {
        material_library: None,
        objects: vec![object],
    }
}

fn to_pixel(image: &DynamicImage, bounds: &Bounds, p: Coord) -> (isize, isize) {
    let w = (image.width().max(1) - 1) as Scalar;
    let h = (image.height().max(1) - 1) as Scalar;
    let x = (p.x - bounds.west) / bounds.width() * w;
    let y = (bounds.north - p.y) / bounds.height() * h;
    (x.round() as isize, y.round() as isize)
}

fn put(image: &mut DynamicImage, x: isize, y: isize, color: Rgba<u8>) {
    if x >= 0 && x < image.width() as _ && y >= 0 && y < image.height() as _ {
        image.put_pixel(x as _, y as _, color);
    }
}

fn apply_mesh_on_map(image: &mut DynamicImage, export: &MeshExport) {
    let edge = Rgba([0, 255, 0, 255]);
    let water = Rgba([0, 96, 255, 255]);
    for triangle in &export.triangles {
        let [a, b, c] = triangle.indices.map(|i| export.position(i));
        let color = if triangle.water { water } else { edge };
        apply_line_on_map(image, &export.bounds, a, b, color);
        apply_line_on_map(image, &export.bounds, b, c, color);
        apply_line_on_map(image, &export.bounds, c, a, color);
    }
    for i in 0..export.vertices.len() {
        let (x, y) = to_pixel(image, &export.bounds, export.position(i));
        put(image, x, y, Rgba([255, 0, 0, 255]));
    }
}

fn apply_line_on_map(
    image: &mut DynamicImage,
    bounds: &Bounds,
    from: Coord,
    to: Coord,
    color: Rgba<u8>,
) {
    let (fx, fy) = to_pixel(image, bounds, from);
    let (tx, ty) = to_pixel(image, bounds, to);
    let dx = tx - fx;
    let dy = ty - fy;
    let steps = dx.abs().max(dy.abs());
    if steps == 0 {
        put(image, fx, fy, color);
        return;
    }
    for s in 0..=steps {
        let f = s as Scalar / steps as Scalar;
        let x = fx + (dx as Scalar * f).round() as isize;
        let y = fy + (dy as Scalar * f).round() as isize;
        put(image, x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> MeshExport {
        let vertex = |lon, lat, height| ExportVertex {
            lon,
            lat,
            height,
            normal: [0.0, 0.0, 1.0],
        };
        MeshExport {
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0),
            vertices: vec![
                vertex(0.0, 0.0, 1.0),
                vertex(1.0, 0.0, 2.0),
                vertex(1.0, 1.0, 3.0),
                vertex(0.0, 1.0, 4.0),
            ],
            triangles: vec![
                ExportTriangle {
                    indices: [0, 1, 2],
                    terrain: "grass".to_owned(),
                    ..Default::default()
                },
                ExportTriangle {
                    indices: [0, 2, 3],
                    terrain: "water".to_owned(),
                    water: true,
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn test_obj_layout() {
        let obj = make_obj(&square());
        let object = &obj.objects[0];
        assert_eq!(object.vertices.len(), 4);
        assert_eq!(object.vertices[0].y, 1.0);
        assert_eq!(object.tex_vertices[2].u, 1.0);
        assert_eq!(object.tex_vertices[2].v, 1.0);
        assert_eq!(object.geometry[0].shapes.len(), 2);
        assert_eq!(object.geometry[0].shapes[1].groups, vec!["water".to_owned()]);
    }

    #[test]
    fn test_mesh_drawn_on_map() {
        let mut image = DynamicImage::new_rgba8(11, 11);
        apply_mesh_on_map(&mut image, &square());
        // corners are vertices, the diagonal is a shared edge
        assert_eq!(image.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        assert_ne!(image.get_pixel(5, 5), Rgba([0, 0, 0, 0]));
        assert_eq!(image.get_pixel(3, 6), Rgba([0, 0, 0, 0]));
    }
}
