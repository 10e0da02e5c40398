//! Water surface processing: anti-bridging, flattening and slope limiting.

use crate::{
    dem::Dem,
    error::MeshResult,
    insertion::MeshContext,
    mesh::{TerrainMesh, VertexId},
    Scalar,
};
use std::collections::BTreeSet;

/// Relation of a vertex to water faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaterClass {
    /// No incident water face.
    Dry,
    /// Both water and land faces meet at the vertex.
    Coastal,
    /// Every incident face is water.
    Interior,
}

/// Classifies every vertex by the water flags of its incident faces.
pub fn classify_water_vertices(mesh: &TerrainMesh) -> Vec<WaterClass> {
    mesh.vertex_ids()
        .map(|v| {
            let faces = mesh.faces_around(v);
            let water = faces
                .iter()
                .filter(|f| mesh.face(**f).region.water)
                .count();
            if water == 0 {
                WaterClass::Dry
            } else if water == faces.len() {
                WaterClass::Interior
            } else {
                WaterClass::Coastal
            }
        })
        .collect()
}

/// Splits water edges that bridge between two shore vertices across open water.
///
/// Such edges would otherwise pull the water surface up to shore height. Only interior
/// edges between two water faces that are not constraints qualify. Returns number of
/// inserted vertices.
pub fn anti_bridge(ctx: &mut MeshContext, mesh: &mut TerrainMesh) -> MeshResult<usize> {
    let classes = classify_water_vertices(mesh);
    let mut edges = BTreeSet::new();
    for f in mesh.face_ids() {
        let face = mesh.face(f);
        if !face.region.water {
            continue;
        }
        for i in 0..3 {
            let Some(g) = face.neighbor(i) else {
                continue;
            };
            if face.edges[i].constrained || !mesh.face(g).region.water {
                continue;
            }
            let (u, w) = face.edge(i);
            if classes[u.0] == WaterClass::Coastal && classes[w.0] == WaterClass::Coastal {
                edges.insert((u.min(w), u.max(w)));
            }
        }
    }
    let mut count = 0;
    for (u, w) in edges {
        if mesh.vertex_count() >= ctx.settings.max_points {
            log::warn!("Vertex budget exhausted during anti-bridging");
            break;
        }
        let Some((f, i)) = mesh.find_edge(u, w) else {
            continue;
        };
        let p = mesh.vertex(u).pos.midpoint(mesh.vertex(w).pos);
        let height = ctx.height_at(p)?;
        let ins = mesh.split_edge(f, i, p, height);
        if ins.created {
            count += 1;
        }
    }
    log::debug!("Anti-bridging split {} water edges", count);
    Ok(count)
}

/// Sets unlocked interior water vertices to the water surface elevation.
///
/// Returns number of flattened vertices.
pub fn flatten_water(mesh: &mut TerrainMesh, surface: &Dem) -> usize {
    let classes = classify_water_vertices(mesh);
    let mut count = 0;
    for v in mesh.vertex_ids().collect::<Vec<_>>() {
        if classes[v.0] != WaterClass::Interior {
            continue;
        }
        let vertex = mesh.vertex(v);
        if vertex.locked || vertex.explicit_height {
            continue;
        }
        let pos = vertex.pos;
        if let Some(h) = surface
            .value_nearest(pos)
            .or_else(|| surface.search_nearest(pos))
        {
            mesh.vertex_mut(v).height = h;
            count += 1;
        }
    }
    count
}

/// Limits the slope between adjacent interior water vertices.
///
/// Whenever a vertex lies lower than its neighbor minus the allowed drop over their
/// distance, it is raised to that limit. Passes repeat until nothing changes or the
/// iteration limit is reached. Returns number of performed passes.
pub fn smooth_water(mesh: &mut TerrainMesh, iterations: usize, max_slope: Scalar) -> usize {
    let classes = classify_water_vertices(mesh);
    let water = mesh
        .vertex_ids()
        .filter(|v| classes[v.0] == WaterClass::Interior)
        .collect::<Vec<_>>();
    let neighbors = water
        .iter()
        .map(|v| {
            mesh.vertex_neighbors(*v)
                .into_iter()
                .filter(|n| classes[n.0] == WaterClass::Interior)
                .map(|n| (n, mesh.vertex(*v).pos.distance_m(mesh.vertex(n).pos)))
                .collect::<Vec<(VertexId, Scalar)>>()
        })
        .collect::<Vec<_>>();
    let mut passes = 0;
    while passes < iterations {
        passes += 1;
        let mut changed = false;
        for (v, adjacent) in water.iter().zip(neighbors.iter()) {
            let vertex = mesh.vertex(*v);
            if vertex.locked || vertex.explicit_height {
                continue;
            }
            let mut height = vertex.height;
            for (n, distance) in adjacent {
                let limit = mesh.vertex(*n).height - max_slope * distance;
                if height < limit {
                    height = limit;
                }
            }
            if height > mesh.vertex(*v).height {
                mesh.vertex_mut(*v).height = height;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    log::debug!("Water smoothing finished after {} passes", passes);
    passes
}
