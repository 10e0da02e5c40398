mod build_phase;

pub use build_phase::BuildPhase;

use crate::{
    blend::{optimize_borders, propagate_borders},
    border::{
        border_find_edge_tris, build_border_records, match_border, rebase_border_faces,
        BorderRecord, BorderSide, MatchBorder, MatchFile,
    },
    constraint::ConstraintMap,
    dem::{Dem, DemPlane, DemSet, UsedMask},
    error::{MeshError, MeshResult},
    export::MeshExport,
    insertion::{add_constraint_points, subdivide_constraints, MeshContext},
    landuse::{classify_faces, harmonize_airports, tag_faces},
    mesh::{settings::MeshSettings, TerrainMesh, VertexSource},
    refine::{greedy_mesh_build, RefineLimits},
    terrain::{RuleTable, TerrainDef, TerrainRule, TerrainSelector, TerrainTable},
    water::{anti_bridge, flatten_water, smooth_water},
    Scalar,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Complete configuration of a tile build.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileConfig {
    #[serde(default)]
    pub settings: MeshSettings,
    #[serde(default)]
    pub terrains: Vec<TerrainDef>,
    #[serde(default)]
    pub rules: Vec<TerrainRule>,
}

impl TileConfig {
    /// Validates the configuration and resolves it into a builder and its rule table.
    pub fn into_builder(self) -> MeshResult<(TileMeshBuilder, RuleTable)> {
        let terrains = TerrainTable::new(self.terrains)?;
        let rules = RuleTable::new(self.rules, &terrains)?;
        let builder = TileMeshBuilder::new(self.settings, terrains)?;
        Ok((builder, rules))
    }
}

/// Read-only inputs of a single tile build.
pub struct TileInputs<'a> {
    /// Raster planes; elevation is required.
    pub dems: &'a DemSet,
    pub map: &'a dyn ConstraintMap,
    pub selector: &'a dyn TerrainSelector,
    /// Neighbor border records adopted by the slave sides of this tile.
    pub neighbors: BTreeMap<BorderSide, BorderRecord>,
}

impl<'a> TileInputs<'a> {
    pub fn new(
        dems: &'a DemSet,
        map: &'a dyn ConstraintMap,
        selector: &'a dyn TerrainSelector,
    ) -> Self {
        Self {
            dems,
            map,
            selector,
            neighbors: BTreeMap::new(),
        }
    }

    pub fn with_neighbors(mut self, neighbors: BTreeMap<BorderSide, BorderRecord>) -> Self {
        self.neighbors = neighbors;
        self
    }
}

/// Finished tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMesh {
    pub mesh: TerrainMesh,
    /// DEM cells consumed by the mesh.
    pub used: UsedMask,
}

impl TileMesh {
    /// Border records of all four sides, to be written for the neighbors.
    pub fn border_records(&self, terrains: &TerrainTable) -> MeshResult<MatchFile> {
        build_border_records(&self.mesh, terrains)
    }

    pub fn export(&self, terrains: &TerrainTable) -> MeshExport {
        MeshExport::from_mesh(&self.mesh, terrains)
    }
}

/// Builds the terrain mesh of a single tile.
///
/// # Examples
/// ```
/// use terrain_mesh_core::prelude::*;
///
/// let bounds = Bounds::new(0.0, 0.0, 0.01, 0.01);
/// let dem = Dem::from_fn(2, 2, bounds, true, |x, y, _| (x + 2 * y) as f32);
/// let dems = DemSet::new().with(DemPlane::Elevation, dem);
/// let terrains = TerrainTable::new(vec![TerrainDef::new("grass", 1, 100.0)]).unwrap();
/// let grass = terrains.find("grass").unwrap();
/// let selector = move |_: &TerrainFeatures| Some(grass);
/// let settings = MeshSettings {
///     max_error: 0.0,
///     max_points: 100,
///     ..Default::default()
/// };
/// let builder = TileMeshBuilder::new(settings, terrains).unwrap();
/// let tile = builder
///     .build(TileInputs::new(&dems, &EmptyMap, &selector))
///     .unwrap();
/// assert_eq!(tile.mesh.vertex_count(), 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TileMeshBuilder {
    settings: MeshSettings,
    terrains: TerrainTable,
}

impl TileMeshBuilder {
    pub fn new(settings: MeshSettings, terrains: TerrainTable) -> MeshResult<Self> {
        settings.validate()?;
        Ok(Self { settings, terrains })
    }

    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    pub fn terrains(&self) -> &TerrainTable {
        &self.terrains
    }

    /// Builds the tile without progress reporting.
    pub fn build(&self, inputs: TileInputs) -> MeshResult<TileMesh> {
        self.build_tracked(inputs, |_, _, _, _| true)
    }

    /// Builds the tile, reporting between phases.
    ///
    /// `progress` receives `(phase, subphase, label, fraction)` and aborts the build with
    /// [`MeshError::Aborted`] by returning `false`. Reports made inside the refinement loop
    /// only take effect once the phase is over.
    pub fn build_tracked<F>(&self, inputs: TileInputs, mut progress: F) -> MeshResult<TileMesh>
    where
        F: FnMut(BuildPhase, usize, &str, Scalar) -> bool,
    {
        let settings = &self.settings;
        let dem = inputs
            .dems
            .get(DemPlane::Elevation)
            .ok_or_else(|| MeshError::MissingPlane(DemPlane::Elevation.to_string()))?;
        let mut used = UsedMask::for_dem(dem);

        let mut mesh = seed_mesh(dem, &mut used)?;
        log::info!("Seeded tile {:?}", mesh.bounds());
        check(&mut progress, BuildPhase::Triangulate, 0, "seed", 1.0)?;

        let mut borders = vec![];
        {
            let mut ctx = MeshContext::new(dem, &mut used, settings);

            add_constraint_points(&mut ctx, inputs.map, &mut mesh)?;
            check(&mut progress, BuildPhase::Constraints, 0, "burn", 0.5)?;
            subdivide_constraints(
                &mut ctx,
                &mut mesh,
                inputs.dems.get(DemPlane::IdealDensity),
            )?;
            log::info!(
                "Constraints done with {} vertices and {} faces",
                mesh.vertex_count(),
                mesh.face_count()
            );
            check(&mut progress, BuildPhase::Constraints, 1, "subdivide", 1.0)?;

            for (side, record) in &inputs.neighbors {
                if side.is_master() {
                    log::warn!("Ignoring neighbor record for master side {}", side);
                    continue;
                }
                let mut border = record.resolve(&self.terrains)?;
                let stats = match_border(&mut ctx, &mut mesh, *side, &mut border)?;
                log::debug!("Matched {} side: {:?}", side, stats);
                borders.push((*side, border));
            }
            check(&mut progress, BuildPhase::Borders, 0, "match", 1.0)?;

            let mut keep = true;
            let budget = settings.max_points as Scalar;
            greedy_mesh_build(
                &mut ctx,
                &mut mesh,
                inputs.map,
                RefineLimits::error(settings.max_error),
                &mut |count| {
                    keep &= progress(BuildPhase::Refine, 0, "error", count as Scalar / budget);
                    true
                },
            )?;
            if let Some(size) = settings.max_triangle_size {
                greedy_mesh_build(
                    &mut ctx,
                    &mut mesh,
                    inputs.map,
                    RefineLimits::size(size),
                    &mut |count| {
                        keep &= progress(BuildPhase::Refine, 1, "size", count as Scalar / budget);
                        true
                    },
                )?;
            }
            log::info!(
                "Refined to {} vertices and {} faces",
                mesh.vertex_count(),
                mesh.face_count()
            );
            if !keep {
                return Err(MeshError::Aborted(BuildPhase::Refine));
            }
            check(&mut progress, BuildPhase::Refine, 2, "done", 1.0)?;

            tag_faces(&mut mesh, inputs.map, &self.terrains);
            if settings.anti_bridging {
                anti_bridge(&mut ctx, &mut mesh)?;
            }
        }
        self.process_water(&mut mesh, inputs.dems);
        check(&mut progress, BuildPhase::Water, 0, "water", 1.0)?;

        mesh.update_planes();
        classify_faces(&mut mesh, inputs.dems, inputs.selector)?;
        let harmonized = harmonize_airports(&mut mesh, &self.terrains);
        log::debug!("Harmonized {} airport faces", harmonized);
        check(&mut progress, BuildPhase::Classify, 0, "classify", 1.0)?;

        self.blend(&mut mesh, &mut borders);
        log::info!(
            "Tile done with {} vertices and {} faces",
            mesh.vertex_count(),
            mesh.face_count()
        );
        check(&mut progress, BuildPhase::Blend, 0, "blend", 1.0)?;

        Ok(TileMesh { mesh, used })
    }

    fn process_water(&self, mesh: &mut TerrainMesh, dems: &DemSet) {
        match dems.get(DemPlane::WaterSurface) {
            Some(surface) => {
                let count = flatten_water(mesh, surface);
                log::debug!("Flattened {} water vertices", count);
            }
            None => log::debug!("No water surface plane, water keeps DEM heights"),
        }
        smooth_water(
            mesh,
            self.settings.water_smooth_iterations,
            self.settings.max_water_slope,
        );
    }

    fn blend(&self, mesh: &mut TerrainMesh, borders: &mut [(BorderSide, MatchBorder)]) {
        let mut protected = HashSet::new();
        for (side, border) in borders.iter_mut() {
            border_find_edge_tris(mesh, *side, border);
            let rebased = rebase_border_faces(mesh, &self.terrains, *side, border);
            log::debug!("Rebased {} faces on {} side", rebased, side);
            for segment in &border.segments {
                protected.extend(segment.faces.iter().copied());
            }
        }
        propagate_borders(mesh, &self.terrains);
        optimize_borders(mesh, &self.terrains, &protected);
    }
}

fn check<F>(
    progress: &mut F,
    phase: BuildPhase,
    subphase: usize,
    label: &str,
    fraction: Scalar,
) -> MeshResult<()>
where
    F: FnMut(BuildPhase, usize, &str, Scalar) -> bool,
{
    if progress(phase, subphase, label, fraction) {
        Ok(())
    } else {
        log::info!("Build aborted after {} phase", phase);
        Err(MeshError::Aborted(phase))
    }
}

/// Triangulates the tile corners and marks their DEM cells used.
fn seed_mesh(dem: &Dem, used: &mut UsedMask) -> MeshResult<TerrainMesh> {
    let bounds = dem.bounds();
    let seeds = bounds
        .corners()
        .iter()
        .map(|c| {
            dem.value_or_nearest(*c)
                .map(|h| (*c, h))
                .ok_or(MeshError::NoHeight(c.x, c.y))
        })
        .collect::<MeshResult<Vec<_>>>()?;
    for (c, _) in &seeds {
        let (x, y) = dem.xy_nearest(*c);
        used.set(x, y);
    }
    let mut mesh = TerrainMesh::from_seed(bounds, &seeds)?;
    for v in mesh.vertex_ids().collect::<Vec<_>>() {
        mesh.vertex_mut(v).source = VertexSource::Seed;
    }
    Ok(mesh)
}
