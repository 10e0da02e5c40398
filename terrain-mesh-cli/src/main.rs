mod cli;
mod output;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::{
    fs::read_to_string,
    path::{Path, PathBuf},
};
use terrain_mesh_core::prelude::*;
use terrain_mesh_image::{dem_from_image, dem_to_image, settings::ImageDemSettings};

use crate::cli::{Action, CliArgs, ImageArgs, PlaneArg};

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    run_app(args)
}

fn is_png(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
}

fn image_settings(args: &ImageArgs, bounds: Bounds) -> ImageDemSettings {
    ImageDemSettings {
        channel: args.channel.into(),
        scale: args.scale,
        height_scale: args.height_scale,
        height_offset: args.height_offset,
        bounds,
        post: true,
        transparent_no_data: args.transparent_no_data,
    }
}

/// Reads PNG rasters through the image settings, anything else as a JSON DEM.
fn load_dem(path: &Path, settings: &ImageDemSettings) -> Result<Dem> {
    if is_png(path) {
        let image = image::open(path).with_context(|| format!("Cannot open image {:?}", path))?;
        Ok(dem_from_image(image, settings)?)
    } else {
        let contents = read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
        serde_json::from_str(&contents).with_context(|| format!("Cannot parse DEM {:?}", path))
    }
}

fn load_config(path: &Path) -> Result<TileConfig> {
    let contents = read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let config = if is_json {
        serde_json::from_str(&contents)?
    } else {
        serde_yaml::from_str(&contents)?
    };
    Ok(config)
}

fn load_dems(
    input: &Path,
    planes: &[PlaneArg],
    image: &ImageArgs,
    bounds: Bounds,
) -> Result<DemSet> {
    let mut dems = DemSet::new().with(
        DemPlane::Elevation,
        load_dem(input, &image_settings(image, bounds))?,
    );
    // category and factor planes are stored verbatim in 8 bit luminosity
    let verbatim = ImageDemSettings {
        channel: terrain_mesh_image::settings::ImageChannel::Luma,
        bounds,
        ..Default::default()
    };
    for PlaneArg { plane, path } in planes {
        if *plane == DemPlane::Elevation {
            bail!("Elevation plane is given by the input argument");
        }
        dems.insert(*plane, load_dem(path, &verbatim)?);
    }
    Ok(dems)
}

#[allow(clippy::too_many_arguments)]
fn run_mesh(
    config: PathBuf,
    input: PathBuf,
    output: PathBuf,
    lon: i32,
    lat: i32,
    planes: Vec<PlaneArg>,
    map: Option<PathBuf>,
    borders: Option<PathBuf>,
    image: ImageArgs,
    format: cli::Format,
) -> Result<()> {
    let (builder, rules) = load_config(&config)?.into_builder()?;
    log::debug!("{:#?}", builder.settings());
    let dems = load_dems(&input, &planes, &image, Bounds::tile(lon, lat))?;
    let vector_map = match &map {
        Some(path) => {
            let contents =
                read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
            Some(serde_json::from_str::<VectorMap>(&contents)?)
        }
        None => None,
    };
    let constraints: &dyn ConstraintMap = match &vector_map {
        Some(map) => map,
        None => &EmptyMap,
    };
    let neighbors = match &borders {
        Some(dir) => load_neighbor_records(dir, lon, lat)?,
        None => Default::default(),
    };
    log::info!("Adopting {} neighbor borders", neighbors.len());
    let inputs = TileInputs::new(&dems, constraints, &rules).with_neighbors(neighbors);
    let tile = builder.build_tracked(inputs, |phase, subphase, label, fraction| {
        log::info!(
            "Phase {} ({} {}): {:.0}%",
            phase,
            subphase,
            label,
            (fraction * 100.0).clamp(0.0, 100.0)
        );
        true
    })?;
    log::info!(
        "Tile ({}, {}) has {} vertices and {} faces",
        lon,
        lat,
        tile.mesh.vertex_count(),
        tile.mesh.face_count()
    );
    if let Some(dir) = &borders {
        let records = tile.border_records(builder.terrains())?;
        write_match_file(&match_file_path(dir, lon, lat), &records)?;
    }
    let elevation = dems
        .get(DemPlane::Elevation)
        .context("Elevation plane is missing")?;
    output::write_mesh(&tile.export(builder.terrains()), elevation, &format, &output)
}

fn run_app(args: CliArgs) -> Result<()> {
    match args.action {
        Action::Image {
            input,
            output,
            image,
        } => {
            let settings = image_settings(&image, Bounds::new(0.0, 0.0, 1.0, 1.0));
            let dem = load_dem(&input, &settings)?;
            log::info!("Read {}x{} raster", dem.width(), dem.height());
            dem_to_image(&dem)
                .save(&output)
                .context("Cannot save output image")?;
        }
        Action::Mesh {
            config,
            input,
            output,
            lon,
            lat,
            plane,
            map,
            borders,
            image,
            format,
        } => run_mesh(
            config, input, output, lon, lat, plane, map, borders, image, format,
        )?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GenericImageView, ImageBuffer, Luma};

    const CONFIG: &str = "
settings:
  max_error: 5.0
  max_points: 200
terrains:
  - name: water
    priority: 0
    water: true
  - name: grass
    priority: 10
  - name: rock
    priority: 20
rules:
  - terrain: rock
    slope:
      min: 30.0
  - terrain: grass
";

    fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let config = dir.join("tile.yaml");
        std::fs::write(&config, CONFIG).unwrap();
        let height = dir.join("dem.png");
        let image: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_fn(33, 33, |x, y| {
            Luma([(100 + 3 * x + 2 * y + (x * y) % 7) as u16])
        });
        DynamicImage::ImageLuma16(image).save(&height).unwrap();
        (config, height)
    }

    fn mesh_args(config: &Path, input: &Path, output: &Path, lon: i32, extra: &[&str]) -> CliArgs {
        let mut args = vec![
            "terrain-mesh".to_owned(),
            "mesh".to_owned(),
            "-c".to_owned(),
            config.display().to_string(),
            "-i".to_owned(),
            input.display().to_string(),
            "-o".to_owned(),
            output.display().to_string(),
            "--lon".to_owned(),
            lon.to_string(),
            "--lat".to_owned(),
            "0".to_owned(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_all_formats() {
        let dir = tempfile::tempdir().unwrap();
        let (config, input) = write_inputs(dir.path());
        for (flag, name) in [
            ("--json", "mesh.json"),
            ("--json-pretty", "mesh.pretty.json"),
            ("--yaml", "mesh.yaml"),
            ("--obj", "mesh.obj"),
            ("--png", "mesh.png"),
        ] {
            let output = dir.path().join(name);
            run_app(mesh_args(&config, &input, &output, 0, &[flag])).unwrap();
            assert!(output.exists(), "{} was not written", name);
        }
        let json = read_to_string(dir.path().join("mesh.json")).unwrap();
        let export: MeshExport = serde_json::from_str(&json).unwrap();
        assert!(export.vertices.len() >= 4);
        assert!(export.vertices.len() <= 200);
        assert_eq!(export.bounds, Bounds::tile(0, 0));
        assert!(export.triangles.iter().all(|t| !t.terrain.is_empty()));
    }

    #[test]
    fn test_neighbor_tiles_share_border() {
        let dir = tempfile::tempdir().unwrap();
        let (config, input) = write_inputs(dir.path());
        let borders = dir.path().join("borders");
        std::fs::create_dir(&borders).unwrap();
        let borders_arg = borders.display().to_string();
        let west = dir.path().join("west.json");
        let east = dir.path().join("east.json");
        run_app(mesh_args(&config, &input, &west, 0, &["--json", "--borders", &borders_arg]))
            .unwrap();
        assert!(match_file_path(&borders, 0, 0).exists());
        run_app(mesh_args(&config, &input, &east, 1, &["--json", "--borders", &borders_arg]))
            .unwrap();

        let load = |path: &Path| -> MeshExport {
            serde_json::from_str(&read_to_string(path).unwrap()).unwrap()
        };
        let seam = |export: &MeshExport| {
            let mut line = export
                .vertices
                .iter()
                .filter(|v| v.lon == 1.0)
                .map(|v| (v.lat, v.height))
                .collect::<Vec<_>>();
            line.sort_by(|a, b| a.partial_cmp(b).unwrap());
            line
        };
        assert_eq!(seam(&load(&west)), seam(&load(&east)));
    }

    #[test]
    fn test_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (_, input) = write_inputs(dir.path());
        let output = dir.path().join("mesh.json");
        let missing = dir.path().join("missing.yaml");
        assert!(run_app(mesh_args(&missing, &input, &output, 0, &["--json"])).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_image_preview() {
        let dir = tempfile::tempdir().unwrap();
        let (_, input) = write_inputs(dir.path());
        let output = dir.path().join("preview.png");
        let args = CliArgs::try_parse_from([
            "terrain-mesh".to_owned(),
            "image".to_owned(),
            "-i".to_owned(),
            input.display().to_string(),
            "-o".to_owned(),
            output.display().to_string(),
            "--scale".to_owned(),
            "2".to_owned(),
        ])
        .unwrap();
        run_app(args).unwrap();
        let preview = image::open(&output).unwrap();
        assert_eq!((preview.width(), preview.height()), (16, 16));
    }
}
