use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use terrain_mesh_core::dem::DemPlane;
use terrain_mesh_image::settings::ImageChannel;

#[derive(Clone, Debug, Parser)]
#[command(name = "terrain-mesh", version, author, about)]
#[command(help_template = "\
{name} {version}
{about}
{author}

{usage-heading}
{tab}{usage}

{all-args}
")]
pub struct CliArgs {
    #[command(subcommand)]
    pub action: Action,

    /// Log every build step
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Clone, Debug, Args)]
pub struct ImageArgs {
    /// Use an alternate channel as height source
    #[arg(long, value_name = "CHANNEL", default_value_t)]
    pub channel: ChannelSelection,

    /// Image downsampling factor
    #[arg(long, value_name = "INTEGER", default_value_t = 1)]
    pub scale: usize,

    /// Meters per channel unit
    #[arg(long, value_name = "NUMBER", default_value_t = 1.0)]
    pub height_scale: f32,

    /// Meters added after scaling
    #[arg(long, value_name = "NUMBER", default_value_t = 0.0, allow_hyphen_values = true)]
    pub height_offset: f32,

    /// Treat fully transparent pixels as cells without data
    #[arg(long)]
    pub transparent_no_data: bool,
}

#[derive(Clone, Copy, Debug, Default, strum::Display, ValueEnum)]
#[strum(serialize_all = "kebab-case")]
pub enum ChannelSelection {
    Luma,
    #[default]
    Luma16,
    Red,
    Green,
    Blue,
    Alpha,
}

impl From<ChannelSelection> for ImageChannel {
    fn from(value: ChannelSelection) -> Self {
        use ChannelSelection as S;
        use ImageChannel as T;
        match value {
            S::Luma => T::Luma,
            S::Luma16 => T::Luma16,
            S::Red => T::Red,
            S::Green => T::Green,
            S::Blue => T::Blue,
            S::Alpha => T::Alpha,
        }
    }
}

/// Extra raster plane given as `NAME=PATH`.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaneArg {
    pub plane: DemPlane,
    pub path: PathBuf,
}

impl std::str::FromStr for PlaneArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, path) = s
            .split_once('=')
            .ok_or_else(|| format!("expected NAME=PATH, got {:?}", s))?;
        let plane = name
            .trim()
            .parse::<DemPlane>()
            .map_err(|_| format!("unknown plane: {}", name))?;
        Ok(Self {
            plane,
            path: PathBuf::from(path),
        })
    }
}

#[derive(Clone, Debug, Subcommand)]
pub enum Action {
    /// Render grayscale preview of a height map image
    #[command(help_template = "\
{name}
{about}

{usage-heading}
{tab}{usage}

{all-args}
")]
    Image {
        /// Input image path
        #[arg(short, long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        input: PathBuf,

        /// Output image path
        #[arg(short, long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        output: PathBuf,

        #[command(flatten)]
        image: ImageArgs,
    },

    /// Produce terrain mesh of a single tile
    #[command(help_template = "\
{name}
{about}

{usage-heading}
{tab}{usage}

{all-args}
")]
    Mesh {
        /// Tile configuration (YAML or JSON)
        #[arg(short, long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        config: PathBuf,

        /// Elevation raster: PNG height map or JSON DEM
        #[arg(short, long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        input: PathBuf,

        /// Output file path
        #[arg(short, long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        output: PathBuf,

        /// Tile south-west corner longitude
        #[arg(long, value_name = "INTEGER", allow_hyphen_values = true)]
        lon: i32,

        /// Tile south-west corner latitude
        #[arg(long, value_name = "INTEGER", allow_hyphen_values = true)]
        lat: i32,

        /// Additional raster plane, e.g. `land_use=landuse.png`
        #[arg(long, value_name = "NAME=PATH")]
        plane: Vec<PlaneArg>,

        /// Vector constraint map (JSON)
        #[arg(long, value_name = "PATH", value_hint(ValueHint::FilePath))]
        map: Option<PathBuf>,

        /// Directory of border match files shared between neighbor tiles
        #[arg(long, value_name = "DIR", value_hint(ValueHint::DirPath))]
        borders: Option<PathBuf>,

        #[command(flatten)]
        image: ImageArgs,

        #[command(flatten)]
        format: Format,
    },
}

#[derive(Clone, Debug, Args)]
#[group(required = true)]
pub struct Format {
    /// Produce JSON mesh
    #[arg(long)]
    pub json: bool,

    /// Produce pretty JSON mesh
    #[arg(long)]
    pub json_pretty: bool,

    /// Produce YAML mesh
    #[arg(long)]
    pub yaml: bool,

    /// Produce OBJ mesh
    #[arg(long)]
    pub obj: bool,

    /// Produce PNG mesh visualization
    #[arg(long)]
    pub png: bool,
}
