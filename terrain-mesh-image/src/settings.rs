use serde::{Deserialize, Serialize};
use terrain_mesh_core::coord::Bounds;

/// Image channel read as the raster value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageChannel {
    /// 8 bit luminosity.
    Luma,
    /// 16 bit luminosity, the usual encoding of height map images.
    #[default]
    Luma16,
    /// Red channel.
    Red,
    /// Green channel.
    Green,
    /// Blue channel.
    Blue,
    /// Alpha channel.
    Alpha,
}

/// Settings of reading a raster out of an image.
///
/// Raster value is `channel * height_scale + height_offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDemSettings {
    #[serde(default)]
    pub channel: ImageChannel,
    /// Image is downsampled to: original size / scale.
    #[serde(default = "ImageDemSettings::default_scale")]
    pub scale: usize,
    #[serde(default = "ImageDemSettings::default_height_scale")]
    pub height_scale: f32,
    #[serde(default)]
    pub height_offset: f32,
    /// Geographic extent covered by the image.
    pub bounds: Bounds,
    /// Outermost pixels sit on the bounds instead of being centered inside them.
    #[serde(default = "ImageDemSettings::default_post")]
    pub post: bool,
    /// Fully transparent pixels carry no data.
    #[serde(default)]
    pub transparent_no_data: bool,
}

impl Default for ImageDemSettings {
    fn default() -> Self {
        Self {
            channel: ImageChannel::default(),
            scale: Self::default_scale(),
            height_scale: Self::default_height_scale(),
            height_offset: 0.0,
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0),
            post: Self::default_post(),
            transparent_no_data: false,
        }
    }
}

impl ImageDemSettings {
    fn default_scale() -> usize {
        1
    }

    fn default_height_scale() -> f32 {
        1.0
    }

    fn default_post() -> bool {
        true
    }
}
