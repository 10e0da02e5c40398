pub mod settings;

pub use settings::*;

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage};
use terrain_mesh_core::dem::{has_data, Dem, DemError, NO_DATA};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageDemError {
    #[error("Image has no pixels")]
    EmptyImage,
    #[error("Scale must be positive")]
    ZeroScale,
    #[error("DEM error: {0}")]
    Dem(#[from] DemError),
}

/// Read a raster out of an image.
///
/// Image rows go from north to south, raster rows are flipped to start at the south edge.
///
/// # Arguments
/// * `image` - Input image to process.
/// * `settings` - Channel, scaling and placement of the raster.
///
/// # Returns
/// Raster or error.
pub fn dem_from_image(image: DynamicImage, settings: &ImageDemSettings) -> Result<Dem, ImageDemError> {
    if settings.scale == 0 {
        return Err(ImageDemError::ZeroScale);
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageDemError::EmptyImage);
    }
    let image = if settings.scale > 1 {
        image.resize_exact(
            (image.width() / settings.scale as u32).max(1),
            (image.height() / settings.scale as u32).max(1),
            FilterType::Triangle,
        )
    } else {
        image
    };
    let width = image.width() as usize;
    let height = image.height() as usize;
    let samples: Vec<f32> = match settings.channel {
        ImageChannel::Luma => image.to_luma8().into_raw().into_iter().map(f32::from).collect(),
        ImageChannel::Luma16 => image.to_luma16().into_raw().into_iter().map(f32::from).collect(),
        channel => {
            let index = match channel {
                ImageChannel::Red => 0,
                ImageChannel::Green => 1,
                ImageChannel::Blue => 2,
                _ => 3,
            };
            image
                .to_rgba8()
                .into_raw()
                .chunks(4)
                .map(|c| f32::from(c[index]))
                .collect()
        }
    };
    let alpha = settings
        .transparent_no_data
        .then(|| image.to_rgba8().into_raw().chunks(4).map(|c| c[3]).collect::<Vec<_>>());
    let mut data = vec![NO_DATA; width * height];
    for row in 0..height {
        let target = height - 1 - row;
        for x in 0..width {
            let i = row * width + x;
            if alpha.as_ref().map(|a| a[i] == 0).unwrap_or(false) {
                continue;
            }
            data[target * width + x] = samples[i] * settings.height_scale + settings.height_offset;
        }
    }
    Ok(Dem::new(width, height, settings.bounds, settings.post, data)?)
}

/// Render a raster as a grayscale image stretched between its lowest and highest value.
///
/// Cells without data are black, the lowest value maps to 1.
pub fn dem_to_image(dem: &Dem) -> DynamicImage {
    let (lo, hi) = dem
        .values()
        .iter()
        .copied()
        .filter(|v| has_data(*v))
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let range = if hi > lo { hi - lo } else { 1.0 };
    let (width, height) = (dem.width(), dem.height());
    let mut image = GrayImage::new(width as u32, height as u32);
    for y in 0..height {
        for x in 0..width {
            let v = dem.get(x, y);
            let luma = if has_data(v) {
                1 + ((v - lo) / range * 254.0).round() as u8
            } else {
                0
            };
            image.put_pixel(x as u32, (height - 1 - y) as u32, image::Luma([luma]));
        }
    }
    DynamicImage::ImageLuma8(image)
}
