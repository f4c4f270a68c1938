//! Decoding into linear RGB and writing display buffers back to disk.

use std::path::Path;

use anyhow::{Context, Result};
use image::{ColorType, DynamicImage, ImageBuffer, Rgba};

use crate::processing::color_space::{bgra8_to_rgba8, rgb8_to_linear, unorm_to_linear};
use crate::processing::layout::LinearImage;

/// Loads an image as interleaved linear RGB.
///
/// Float formats (Radiance HDR, OpenEXR) are already linear and taken as-is.
/// 16-bit PNG/TIFF are decoded at full depth and linearised; everything else
/// goes through the 8-bit table. Alpha is dropped.
pub fn load_linear_image(path: &Path) -> Result<LinearImage> {
    let img = image::open(path).with_context(|| format!("Failed to open image: {}", path.display()))?;
    tracing::debug!(
        "decoded {} ({}x{}, {:?})",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );
    linear_from_dynamic(img)
}

fn linear_from_dynamic(img: DynamicImage) -> Result<LinearImage> {
    let (width, height) = (img.width(), img.height());
    let color = img.color();
    let data = if is_float(color) {
        img.into_rgb32f().into_raw()
    } else if is_16bit(color) {
        let mut data = img.into_rgb32f().into_raw();
        data.iter_mut().for_each(|v| *v = unorm_to_linear(*v));
        data
    } else {
        rgb8_to_linear(&img.into_rgb8().into_raw())
    };
    LinearImage::new(width, height, data)
}

fn is_float(color: ColorType) -> bool {
    matches!(color, ColorType::Rgb32F | ColorType::Rgba32F)
}

fn is_16bit(color: ColorType) -> bool {
    matches!(color, ColorType::L16 | ColorType::La16 | ColorType::Rgb16 | ColorType::Rgba16)
}

/// Writes a BGRA8 display buffer; the format follows the file extension.
pub fn save_bgra8(path: &Path, width: u32, height: u32, bgra: &[u8]) -> Result<()> {
    let img_buffer = ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, bgra8_to_rgba8(bgra))
        .ok_or_else(|| anyhow::anyhow!("BGRA buffer does not match {}x{}", width, height))?;
    img_buffer
        .save(path)
        .with_context(|| format!("Failed to write image: {}", path.display()))
}
