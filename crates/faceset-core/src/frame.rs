//! Canonical-width frame normalization.
//!
//! All geometric work downstream (box decoding, cropping) is done against the
//! resized frame, so this must run before detection — boxes denormalized
//! against one frame are meaningless against another.

use image::imageops::{self, FilterType};
use image::RgbImage;
use std::path::Path;

/// Scale an image to `target_width`, preserving aspect ratio.
///
/// `target_width == 0` is the explicit opt-out and returns the image
/// unchanged, as does an image already at the target width.
pub fn resize_to_width(image: RgbImage, target_width: u32) -> RgbImage {
    if target_width == 0 || image.width() == target_width {
        return image;
    }

    let height = (image.height() as f32 * target_width as f32 / image.width() as f32)
        .round()
        .max(1.0) as u32;

    tracing::debug!(
        from_width = image.width(),
        from_height = image.height(),
        to_width = target_width,
        to_height = height,
        "resizing frame to canonical width"
    );

    imageops::resize(&image, target_width, height, FilterType::Triangle)
}

/// Load an image from disk as 8-bit RGB.
pub fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    Ok(image::open(path)?.to_rgb8())
}
