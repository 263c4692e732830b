//! Image ingress processing: downscale/re-encode on upload and the rotate
//! operation. Shares the JPEG quality-budget encoder
//! with the PDF-ingest stage's page rasterization (`pdf::render`).

use image::{DynamicImage, RgbaImage};

use crate::config::ImageLimits;
use crate::error::{Error, Result};
use crate::pdf::{downscale_to_limit, encode_jpeg_within_budget};

/// Decode, downscale to `limits.max_dimension_px`, and re-encode an
/// uploaded image as a size-budgeted JPEG. Used on material ingress for
/// `MaterialKind::Image`.
pub fn prepare_upload(bytes: &[u8], limits: &ImageLimits) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::Image(format!("failed to decode image: {e}")))?;
    let rgba = img.to_rgba8();
    let resized = downscale_to_limit(&rgba, limits.max_dimension_px);
    encode_jpeg_within_budget(&resized, limits)
}

/// Rotate an image 90 degrees clockwise and re-encode within budget, per
/// the `rotate` operation.
pub fn rotate_clockwise(bytes: &[u8], limits: &ImageLimits) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes).map_err(|e| Error::Image(format!("failed to decode image: {e}")))?;
    let rotated: RgbaImage = DynamicImage::ImageRgba8(img.to_rgba8()).rotate90().to_rgba8();
    let resized = downscale_to_limit(&rotated, limits.max_dimension_px);
    encode_jpeg_within_budget(&resized, limits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png() -> Vec<u8> {
        let img = RgbaImage::from_pixel(64, 32, image::Rgba([10, 20, 30, 255]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn prepare_upload_reencodes_within_budget() {
        let limits = ImageLimits::default();
        let out = prepare_upload(&sample_png(), &limits).unwrap();
        assert!(!out.is_empty());
        assert!((out.len() as u64) <= limits.max_file_bytes);
    }

    #[test]
    fn rotate_swaps_dimensions() {
        let limits = ImageLimits::default();
        let rotated = rotate_clockwise(&sample_png(), &limits).unwrap();
        let decoded = image::load_from_memory(&rotated).unwrap();
        assert_eq!(decoded.width(), 32);
        assert_eq!(decoded.height(), 64);
    }
}
