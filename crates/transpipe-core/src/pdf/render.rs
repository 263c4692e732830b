use image::{ImageEncoder, RgbaImage};
use mupdf::{Colorspace, Matrix};

use crate::config::ImageLimits;
use crate::error::{Error, Result};
use super::document::PdfDocument;
use super::page_index::PageIndex;

/// Rendered page dimensions
#[derive(Debug, Clone, Copy)]
pub struct PageSize {
    pub width: u32,
    pub height: u32,
}

/// Default scale factor for rendering (2.0 for high DPI)
pub const DEFAULT_RENDER_SCALE: f32 = 2.0;

/// Page renderer for PDF documents
pub struct PageRenderer<'a> {
    /// The PDF document to render
    pub doc: &'a PdfDocument,
    /// Scale factor for rendering
    pub scale: f32,
}

impl<'a> PageRenderer<'a> {
    /// Create a renderer with default scale (2.0)
    pub const fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            scale: DEFAULT_RENDER_SCALE,
        }
    }

    /// Create a renderer with custom scale
    pub const fn with_scale(doc: &'a PdfDocument, scale: f32) -> Self {
        Self { doc, scale }
    }

    /// Get the size of a page at the current scale
    pub fn page_size(&self, page_num: usize) -> Result<PageSize> {
        let page_index = PageIndex::try_from_page_num(page_num, self.doc.page_count())?;

        let doc = self.doc.open_document()?;
        let page = doc.load_page(page_index.into()).map_err(|e| {
            Error::PdfRender {
                page: page_num,
                reason: format!("Failed to load page: {e}"),
            }
        })?;

        let bounds = page.bounds().map_err(|e| {
            Error::PdfRender {
                page: page_num,
                reason: format!("Failed to get bounds: {e}"),
            }
        })?;

        // PDF dimensions are always positive and reasonable (< millions of pixels)
        let width = f32_to_u32((bounds.x1 - bounds.x0) * self.scale);
        let height = f32_to_u32((bounds.y1 - bounds.y0) * self.scale);

        Ok(PageSize { width, height })
    }

    /// Render a page to an RGBA image buffer
    pub fn render_page(&self, page_num: usize) -> Result<RgbaImage> {
        let page_index = PageIndex::try_from_page_num(page_num, self.doc.page_count())?;

        let doc = self.doc.open_document()?;
        let page = doc.load_page(page_index.into()).map_err(|e| {
            Error::PdfRender {
                page: page_num,
                reason: format!("Failed to load page: {e}"),
            }
        })?;

        let _bounds = page.bounds().map_err(|e| {
            Error::PdfRender {
                page: page_num,
                reason: format!("Failed to get bounds: {e}"),
            }
        })?;

        // Create transformation matrix for scaling
        let matrix = Matrix::new_scale(self.scale, self.scale);

        // Render to pixmap (RGBA)
        let pixmap = page
            .to_pixmap(&matrix, &Colorspace::device_rgb(), 1.0, true)
            .map_err(|e| {
                Error::PdfRender {
                    page: page_num,
                    reason: format!("Failed to render: {e}"),
                }
            })?;

        // Convert to image
        let pixels = pixmap.samples();
        let img_width = pixmap.width();
        let img_height = pixmap.height();

        // mupdf returns RGB, we need RGBA
        let n = pixmap.n() as usize; // components per pixel
        let mut rgba_pixels = Vec::with_capacity((img_width * img_height * 4) as usize);

        for chunk in pixels.chunks(n) {
            match n {
                3 => {
                    // RGB -> RGBA
                    rgba_pixels.push(chunk[0]);
                    rgba_pixels.push(chunk[1]);
                    rgba_pixels.push(chunk[2]);
                    rgba_pixels.push(255);
                }
                4 => {
                    // Already RGBA
                    rgba_pixels.extend_from_slice(chunk);
                }
                1 => {
                    // Grayscale -> RGBA
                    rgba_pixels.push(chunk[0]);
                    rgba_pixels.push(chunk[0]);
                    rgba_pixels.push(chunk[0]);
                    rgba_pixels.push(255);
                }
                _ => {
                    return Err(Error::PdfRender {
                        page: page_num,
                        reason: format!("Unexpected pixel format with {n} components"),
                    });
                }
            }
        }

        RgbaImage::from_raw(img_width, img_height, rgba_pixels).ok_or_else(|| {
            Error::PdfRender {
                page: page_num,
                reason: "Failed to create image buffer".to_string(),
            }
        })
    }

    /// Render a page to PNG bytes
    pub fn render_page_png(&self, page_num: usize) -> Result<Vec<u8>> {
        let img = self.render_page(page_num)?;

        let mut png_data = Vec::new();
        // Use fast compression for better performance (still lossless)
        let encoder = image::codecs::png::PngEncoder::new_with_quality(
            &mut png_data,
            image::codecs::png::CompressionType::Fast,
            image::codecs::png::FilterType::Adaptive,
        );

        encoder
            .write_image(
                img.as_raw(),
                img.width(),
                img.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| Error::PdfRender {
                page: page_num,
                reason: format!("Failed to encode PNG: {e}"),
            })?;

        Ok(png_data)
    }

    /// Render a page to JPEG bytes at the largest quality (within `limits`)
    /// that keeps the encoded size under `limits.max_file_bytes`. Used by
    /// the PDF-ingest stage to rasterize a page for the OCR
    /// provider under the same size budget as uploaded images.
    pub fn render_page_jpeg(&self, page_num: usize, limits: &ImageLimits) -> Result<Vec<u8>> {
        let img = self.render_page(page_num)?;
        let resized = downscale_to_limit(&img, limits.max_dimension_px);
        encode_jpeg_within_budget(&resized, limits)
    }
}

/// Downscale an image so neither dimension exceeds `max_dimension_px`,
/// preserving aspect ratio. A no-op if the image already fits.
pub fn downscale_to_limit(img: &RgbaImage, max_dimension_px: u32) -> RgbaImage {
    let (width, height) = (img.width(), img.height());
    if width <= max_dimension_px && height <= max_dimension_px {
        return img.clone();
    }
    let scale = max_dimension_px as f64 / width.max(height) as f64;
    let target_width = ((width as f64 * scale).round() as u32).max(1);
    let target_height = ((height as f64 * scale).round() as u32).max(1);
    image::imageops::resize(img, target_width, target_height, image::imageops::FilterType::Lanczos3)
}

/// Binary-search the JPEG quality in `[limits.jpeg_quality_min,
/// limits.jpeg_quality_max]` for the highest quality whose encoded size is
/// still within `limits.max_file_bytes`. Falls back to the minimum quality
/// if even that does not fit.
pub fn encode_jpeg_within_budget(img: &RgbaImage, limits: &ImageLimits) -> Result<Vec<u8>> {
    let rgb = image::DynamicImage::ImageRgba8(img.clone()).to_rgb8();

    let encode_at = |quality: u8| -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
            .map_err(|e| Error::Image(format!("failed to encode JPEG: {e}")))?;
        Ok(buf)
    };

    let mut low = limits.jpeg_quality_min;
    let mut high = limits.jpeg_quality_max;
    let mut best = encode_at(low)?;

    while low <= high {
        let mid = low + (high - low) / 2;
        let candidate = encode_at(mid)?;
        #[allow(clippy::cast_possible_truncation)]
        if (candidate.len() as u64) <= limits.max_file_bytes {
            best = candidate;
            if mid == limits.jpeg_quality_max {
                break;
            }
            low = mid + 1;
        } else {
            if mid == limits.jpeg_quality_min {
                break;
            }
            high = mid - 1;
        }
    }

    Ok(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downscale_to_limit_is_noop_under_limit() {
        let img = RgbaImage::from_pixel(100, 50, image::Rgba([1, 2, 3, 255]));
        let out = downscale_to_limit(&img, 2800);
        assert_eq!((out.width(), out.height()), (100, 50));
    }

    #[test]
    fn downscale_to_limit_preserves_aspect_ratio_for_oversized_non_square() {
        let img = RgbaImage::from_pixel(4000, 1000, image::Rgba([1, 2, 3, 255]));
        let out = downscale_to_limit(&img, 2800);
        assert_eq!(out.width(), 2800);
        assert_eq!(out.height(), 700, "height should scale proportionally with width, not be forced to 2800");
    }

    #[test]
    fn downscale_to_limit_scales_by_tallest_side() {
        let img = RgbaImage::from_pixel(1000, 4000, image::Rgba([1, 2, 3, 255]));
        let out = downscale_to_limit(&img, 2800);
        assert_eq!(out.height(), 2800);
        assert_eq!(out.width(), 700);
    }
}

/// Convenience function to render a single page from bytes
pub fn render_page_from_bytes(pdf_bytes: &[u8], page_num: usize, scale: f32) -> Result<Vec<u8>> {
    let doc = PdfDocument::from_bytes(pdf_bytes.to_vec())?;
    let renderer = PageRenderer::with_scale(&doc, scale);
    renderer.render_page_png(page_num)
}

/// Convert f32 dimension to u32, clamping to valid range.
/// PDF dimensions are always non-negative and reasonable for rendering.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
const fn f32_to_u32(value: f32) -> u32 {
    // Precision loss on MAX is fine - we just need an upper bound
    const MAX: f32 = u32::MAX as f32;
    // Manual clamp since f32::clamp isn't const
    let clamped = if value < 0.0 {
        0.0
    } else if value > MAX {
        MAX
    } else {
        value
    };
    clamped as u32
}
