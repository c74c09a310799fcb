//! PNG decode/encode and pixel operations on stamp artwork
//!
//! Every decode builds its own cursor over the caller's bytes; no reader
//! is ever shared between two decodes.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngDecoder, PngEncoder};
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageEncoder};

pub use image::RgbaImage;

use crate::error::StampError;

/// PNG magic bytes: 89 50 4E 47 0D 0A 1A 0A
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Signature (8) + IHDR chunk (25) + IEND chunk (12)
pub const MIN_PNG_LEN: usize = 45;

/// Largest accepted edge, guards allocation on hostile headers
pub const MAX_DIMENSION: u32 = 8192;

/// Cheap structural check before decoding: size floor and PNG signature
pub fn validate_png(bytes: &[u8]) -> Result<(), StampError> {
    if bytes.len() < MIN_PNG_LEN {
        return Err(StampError::InvalidImageData(format!(
            "Image too short: {} bytes",
            bytes.len()
        )));
    }
    if !bytes.starts_with(&PNG_SIGNATURE) {
        return Err(StampError::InvalidImageData(
            "Invalid PNG magic bytes".to_string(),
        ));
    }
    Ok(())
}

/// Decode a PNG of any colour type or bit depth into 8-bit RGBA
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, StampError> {
    validate_png(bytes)?;

    let decoder = PngDecoder::new(Cursor::new(bytes))
        .map_err(|e| StampError::InvalidImageData(format!("PNG header: {}", e)))?;

    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(StampError::InvalidImageData(format!(
            "Unsupported image size {}x{}",
            width, height
        )));
    }

    let image = DynamicImage::from_decoder(decoder)
        .map_err(|e| StampError::InvalidImageData(format!("PNG data: {}", e)))?;
    Ok(image.to_rgba8())
}

/// Encode RGBA pixels as PNG with maximum compression
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, StampError> {
    let mut out = Vec::new();
    PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| StampError::InvalidImageData(format!("PNG encode: {}", e)))?;
    Ok(out)
}

/// Downscale so the image fits in `max_w` x `max_h`, preserving aspect
/// ratio. Images that already fit are returned as is.
pub fn fit_within(image: RgbaImage, max_w: u32, max_h: u32) -> RgbaImage {
    let (width, height) = image.dimensions();
    if width <= max_w && height <= max_h {
        return image;
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let new_w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let new_h = ((height as f64 * scale).round() as u32).clamp(1, max_h);
    imageops::resize(&image, new_w, new_h, FilterType::Triangle)
}

/// Multiply every alpha sample by `opacity` (0.0..=1.0)
pub fn scale_alpha(image: &mut RgbaImage, opacity: f64) {
    for px in image.pixels_mut() {
        px[3] = (px[3] as f64 * opacity).round().clamp(0.0, 255.0) as u8;
    }
}

/// Split into packed RGB samples and a separate alpha plane
pub fn split_alpha(image: &RgbaImage) -> (Vec<u8>, Vec<u8>) {
    let count = image.width() as usize * image.height() as usize;
    let mut rgb = Vec::with_capacity(count * 3);
    let mut alpha = Vec::with_capacity(count);
    for px in image.pixels() {
        rgb.extend_from_slice(&px.0[..3]);
        alpha.push(px[3]);
    }
    (rgb, alpha)
}

pub fn has_transparency(image: &RgbaImage) -> bool {
    image.pixels().any(|px| px[3] != 255)
}

/// Apply a per-request opacity to encoded PNG bytes, returning new bytes
pub fn with_opacity(bytes: &[u8], opacity: f64) -> Result<Vec<u8>, StampError> {
    let mut image = decode_png(bytes)?;
    scale_alpha(&mut image, opacity);
    encode_png(&image)
}
