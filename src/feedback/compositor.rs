//! Overlay compositing for button images.
//!
//! The overlay is scaled to the base image's width (keeping its aspect
//! ratio) and blended source-over at full opacity onto the top-left corner.

use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{ImageEncoder, RgbaImage};

use super::images::strip_data_url;
use crate::error::{BridgeError, Result};

/// Composite `overlay_b64` onto `base_b64` and return the result as base64 PNG.
///
/// # Errors
///
/// Returns [`BridgeError::Image`] if either input fails to decode or the
/// result cannot be encoded.
pub fn composite_overlay(base_b64: &str, overlay_b64: &str) -> Result<String> {
    let mut base = decode_rgba(base_b64, "base")?;
    let overlay = decode_rgba(overlay_b64, "overlay")?;

    let scaled = scale_to_width(&overlay, base.width());
    imageops::overlay(&mut base, &scaled, 0, 0);

    let png = encode_png(&base)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(png))
}

fn decode_rgba(data: &str, which: &str) -> Result<RgbaImage> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(strip_data_url(data).trim())
        .map_err(|e| BridgeError::Image(format!("{which} base64: {e}")))?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| BridgeError::Image(format!("{which} decode: {e}")))?;
    Ok(decoded.to_rgba8())
}

fn scale_to_width(image: &RgbaImage, width: u32) -> RgbaImage {
    if image.width() == width || image.width() == 0 {
        return image.clone();
    }
    let height = (u64::from(image.height()) * u64::from(width) / u64::from(image.width())).max(1);
    let height = u32::try_from(height).unwrap_or(u32::MAX);
    imageops::resize(image, width.max(1), height, FilterType::Triangle)
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| BridgeError::Image(format!("PNG encode: {e}")))?;
    Ok(buf)
}

/// Encode an RGBA image as base64 PNG. Used to build fixtures.
#[doc(hidden)]
pub fn png_base64(image: &RgbaImage) -> Result<String> {
    Ok(base64::engine::general_purpose::STANDARD.encode(encode_png(image)?))
}
