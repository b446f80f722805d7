//! Rendered component thumbnails.
//!
//! Decoded images are scaled to a bounding box that depends on how they will
//! be displayed, then written as PNG. These functions are CPU bound; callers
//! run them on a blocking thread while holding an ingest gate pass.

use image::{imageops, DynamicImage, GenericImageView};
use std::io::Cursor;

use crate::models::DisplayMode;

/// Longest side of a thumbnail shown edge to edge.
const FILL_SIDE: u32 = 256;
/// Longest side of a thumbnail letterboxed inside its cell.
const FIT_SIDE: u32 = 192;
/// JPEG quality for canonical re-encoding.
const JPEG_QUALITY: u8 = 90;

/// A thumbnail ready to be written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedThumbnail {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode any raster format the `image` crate recognises by its signature.
pub fn decode_image(bytes: &[u8]) -> Option<DynamicImage> {
    if bytes.is_empty() {
        return None;
    }
    image::guess_format(bytes).ok()?;
    image::load_from_memory(bytes).ok()
}

/// Whether the bytes start with a raster format signature.
pub fn has_image_signature(bytes: &[u8]) -> bool {
    image::guess_format(bytes).is_ok()
}

/// Pixel size of encoded image bytes, read from the header alone.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Scale `(w, h)` down so the longest side is at most `side`, keeping the
/// aspect ratio. Images already small enough are left alone.
fn bounded(w: u32, h: u32, side: u32) -> (u32, u32) {
    let longest = w.max(h);
    if longest <= side || longest == 0 {
        return (w, h);
    }
    let scale = side as f32 / longest as f32;
    (
        ((w as f32 * scale).round() as u32).max(1),
        ((h as f32 * scale).round() as u32).max(1),
    )
}

/// Render `img` for display with `mode`.
pub fn render(img: &DynamicImage, mode: DisplayMode) -> Option<RenderedThumbnail> {
    let img = match mode {
        DisplayMode::Circle => {
            let (w, h) = img.dimensions();
            let side = w.min(h);
            img.crop_imm((w - side) / 2, (h - side) / 2, side, side)
        }
        _ => img.clone(),
    };
    let limit = match mode {
        DisplayMode::Fit => FIT_SIDE,
        DisplayMode::Fill | DisplayMode::Center | DisplayMode::Circle => FILL_SIDE,
    };
    let (w, h) = img.dimensions();
    let (tw, th) = bounded(w, h, limit);
    let scaled = if (tw, th) == (w, h) {
        img
    } else {
        DynamicImage::ImageRgba8(imageops::resize(&img, tw, th, imageops::FilterType::Triangle))
    };

    let mut png = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .ok()?;
    Some(RenderedThumbnail {
        png,
        width: tw,
        height: th,
    })
}

/// Decode and render in one step.
pub fn render_bytes(bytes: &[u8], mode: DisplayMode) -> Option<RenderedThumbnail> {
    render(&decode_image(bytes)?, mode)
}

/// Re-encode an image as baseline JPEG, dropping any alpha channel.
pub fn encode_jpeg(img: &DynamicImage) -> Option<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    rgb.write_with_encoder(encoder).ok()?;
    Some(out)
}

/// A flat swatch of one colour, channels in `0.0..=1.0`.
pub fn color_swatch(red: f32, green: f32, blue: f32, alpha: f32) -> Option<RenderedThumbnail> {
    let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let pixel = image::Rgba([channel(red), channel(green), channel(blue), channel(alpha)]);
    let swatch = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(64, 64, pixel));
    render(&swatch, DisplayMode::Center)
}

#[cfg(test)]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}
