//! Seams to the face detector and embedder, plus crop helpers.
//!
//! The core never runs a model itself. Anything that turns an image into
//! face regions, or a face crop into an [`Embedding`], plugs in here.

use crate::types::{BoundingBox, Embedding};
use image::RgbImage;

/// Locates faces in an image.
pub trait FaceDetector {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Face regions sorted by descending confidence. An image without faces
    /// yields an empty vector, not an error.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, Self::Error>;
}

/// Maps a face crop to a fixed-length embedding.
pub trait FaceEmbedder {
    type Error: std::error::Error + Send + Sync + 'static;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, Self::Error>;
}

/// Cut `bbox` out of `image`, clamped to the image bounds.
///
/// Returns `None` when nothing of the box lies inside the image.
pub fn crop_face(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let x1 = bbox.x.floor().clamp(0.0, w) as u32;
    let y1 = bbox.y.floor().clamp(0.0, h) as u32;
    let x2 = (bbox.x + bbox.width).ceil().clamp(0.0, w) as u32;
    let y2 = (bbox.y + bbox.height).ceil().clamp(0.0, h) as u32;

    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(image::imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image())
}

/// The face with the largest area.
pub fn largest_face(faces: &[BoundingBox]) -> Option<&BoundingBox> {
    faces
        .iter()
        .max_by(|a, b| a.area().partial_cmp(&b.area()).unwrap_or(std::cmp::Ordering::Equal))
}

/// Histogram-equalize the luma channel in place, leaving chroma untouched.
///
/// Converts to BT.601 YCbCr, equalizes Y over the whole crop, converts back.
/// Evens out lighting between enrollment photos.
pub fn equalize_luma(image: &mut RgbImage) {
    let pixels = (image.width() * image.height()) as usize;
    if pixels == 0 {
        return;
    }

    let ycc: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_ycbcr(p.0)).collect();

    let mut hist = [0u32; 256];
    for px in &ycc {
        hist[luma_bin(px[0])] += 1;
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (bin, count) in hist.iter().enumerate() {
        running += count;
        cdf[bin] = running;
    }
    let cdf_min = cdf.iter().copied().find(|&v| v > 0).unwrap_or(0);
    let denom = pixels as u32 - cdf_min;
    if denom == 0 {
        // Flat luma: nothing to stretch.
        return;
    }

    let lut: Vec<f32> = cdf
        .iter()
        .map(|&c| (c.saturating_sub(cdf_min) as f32 / denom as f32 * 255.0).round())
        .collect();

    for (pixel, px) in image.pixels_mut().zip(ycc) {
        let y = lut[luma_bin(px[0])];
        pixel.0 = ycbcr_to_rgb([y, px[1], px[2]]);
    }
}

fn luma_bin(y: f32) -> usize {
    y.round().clamp(0.0, 255.0) as usize
}

fn rgb_to_ycbcr([r, g, b]: [u8; 3]) -> [f32; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
    [y, cb, cr]
}

fn ycbcr_to_rgb([y, cb, cr]: [f32; 3]) -> [u8; 3] {
    let r = y + 1.402 * (cr - 128.0);
    let g = y - 0.344_136 * (cb - 128.0) - 0.714_136 * (cr - 128.0);
    let b = y + 1.772 * (cb - 128.0);
    [r, g, b].map(|v| v.round().clamp(0.0, 255.0) as u8)
}
