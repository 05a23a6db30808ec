//! Latest annotated frame, for live preview.
//!
//! A single-slot `watch` channel: the engine thread overwrites the slot after
//! every processed image and readers always see the newest JPEG.

use crate::engine::FaceReport;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, Rgb, RgbImage};
use std::sync::Arc;
use tokio::sync::watch;

const MATCH_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const BOX_THICKNESS: i64 = 2;
const JPEG_QUALITY: u8 = 80;

type Slot = Option<Arc<Vec<u8>>>;

/// Producer side, owned by the engine thread.
pub struct PreviewPublisher {
    tx: watch::Sender<Slot>,
}

/// Consumer side. Cheap to clone.
#[derive(Clone)]
pub struct PreviewReader {
    rx: watch::Receiver<Slot>,
}

pub fn channel() -> (PreviewPublisher, PreviewReader) {
    let (tx, rx) = watch::channel(None);
    (PreviewPublisher { tx }, PreviewReader { rx })
}

impl PreviewPublisher {
    /// Draw the face boxes onto `frame` and publish it as JPEG.
    pub fn publish(&self, mut frame: RgbImage, faces: &[FaceReport]) {
        annotate(&mut frame, faces);
        match encode_jpeg(&frame) {
            Ok(jpeg) => {
                self.tx.send_replace(Some(Arc::new(jpeg)));
            }
            Err(e) => tracing::warn!(error = %e, "preview encode failed"),
        }
    }
}

impl PreviewReader {
    /// Most recent JPEG, if any frame has been processed yet.
    pub fn latest(&self) -> Option<Arc<Vec<u8>>> {
        self.rx.borrow().clone()
    }
}

/// Outline each face: green when matched, red when unknown.
pub fn annotate(frame: &mut RgbImage, faces: &[FaceReport]) {
    for face in faces {
        let color = if face.matched { MATCH_COLOR } else { UNKNOWN_COLOR };
        let b = &face.bbox;
        draw_outline(
            frame,
            b.x.round() as i64,
            b.y.round() as i64,
            (b.x + b.width).round() as i64,
            (b.y + b.height).round() as i64,
            color,
        );
    }
}

fn draw_outline(frame: &mut RgbImage, x1: i64, y1: i64, x2: i64, y2: i64, color: Rgb<u8>) {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    // Edges lying off-frame stay off-frame, but loops never run past the image.
    let clamp_x = |x: i64| x.clamp(-BOX_THICKNESS, w + BOX_THICKNESS);
    let clamp_y = |y: i64| y.clamp(-BOX_THICKNESS, h + BOX_THICKNESS);
    let (x1, x2, y1, y2) = (clamp_x(x1), clamp_x(x2), clamp_y(y1), clamp_y(y2));
    let mut put = |x: i64, y: i64| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            frame.put_pixel(x as u32, y as u32, color);
        }
    };

    for t in 0..BOX_THICKNESS {
        for x in x1..=x2 {
            put(x, y1 + t);
            put(x, y2 - t);
        }
        for y in y1..=y2 {
            put(x1 + t, y);
            put(x2 - t, y);
        }
    }
}

fn encode_jpeg(frame: &RgbImage) -> ImageResult<Vec<u8>> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY).encode_image(frame)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::BoundingBox;

    fn face(matched: bool) -> FaceReport {
        FaceReport {
            bbox: BoundingBox { x: 2.0, y: 2.0, width: 10.0, height: 10.0, confidence: 0.9 },
            name: if matched { "Alice".into() } else { "Unknown".into() },
            distance: Some(1.0),
            matched,
            recorded: false,
            error: None,
        }
    }

    #[test]
    fn test_annotate_colors() {
        let mut frame = RgbImage::new(20, 20);
        annotate(&mut frame, &[face(true)]);
        assert_eq!(*frame.get_pixel(2, 2), MATCH_COLOR);
        assert_eq!(*frame.get_pixel(7, 7), Rgb([0, 0, 0]));

        let mut frame = RgbImage::new(20, 20);
        annotate(&mut frame, &[face(false)]);
        assert_eq!(*frame.get_pixel(12, 7), UNKNOWN_COLOR);
    }

    #[test]
    fn test_annotate_clips_at_edges() {
        let mut frame = RgbImage::new(8, 8);
        let mut f = face(true);
        f.bbox = BoundingBox { x: -5.0, y: -5.0, width: 100.0, height: 100.0, confidence: 0.9 };
        annotate(&mut frame, &[f]);
    }

    #[test]
    fn test_annotate_huge_box_is_clamped() {
        let mut frame = RgbImage::new(8, 8);
        let mut f = face(false);
        f.bbox = BoundingBox { x: -1.0e12, y: 2.0, width: 2.0e12, height: 1.0e12, confidence: 0.9 };
        annotate(&mut frame, &[f]);

        // Only the top edge falls inside the frame.
        assert_eq!(*frame.get_pixel(0, 2), UNKNOWN_COLOR);
        assert_eq!(*frame.get_pixel(7, 3), UNKNOWN_COLOR);
        assert_eq!(*frame.get_pixel(4, 6), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let (publisher, reader) = channel();
        assert!(reader.latest().is_none());

        publisher.publish(RgbImage::new(16, 16), &[]);
        let first = reader.latest().unwrap();
        publisher.publish(RgbImage::new(32, 32), &[face(true)]);
        let second = reader.latest().unwrap();

        assert_ne!(first, second);
        let decoded = image::load_from_memory(&second).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 32));
    }
}
