pub mod font;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use watchpost_common::frame::{AnnotatedFrame, DetectionResult, RawFrame};

use crate::detect::labels::label_for;
use font::{draw_text, text_width, GLYPH_HEIGHT};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BACKDROP: Rgb<u8> = Rgb([0, 0, 0]);

pub const PLACEHOLDER_TEXT: &str = "Starting stream...";

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("frame buffer does not match {width}x{height}")]
    Buffer { width: u32, height: u32 },
    #[error("JPEG encode failed: {0}")]
    Encode(String),
}

/// Draw detection boxes, captions and the FPS label, then encode as JPEG.
pub fn annotate_frame(
    frame: &RawFrame,
    result: &DetectionResult,
    fps: f32,
    jpeg_quality: u8,
) -> Result<AnnotatedFrame, AnnotateError> {
    let mut image = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb().into_owned())
        .ok_or(AnnotateError::Buffer {
            width: frame.width,
            height: frame.height,
        })?;

    for detection in &result.detections {
        let b = &detection.bbox;
        draw_rectangle(
            &mut image,
            b.x1.round() as i32,
            b.y1.round() as i32,
            b.x2.round() as i32,
            b.y2.round() as i32,
            2,
            BOX_COLOR,
        );
    }

    for detection in &result.detections {
        let caption = format!(
            "{} {:.0}%",
            label_for(detection.class_id),
            detection.score * 100.0
        );
        let x = detection.bbox.x1.round() as i32;
        let y = (detection.bbox.y1.round() as i32 - GLYPH_HEIGHT - 4).max(0);
        fill_rect(&mut image, x, y, x + text_width(&caption, 1) + 2, y + GLYPH_HEIGHT + 2, BACKDROP);
        draw_text(&mut image, x + 2, y + 2, &caption, 1, BOX_COLOR);
    }

    let fps_label = format!("FPS: {fps:.1}");
    fill_rect(&mut image, 6, 6, 14 + text_width(&fps_label, 2), 14 + GLYPH_HEIGHT * 2, BACKDROP);
    draw_text(&mut image, 10, 10, &fps_label, 2, TEXT_COLOR);

    Ok(AnnotatedFrame {
        jpeg: encode_jpeg(&image, jpeg_quality)?,
        seq: frame.seq,
        captured_at_ms: frame.captured_at_ms,
        fps,
        detections: result.detections.len(),
    })
}

/// Black frame with a centred status label, served before any frame exists.
pub fn placeholder_jpeg(
    width: u32,
    height: u32,
    text: &str,
    jpeg_quality: u8,
) -> Result<Bytes, AnnotateError> {
    let mut image = RgbImage::from_pixel(width.max(1), height.max(1), BACKDROP);
    let scale = if text_width(text, 2) + 20 <= image.width() as i32 { 2 } else { 1 };
    let x = (image.width() as i32 - text_width(text, scale)) / 2;
    let y = (image.height() as i32 - GLYPH_HEIGHT * scale) / 2;
    draw_text(&mut image, x.max(0), y.max(0), text, scale, TEXT_COLOR);
    encode_jpeg(&image, jpeg_quality)
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes, AnnotateError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|e| AnnotateError::Encode(e.to_string()))?;
    Ok(Bytes::from(buffer))
}

fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    thickness: i32,
    color: Rgb<u8>,
) {
    for t in 0..thickness {
        let (l, r) = (left + t, right - t);
        let (tp, b) = (top + t, bottom - t);
        if l > r || tp > b {
            break;
        }
        fill_rect(image, l, tp, r, tp, color);
        fill_rect(image, l, b, r, b, color);
        fill_rect(image, l, tp, l, b, color);
        fill_rect(image, r, tp, r, b, color);
    }
}

/// Fill the inclusive rectangle, clipped to the image.
fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);
    for y in top..=bottom {
        for x in left..=right {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}
