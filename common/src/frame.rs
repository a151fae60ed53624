use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Deserialize;

/// Channel order of a packed 24-bit frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Rgb888,
    Bgr888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        3
    }
}

/// A captured camera frame.
///
/// The pixel buffer is shared and never mutated after construction, so a
/// frame can be queued, cloned and handed across threads without copying.
#[derive(Debug, Clone)]
pub struct RawFrame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl RawFrame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
                width,
                height,
            });
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at_ms,
            seq,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Pixel buffer in RGB order, borrowing when no conversion is needed.
    pub fn to_rgb(&self) -> Cow<'_, [u8]> {
        match self.format {
            PixelFormat::Rgb888 => Cow::Borrowed(&self.data),
            PixelFormat::Bgr888 => {
                let mut out = Vec::with_capacity(self.data.len());
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[2], px[1], px[0]]);
                }
                Cow::Owned(out)
            }
        }
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Intersection over union; zero when either box is degenerate.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Output of one inference call, ordered by descending score.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub inference_time: Duration,
}

impl DetectionResult {
    pub fn contains_class(&self, class_id: u32) -> bool {
        self.detections.iter().any(|d| d.class_id == class_id)
    }
}

/// An encoded JPEG with overlays applied, ready to be streamed.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub jpeg: Bytes,
    pub seq: u64,
    pub captured_at_ms: i64,
    pub fps: f32,
    pub detections: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_size() {
        let err = RawFrame::new(vec![0; 10], 2, 2, PixelFormat::Rgb888, 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { expected: 12, .. }));
    }

    #[test]
    fn rejects_zero_dimensions() {
        let err = RawFrame::new(vec![], 0, 4, PixelFormat::Rgb888, 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::EmptyDimensions { .. }));
    }

    #[test]
    fn bgr_converts_to_rgb() {
        let frame =
            RawFrame::new(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr888, 0, 0).unwrap();
        assert_eq!(frame.to_rgb().as_ref(), &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb_is_borrowed() {
        let frame = RawFrame::new(vec![9; 3], 1, 1, PixelFormat::Rgb888, 0, 0).unwrap();
        assert!(matches!(frame.to_rgb(), Cow::Borrowed(_)));
    }

    #[test]
    fn clones_share_the_buffer() {
        let frame = RawFrame::new(vec![7; 12], 2, 2, PixelFormat::Rgb888, 5, 1).unwrap();
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels(), copy.pixels()));
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BoundingBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 };
        let b = BoundingBox { x1: 5.0, y1: 0.0, x2: 15.0, y2: 10.0 };
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_have_zero_iou() {
        let a = BoundingBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 };
        let b = BoundingBox { x1: 2.0, y1: 2.0, x2: 3.0, y2: 3.0 };
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn contains_class() {
        let result = DetectionResult {
            detections: vec![Detection {
                class_id: 2,
                score: 0.9,
                bbox: BoundingBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            }],
            inference_time: Duration::from_millis(12),
        };
        assert!(result.contains_class(2));
        assert!(!result.contains_class(0));
    }
}
