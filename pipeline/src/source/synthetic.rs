use async_trait::async_trait;
use chrono::Utc;
use watchpost_common::frame::{PixelFormat, RawFrame};

use super::{CameraDevice, CaptureSettings, FrameSource, SourceError};

/// Test-pattern camera: a horizontal gradient with a bright bar sweeping
/// across it, one column step per captured frame.
#[derive(Debug, Default)]
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CameraDevice>, SourceError> {
        Ok(Box::new(SyntheticCamera {
            width: settings.width,
            height: settings.height,
            format: settings.pixel_format,
            seq: 0,
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticCamera {
    width: u32,
    height: u32,
    format: PixelFormat,
    seq: u64,
}

impl SyntheticCamera {
    fn render(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let bar_x = (self.seq as usize * 4) % width;
        let bar_width = (width / 16).max(1);
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                let on_bar = x >= bar_x && x < bar_x + bar_width;
                let (r, g, b) = if on_bar {
                    (240, 240, 240)
                } else {
                    ((x * 255 / width) as u8, (y * 255 / height) as u8, 64)
                };
                match self.format {
                    PixelFormat::Rgb888 => data.extend_from_slice(&[r, g, b]),
                    PixelFormat::Bgr888 => data.extend_from_slice(&[b, g, r]),
                }
            }
        }
        data
    }
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    async fn capture(&mut self) -> Result<RawFrame, SourceError> {
        let data = self.render();
        let frame = RawFrame::new(
            data,
            self.width,
            self.height,
            self.format,
            Utc::now().timestamp_millis(),
            self.seq,
        )?;
        self.seq += 1;
        Ok(frame)
    }

    async fn close(&mut self) {}
}
