pub mod mjpeg;
pub mod synthetic;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};
use watchpost_common::config::CameraConfig;
use watchpost_common::frame::{FrameError, PixelFormat, RawFrame};

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Parameters a camera is opened with.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub connect_timeout: Duration,
}

impl From<&CameraConfig> for CaptureSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            pixel_format: config.pixel_format,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open camera: {0}")]
    Open(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("failed to decode frame: {0}")]
    Decode(String),
    #[error("camera handle is closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Opens camera devices. One implementation per kind of hardware or stream.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CameraDevice>, SourceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// An open camera.
#[async_trait]
pub trait CameraDevice: Send {
    /// Capture one frame. Errors are expected to be transient.
    async fn capture(&mut self) -> Result<RawFrame, SourceError>;

    /// Release the underlying resource.
    async fn close(&mut self);
}

/// The single open camera, shared by reference with the acquisition worker.
///
/// Once closed, the device is gone for good; a restart opens a new handle.
pub struct CameraHandle {
    id: u64,
    device: Mutex<Option<Box<dyn CameraDevice>>>,
}

impl CameraHandle {
    pub async fn open(
        source: &dyn FrameSource,
        settings: &CaptureSettings,
    ) -> Result<Self, SourceError> {
        let device = source.open(settings).await?;
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            handle = id,
            source = source.name(),
            width = settings.width,
            height = settings.height,
            "camera opened"
        );
        Ok(Self {
            id,
            device: Mutex::new(Some(device)),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn capture(&self) -> Result<RawFrame, SourceError> {
        let mut device = self.device.lock().await;
        match device.as_mut() {
            Some(device) => device.capture().await,
            None => Err(SourceError::Closed),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.device.lock().await.is_some()
    }

    /// Close the device. Closing twice is a no-op.
    pub async fn close(&self) {
        let device = self.device.lock().await.take();
        match device {
            Some(mut device) => {
                device.close().await;
                info!(handle = self.id, "camera closed");
            }
            None => debug!(handle = self.id, "camera already closed"),
        }
    }
}

/// Build the frame source named by `config.source`.
pub fn from_config(config: &CameraConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match config.source.as_str() {
        "synthetic" => Ok(Box::new(SyntheticSource::new())),
        "mjpeg" => {
            let url = config
                .url
                .clone()
                .ok_or_else(|| SourceError::Open("mjpeg source needs camera.url".into()))?;
            Ok(Box::new(MjpegSource::new(url)))
        }
        other => Err(SourceError::Open(format!(
            "unknown camera source '{other}', expected 'mjpeg' or 'synthetic'"
        ))),
    }
}
