use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use image::imageops::FilterType;
use tracing::{debug, info, warn};
use watchpost_common::frame::{PixelFormat, RawFrame};
use watchpost_common::multipart::MultipartParser;

use super::{CameraDevice, CaptureSettings, FrameSource, SourceError};

/// Camera backed by an upstream `multipart/x-mixed-replace` MJPEG stream,
/// such as an IP camera or a Pi camera exposed over HTTP.
pub struct MjpegSource {
    url: String,
}

impl MjpegSource {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl FrameSource for MjpegSource {
    async fn open(&self, settings: &CaptureSettings) -> Result<Box<dyn CameraDevice>, SourceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| SourceError::Open(e.to_string()))?;
        let stream = connect(&client, &self.url)
            .await
            .map_err(|e| SourceError::Open(e.to_string()))?;
        Ok(Box::new(MjpegCamera {
            client,
            url: self.url.clone(),
            stream: Some(stream),
            parser: MultipartParser::new(),
            settings: settings.clone(),
            seq: 0,
        }))
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

async fn connect(
    client: &reqwest::Client,
    url: &str,
) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, SourceError> {
    info!(url, "connecting to MJPEG stream");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SourceError::Capture(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SourceError::Capture(format!(
            "HTTP status {}",
            response.status().as_u16()
        )));
    }
    info!(status = %response.status(), "connected to MJPEG stream");
    Ok(response.bytes_stream().boxed())
}

struct MjpegCamera {
    client: reqwest::Client,
    url: String,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MultipartParser,
    settings: CaptureSettings,
    seq: u64,
}

impl MjpegCamera {
    async fn next_jpeg(&mut self) -> Result<Vec<u8>, SourceError> {
        if self.stream.is_none() {
            // Lost the connection on an earlier capture; start a fresh part.
            self.parser = MultipartParser::new();
            self.stream = Some(connect(&self.client, &self.url).await?);
        }
        loop {
            if let Some(jpeg) = self.parser.next_part() {
                return Ok(jpeg);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(SourceError::StreamEnded);
            };
            match stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(SourceError::Capture(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(SourceError::StreamEnded);
                }
            }
        }
    }
}

#[async_trait]
impl CameraDevice for MjpegCamera {
    async fn capture(&mut self) -> Result<RawFrame, SourceError> {
        let jpeg = self.next_jpeg().await?;
        let settings = self.settings.clone();
        let data = tokio::task::spawn_blocking(move || decode_jpeg(&jpeg, &settings))
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))??;
        let frame = RawFrame::new(
            data,
            self.settings.width,
            self.settings.height,
            self.settings.pixel_format,
            Utc::now().timestamp_millis(),
            self.seq,
        )?;
        debug!(seq = self.seq, "captured MJPEG frame");
        self.seq += 1;
        Ok(frame)
    }

    async fn close(&mut self) {
        if self.parser.buffered() > 0 {
            warn!(bytes = self.parser.buffered(), "discarding partial MJPEG part on close");
        }
        self.stream = None;
    }
}

/// Decode a JPEG into a packed buffer at the configured size and channel order.
fn decode_jpeg(jpeg: &[u8], settings: &CaptureSettings) -> Result<Vec<u8>, SourceError> {
    let img = image::load_from_memory(jpeg).map_err(|e| SourceError::Decode(e.to_string()))?;
    let mut rgb = img.to_rgb8();
    if rgb.width() != settings.width || rgb.height() != settings.height {
        rgb = image::imageops::resize(&rgb, settings.width, settings.height, FilterType::Triangle);
    }
    let mut data = rgb.into_raw();
    if settings.pixel_format == PixelFormat::Bgr888 {
        for px in data.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
    }
    Ok(data)
}
