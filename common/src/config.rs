use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::PixelFormat;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_source")]
    pub source: String,
    /// Upstream MJPEG stream, only read by the "mjpeg" source.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub pixel_format: PixelFormat,
    #[serde(default = "default_capture_delay_ms")]
    pub capture_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_true")]
    pub start_on_boot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_backend")]
    pub backend: String,
    #[serde(default)]
    pub model_path: Option<String>,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,
    #[serde(default)]
    pub tracked_class_id: u32,
    #[serde(default = "default_tracked_label")]
    pub tracked_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_alert_transport")]
    pub transport: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_alert_subject")]
    pub subject: String,
    #[serde(default = "default_alert_body")]
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            source: default_camera_source(),
            url: None,
            width: default_width(),
            height: default_height(),
            pixel_format: PixelFormat::default(),
            capture_delay_ms: default_capture_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            idle_poll_ms: default_idle_poll_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            jpeg_quality: default_jpeg_quality(),
            start_on_boot: true,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            backend: default_detection_backend(),
            model_path: None,
            input_size: default_input_size(),
            confidence_threshold: default_confidence_threshold(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            tracked_class_id: 0,
            tracked_label: default_tracked_label(),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            transport: default_alert_transport(),
            webhook_url: None,
            cooldown_secs: default_cooldown_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            subject: default_alert_subject(),
            body: default_alert_body(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "camera resolution must be non-zero, got {}x{}",
                self.camera.width, self.camera.height
            )));
        }
        if self.camera.source == "mjpeg" && self.camera.url.is_none() {
            return Err(ConfigError::Invalid(
                "camera.url is required for the mjpeg source".into(),
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.channel_capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "pipeline.jpeg_quality must be in 1..=100, got {}",
                self.pipeline.jpeg_quality
            )));
        }
        for (name, value) in [
            ("confidence_threshold", self.detection.confidence_threshold),
            ("iou_threshold", self.detection.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "detection.{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if self.detection.max_detections == 0 {
            return Err(ConfigError::Invalid(
                "detection.max_detections must be at least 1".into(),
            ));
        }
        // Zero busy-loops the polls and times out every alert send.
        for (name, value) in [
            ("pipeline.idle_poll_ms", self.pipeline.idle_poll_ms),
            ("server.frame_interval_ms", self.server.frame_interval_ms),
            ("alert.send_timeout_secs", self.alert.send_timeout_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
            }
        }
        if self.alert.transport == "webhook" && self.alert.webhook_url.is_none() {
            return Err(ConfigError::Invalid(
                "alert.webhook_url is required for the webhook transport".into(),
            ));
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_camera_source() -> String {
    "synthetic".into()
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_capture_delay_ms() -> u64 {
    10
}
fn default_retry_delay_ms() -> u64 {
    100
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_channel_capacity() -> usize {
    2
}
fn default_idle_poll_ms() -> u64 {
    10
}
fn default_stop_timeout_ms() -> u64 {
    1000
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_true() -> bool {
    true
}
fn default_detection_backend() -> String {
    "none".into()
}
fn default_input_size() -> u32 {
    320
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_iou_threshold() -> f32 {
    0.4
}
fn default_max_detections() -> usize {
    10
}
fn default_tracked_label() -> String {
    "person".into()
}
fn default_alert_transport() -> String {
    "log".into()
}
fn default_cooldown_secs() -> u64 {
    120
}
fn default_send_timeout_secs() -> u64 {
    30
}
fn default_alert_subject() -> String {
    "Alert: Human Detected!".into()
}
fn default_alert_body() -> String {
    "A person has been detected by the surveillance camera.".into()
}
fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_frame_interval_ms() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}
