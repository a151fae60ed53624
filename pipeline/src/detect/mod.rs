pub mod labels;
pub mod postprocess;
#[cfg(feature = "backend-tract")]
pub mod tract;

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::info;
use watchpost_common::config::DetectionConfig;
use watchpost_common::frame::{DetectionResult, RawFrame};

/// Fixed inference parameters, taken from configuration at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&DetectionConfig> for InferenceParams {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("failed to load model: {0}")]
    Load(String),
    #[error("invalid model input: {0}")]
    Input(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unknown detection backend '{0}', expected 'none' or 'tract'")]
    UnknownBackend(String),
}

/// Object detector interface.
///
/// Inference is CPU-bound and synchronous; callers run it on a blocking
/// thread. Only one caller uses a detector at a time.
pub trait Detector: Send {
    fn infer(
        &mut self,
        frame: &RawFrame,
        params: &InferenceParams,
    ) -> Result<DetectionResult, DetectError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Detector shared between restarts of the analysis worker.
pub type SharedDetector = Arc<Mutex<Box<dyn Detector>>>;

/// Pass-through detector that never reports objects.
#[derive(Debug, Default)]
pub struct NullDetector;

impl Detector for NullDetector {
    fn infer(
        &mut self,
        _frame: &RawFrame,
        _params: &InferenceParams,
    ) -> Result<DetectionResult, DetectError> {
        let started = Instant::now();
        Ok(DetectionResult {
            detections: Vec::new(),
            inference_time: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Build the detector named by `config.backend`.
pub fn from_config(config: &DetectionConfig) -> Result<Box<dyn Detector>, DetectError> {
    let detector: Box<dyn Detector> = match config.backend.as_str() {
        "none" => Box::new(NullDetector),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let path = config
                .model_path
                .as_deref()
                .ok_or_else(|| DetectError::Load("detection.model_path is not set".into()))?;
            Box::new(tract::TractDetector::load(path, config.input_size)?)
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => {
            return Err(DetectError::Load(
                "built without the backend-tract feature".into(),
            ))
        }
        other => return Err(DetectError::UnknownBackend(other.to_string())),
    };
    info!(backend = detector.name(), "detector ready");
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use watchpost_common::frame::PixelFormat;

    #[test]
    fn null_detector_reports_nothing() {
        let frame = RawFrame::new(vec![0; 12], 2, 2, PixelFormat::Rgb888, 0, 0).unwrap();
        let params = InferenceParams::from(&DetectionConfig::default());
        let result = NullDetector.infer(&frame, &params).unwrap();
        assert!(result.detections.is_empty());
    }

    #[test]
    fn params_follow_config() {
        let params = InferenceParams::from(&DetectionConfig::default());
        assert_eq!(params.confidence_threshold, 0.5);
        assert_eq!(params.iou_threshold, 0.4);
        assert_eq!(params.max_detections, 10);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = DetectionConfig {
            backend: "coreml".into(),
            ..DetectionConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(DetectError::UnknownBackend(_))
        ));
    }
}
