use std::path::Path;
use std::time::Instant;

use image::imageops::FilterType;
use image::RgbImage;
use tract_onnx::prelude::*;
use watchpost_common::frame::{BoundingBox, Detection, DetectionResult, RawFrame};

use super::postprocess::filter_detections;
use super::{DetectError, Detector, InferenceParams};

/// YOLOv8-style ONNX detector running on tract.
///
/// Expects a `[1, 3, S, S]` f32 input in RGB order scaled to `[0, 1]` and a
/// `[1, 4 + classes, anchors]` output whose first four rows are box centre
/// x, centre y, width and height in input pixels.
pub struct TractDetector {
    model: TypedSimplePlan<TypedModel>,
    input_size: u32,
}

impl TractDetector {
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self, DetectError> {
        let model_path = model_path.as_ref();
        let size = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .map_err(|e| DetectError::Load(format!("{}: {e}", model_path.display())))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
            )
            .map_err(|e| DetectError::Load(e.to_string()))?
            .into_optimized()
            .map_err(|e| DetectError::Load(e.to_string()))?
            .into_runnable()
            .map_err(|e| DetectError::Load(e.to_string()))?;
        Ok(Self { model, input_size })
    }

    fn build_input(&self, frame: &RawFrame) -> Result<Tensor, DetectError> {
        let rgb = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb().into_owned())
            .ok_or_else(|| DetectError::Input("frame buffer does not match its dimensions".into()))?;
        let resized =
            image::imageops::resize(&rgb, self.input_size, self.input_size, FilterType::Triangle);
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }
}

impl Detector for TractDetector {
    fn infer(
        &mut self,
        frame: &RawFrame,
        params: &InferenceParams,
    ) -> Result<DetectionResult, DetectError> {
        let started = Instant::now();
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let output = outputs
            .first()
            .ok_or_else(|| DetectError::Inference("model produced no outputs".into()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let shape = view.shape().to_vec();
        let view = view
            .into_dimensionality::<tract_ndarray::Ix3>()
            .map_err(|_| DetectError::Inference(format!("unexpected output shape {shape:?}")))?;
        let (rows, anchors) = (shape[1], shape[2]);
        if rows <= 4 {
            return Err(DetectError::Inference(format!(
                "output has no class rows: {shape:?}"
            )));
        }
        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for a in 0..anchors {
            let (class_id, score) = (4..rows)
                .map(|r| (r - 4, view[[0, r, a]]))
                .fold((0, f32::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best });
            if score < params.confidence_threshold {
                continue;
            }
            let (cx, cy) = (view[[0, 0, a]], view[[0, 1, a]]);
            let (w, h) = (view[[0, 2, a]], view[[0, 3, a]]);
            candidates.push(Detection {
                class_id: class_id as u32,
                score,
                bbox: BoundingBox {
                    x1: ((cx - w / 2.0) * sx).max(0.0),
                    y1: ((cy - h / 2.0) * sy).max(0.0),
                    x2: ((cx + w / 2.0) * sx).min(frame.width as f32),
                    y2: ((cy + h / 2.0) * sy).min(frame.height as f32),
                },
            });
        }

        Ok(DetectionResult {
            detections: filter_detections(candidates, params),
            inference_time: started.elapsed(),
        })
    }

    fn name(&self) -> &str {
        "tract"
    }
}
