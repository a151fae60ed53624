use std::cmp::Ordering;

use watchpost_common::frame::Detection;

use super::InferenceParams;

/// Confidence filter, per-class greedy NMS and top-k cap.
///
/// Output is sorted by descending score and holds at most
/// `params.max_detections` entries.
pub fn filter_detections(mut candidates: Vec<Detection>, params: &InferenceParams) -> Vec<Detection> {
    candidates.retain(|d| d.score >= params.confidence_threshold && d.score.is_finite());
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<Detection> = Vec::new();
    for candidate in candidates {
        if kept.len() >= params.max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > params.iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
