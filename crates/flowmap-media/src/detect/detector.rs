//! Person detection using a YOLOv8 ONNX model.

use std::path::Path;
use std::sync::Mutex;

use image::{imageops::FilterType, DynamicImage, RgbImage};
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use flowmap_models::PixelRect;

use crate::error::{MediaError, MediaResult};

/// COCO class id for "person".
const PERSON_CLASS: usize = 0;

/// Configuration for person detection.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the YOLOv8 ONNX model file
    pub model_path: String,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Model input size (square)
    pub input_size: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.5,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// Person detector backed by ONNX Runtime.
///
/// Only person-class candidates survive postprocessing; bounding boxes come
/// back in source-image pixel coordinates.
#[derive(Debug)]
pub struct PersonDetector {
    session: Mutex<Session>,
    config: DetectorConfig,
}

impl PersonDetector {
    /// Load the model. Fails if the model file is missing or unreadable.
    pub fn new(config: DetectorConfig) -> MediaResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(MediaError::model_not_found(&config.model_path));
        }

        let model_bytes = std::fs::read(model_path)
            .map_err(|e| MediaError::internal(format!("Failed to read model file: {}", e)))?;

        let session = Session::builder()
            .map_err(|e| MediaError::internal(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| MediaError::internal(format!("Failed to set optimization level: {}", e)))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| MediaError::internal(format!("Failed to load ONNX model: {}", e)))?;

        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "Person detector initialized"
        );

        Ok(Self {
            session: Mutex::new(session),
            config,
        })
    }

    /// Detect persons in one frame.
    ///
    /// Returns `(bbox, confidence)` pairs with boxes in pixel coordinates
    /// of the supplied frame.
    pub fn detect(&self, frame: &RgbImage) -> MediaResult<Vec<(PixelRect, f32)>> {
        let (width, height) = frame.dimensions();
        let input = self.preprocess(frame)?;
        let outputs = self.run_inference(input)?;
        let detections = self.postprocess(&outputs, width, height)?;

        debug!(count = detections.len(), "Person detection completed");

        Ok(detections)
    }

    /// Preprocess: resize to the square input size, normalize to [0, 1],
    /// convert HWC -> NCHW.
    fn preprocess(&self, frame: &RgbImage) -> MediaResult<Value> {
        let size = self.config.input_size;
        let resized = DynamicImage::ImageRgb8(frame.clone())
            .resize_exact(size, size, FilterType::Triangle)
            .to_rgb8();

        let (w, h) = (size as usize, size as usize);
        let mut chw_data: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw_data.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw_data.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| MediaError::internal(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> MediaResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| MediaError::internal("Session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| MediaError::detection_failed(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| MediaError::detection_failed("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| MediaError::detection_failed(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }

    /// Postprocess the YOLOv8 `[1, 84, 8400]` output: person-class filter,
    /// confidence threshold, scale back to source pixels, NMS.
    fn postprocess(
        &self,
        outputs: &[f32],
        orig_width: u32,
        orig_height: u32,
    ) -> MediaResult<Vec<(PixelRect, f32)>> {
        let num_features = 84;
        let num_boxes = 8400;

        if outputs.len() != num_features * num_boxes {
            return Err(MediaError::detection_failed(format!(
                "Unexpected output size: expected {}, got {}",
                num_features * num_boxes,
                outputs.len()
            )));
        }

        let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
            .map_err(|e| MediaError::detection_failed(format!("Failed to reshape output: {}", e)))?;
        let transposed = output_array.t();

        let input_size = self.config.input_size as f32;
        let scale_w = orig_width as f32 / input_size;
        let scale_h = orig_height as f32 / input_size;

        let mut candidates: Vec<(PixelRect, f32)> = Vec::new();

        for i in 0..num_boxes {
            let score = transposed[[i, 4 + PERSON_CLASS]];
            if score < self.config.confidence_threshold {
                continue;
            }

            // cx, cy, w, h in model input coordinates
            let cx = transposed[[i, 0]];
            let cy = transposed[[i, 1]];
            let w = transposed[[i, 2]];
            let h = transposed[[i, 3]];

            let x1 = ((cx - w / 2.0) * scale_w).clamp(0.0, orig_width as f32);
            let y1 = ((cy - h / 2.0) * scale_h).clamp(0.0, orig_height as f32);
            let x2 = ((cx + w / 2.0) * scale_w).clamp(0.0, orig_width as f32);
            let y2 = ((cy + h / 2.0) * scale_h).clamp(0.0, orig_height as f32);

            candidates.push((PixelRect::new(x1, y1, x2, y2), score));
        }

        Ok(non_maximum_suppression(candidates, self.config.nms_threshold))
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}

/// Greedy NMS: keep highest-confidence boxes, suppress overlaps.
fn non_maximum_suppression(
    mut candidates: Vec<(PixelRect, f32)>,
    iou_threshold: f32,
) -> Vec<(PixelRect, f32)> {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(PixelRect, f32)> = Vec::new();
    for (bbox, score) in candidates {
        if keep.iter().all(|(kept, _)| kept.iou(&bbox) <= iou_threshold) {
            keep.push((bbox, score));
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = DetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.confidence_threshold - 0.5).abs() < 1e-6);
        assert!((config.nms_threshold - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_missing_model_is_reported() {
        let err = PersonDetector::new(DetectorConfig {
            model_path: "/nonexistent/model.onnx".into(),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, MediaError::ModelNotFound(_)));
    }

    #[test]
    fn test_nms_suppresses_overlaps() {
        let a = (PixelRect::new(0.0, 0.0, 10.0, 10.0), 0.9);
        let b = (PixelRect::new(1.0, 1.0, 11.0, 11.0), 0.8);
        let c = (PixelRect::new(100.0, 100.0, 110.0, 110.0), 0.7);

        let kept = non_maximum_suppression(vec![a, b, c], 0.45);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].1 - 0.9).abs() < 1e-6);
        assert!((kept[1].1 - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_distinct_boxes() {
        let boxes = vec![
            (PixelRect::new(0.0, 0.0, 10.0, 10.0), 0.6),
            (PixelRect::new(50.0, 50.0, 60.0, 60.0), 0.9),
        ];
        let kept = non_maximum_suppression(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        // Sorted by confidence
        assert!((kept[0].1 - 0.9).abs() < 1e-6);
    }
}
