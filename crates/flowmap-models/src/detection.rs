//! Tracked person detections.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::rect::PixelRect;
use crate::window::TimeWindow;

/// One tracked-person observation in one video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    /// Zero-based frame index within the source video
    pub frame: u32,

    /// Bounding box in source-video pixel coordinates
    pub bbox: PixelRect,

    /// Stable per-person identifier, unique within one video
    pub track_id: u32,

    /// Seconds from video start (`frame / fps`)
    pub timestamp: f64,
}

impl Detection {
    pub fn new(frame: u32, bbox: PixelRect, track_id: u32, timestamp: f64) -> Self {
        Self {
            frame,
            bbox,
            track_id,
            timestamp,
        }
    }
}

/// The persisted output of the detection stage: every detection of one
/// video plus the video's frame rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionSet {
    /// Frames per second of the source video
    pub fps: f64,

    /// All confirmed detections, in frame order
    pub detections: Vec<Detection>,
}

impl DetectionSet {
    pub fn new(fps: f64, detections: Vec<Detection>) -> Self {
        Self { fps, detections }
    }

    /// Detections whose timestamps fall inside `window`, preserving order.
    pub fn within_window(&self, window: &TimeWindow) -> Vec<Detection> {
        self.detections
            .iter()
            .filter(|d| window.contains(d.timestamp))
            .cloned()
            .collect()
    }
}
