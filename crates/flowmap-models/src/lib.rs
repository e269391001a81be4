//! Shared data models for the Flowmap backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Person detections and tracked bounding boxes
//! - Traffic analysis results (zones, recommendations, peak windows)
//! - Submission requests and calibration input

pub mod analysis;
pub mod detection;
pub mod job;
pub mod rect;
pub mod submit;
pub mod window;

// Re-export common types
pub use analysis::{AnalysisResult, PeakWindow, TrafficAreas, TrafficZone, ZoneRegion};
pub use detection::{Detection, DetectionSet};
pub use job::{JobId, JobRecord, JobStatus};
pub use rect::PixelRect;
pub use submit::{
    CalibrationPoints, SubmitRequest, ALLOWED_IMAGE_EXTENSIONS, ALLOWED_VIDEO_EXTENSIONS,
};
pub use window::TimeWindow;
