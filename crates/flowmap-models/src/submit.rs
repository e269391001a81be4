//! Job submission request and calibration input.
//!
//! Validation here covers everything that must be rejected synchronously at
//! submission, before any worker starts: point count, file types, window
//! shape. Duration-dependent window checks happen at submission time too,
//! but need a probe of the video and therefore live with the pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::window::TimeWindow;

/// Video container extensions accepted at submission.
pub const ALLOWED_VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov"];

/// Reference image extensions accepted at submission.
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("expected exactly 4 calibration points, got {0}")]
    WrongPointCount(usize),
}

/// The four reference points mapping the camera view onto the floor plan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CalibrationPoints {
    /// Points as `[x, y]` pixel pairs, in submission order
    pub points: [[f32; 2]; 4],
}

impl CalibrationPoints {
    pub fn new(points: [[f32; 2]; 4]) -> Self {
        Self { points }
    }

    /// Build from a freely sized slice, rejecting anything but 4 points.
    pub fn from_slice(points: &[[f32; 2]]) -> Result<Self, CalibrationError> {
        let fixed: [[f32; 2]; 4] = points
            .try_into()
            .map_err(|_| CalibrationError::WrongPointCount(points.len()))?;
        Ok(Self { points: fixed })
    }
}

/// One end-to-end processing request as received from the boundary layer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Validate)]
pub struct SubmitRequest {
    /// Submitting user
    #[validate(length(min = 1))]
    pub user: String,

    /// Path to the uploaded source video
    #[validate(custom(function = validate_video_extension))]
    pub video_path: String,

    /// Path to the reference (floor plan) image. When absent, the first
    /// video frame is extracted and used instead.
    #[validate(custom(function = validate_image_extension))]
    pub reference_image_path: Option<String>,

    /// The 4-point calibration
    #[validate(length(equal = 4, message = "exactly 4 calibration points required"))]
    pub calibration_points: Vec<[f32; 2]>,

    /// Optional restriction on which detections are considered
    pub time_window: Option<TimeWindow>,
}

fn extension_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn validate_video_extension(path: &str) -> Result<(), ValidationError> {
    match extension_of(path) {
        Some(ext) if ALLOWED_VIDEO_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ValidationError::new("disallowed_video_type")),
    }
}

fn validate_image_extension(path: &str) -> Result<(), ValidationError> {
    match extension_of(path) {
        Some(ext) if ALLOWED_IMAGE_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(ValidationError::new("disallowed_image_type")),
    }
}
