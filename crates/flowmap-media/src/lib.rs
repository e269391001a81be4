//! Detection, heatmap synthesis and traffic analysis engines.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building and rawvideo frame piping
//! - Person detection (YOLOv8 ONNX) with IoU track assignment
//! - Heatmap accumulation, colorization and alpha blending
//! - Pure traffic analysis (zoning, recommendations, peak windows)

pub mod analysis;
pub mod command;
pub mod detect;
pub mod draw;
pub mod error;
pub mod frames;
pub mod heatmap;
pub mod probe;

pub use analysis::{analyze_heatmap, load_heatmap_gray};
pub use command::{check_ffmpeg, check_ffprobe, extract_first_frame, FfmpegCommand};
pub use detect::{detect_and_track, DetectionOutput, DetectorConfig, PersonDetector};
pub use error::{MediaError, MediaResult};
pub use frames::{FrameReader, FrameWriter};
pub use heatmap::{
    render_annotated_video, render_blended_image, synthesize_heatmap, HeatmapRequest,
};
pub use probe::{probe_video, VideoInfo};

use std::sync::Arc;

/// Fractional progress callback (`0.0..=1.0`).
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Pull-based cancellation check; engines poll it at least once per
/// processed frame (or stamped detection) and stop promptly when it
/// returns true.
pub type CancelFn = Arc<dyn Fn() -> bool + Send + Sync>;
