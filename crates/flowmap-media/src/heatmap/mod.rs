//! Heatmap synthesis.
//!
//! Turns a detection list plus a reference (floor plan) image into a
//! blended density image, and independently re-renders the source video
//! with detection overlays.

mod annotate;
mod blur;
mod colormap;
mod raster;
mod synth;

pub use annotate::render_annotated_video;
pub use blur::gaussian_blur;
pub use colormap::turbo;
pub use raster::AccumulationRaster;
pub use synth::{render_blended_image, synthesize_heatmap, HeatmapRequest};

/// Radius in pixels of the presence disk stamped per detection.
pub const STAMP_RADIUS: u32 = 20;

/// Gamma exponent compressing dynamic range before color mapping.
pub const GAMMA: f32 = 0.6;

/// Gaussian blur sigma removing disk-edge artifacts.
pub const BLUR_SIGMA: f32 = 10.0;

/// Maximum opacity of the heatmap overlay when compositing.
pub const MAX_ALPHA: f32 = 0.7;
