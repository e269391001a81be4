//! The traffic analysis engine.
//!
//! A pure function of a rendered heatmap plus detections: zoned traffic
//! shares, rule-based recommendations, peak time windows, visitor count.
//! Safe to recompute on demand, including for time-windowed "custom"
//! requests.

use std::collections::HashSet;
use std::path::Path;

use ndarray::Array2;

use flowmap_models::{AnalysisResult, Detection, PeakWindow, ZoneRegion};

use crate::error::{MediaError, MediaResult};

/// Mean tile density at or above this is high traffic.
pub const HIGH_THRESHOLD: f64 = 70.0;
/// Mean tile density at or above this (below high) is medium traffic.
pub const MEDIUM_THRESHOLD: f64 = 40.0;
/// Mean tile density at or above this (below medium) is low traffic;
/// tiles below are unclassified.
pub const LOW_THRESHOLD: f64 = 20.0;

/// Square tile edge length in pixels; edge tiles are clipped to bounds.
pub const REGION_SIZE: usize = 50;

/// Width of one peak-hour bin in minutes.
pub const PEAK_BIN_MINUTES: u32 = 5;

const REDISTRIBUTE_RECOMMENDATION: &str =
    "Consider redistributing traffic from high-density areas to improve customer flow";
const DEMAND_RECOMMENDATION: &str =
    "Implement strategies to increase traffic in low-density areas";
const BALANCE_RECOMMENDATION: &str =
    "Optimize store layout to create more balanced traffic distribution";

/// Analyze a rendered single-channel heatmap together with the detections
/// that produced it.
///
/// `fps` gates the peak-hour analysis: a non-positive frame rate (no
/// timing information) yields empty peak hours, like an empty detection
/// list does.
pub fn analyze_heatmap(heatmap: &Array2<f32>, detections: &[Detection], fps: f64) -> AnalysisResult {
    let normalized = normalize_0_100(heatmap);
    let (height, width) = normalized.dim();
    let total_pixels = (height * width) as f64;

    let mut result = AnalysisResult::default();
    let mut high_pixels = 0usize;
    let mut medium_pixels = 0usize;
    let mut low_pixels = 0usize;

    let mut y = 0;
    while y < height {
        let y_end = (y + REGION_SIZE).min(height);
        let mut x = 0;
        while x < width {
            let x_end = (x + REGION_SIZE).min(width);

            let tile = normalized.slice(ndarray::s![y..y_end, x..x_end]);
            let mean = tile.iter().map(|v| *v as f64).sum::<f64>() / tile.len() as f64;

            let region = ZoneRegion {
                x: x as u32,
                y: y as u32,
                density: round1(mean),
            };

            // Mutually exclusive buckets, evaluated high to low; tiles
            // below the low threshold stay unclassified.
            if mean >= HIGH_THRESHOLD {
                high_pixels += tile.len();
                result.areas.high.regions.push(region);
            } else if mean >= MEDIUM_THRESHOLD {
                medium_pixels += tile.len();
                result.areas.medium.regions.push(region);
            } else if mean >= LOW_THRESHOLD {
                low_pixels += tile.len();
                result.areas.low.regions.push(region);
            }

            x = x_end;
        }
        y = y_end;
    }

    result.areas.high.percentage = percentage(high_pixels, total_pixels);
    result.areas.medium.percentage = percentage(medium_pixels, total_pixels);
    result.areas.low.percentage = percentage(low_pixels, total_pixels);

    // Each rule fires independently; zero, one, or many may apply.
    if result.areas.high.percentage > 30.0 {
        result
            .recommendations
            .push(REDISTRIBUTE_RECOMMENDATION.to_string());
    }
    if result.areas.low.percentage > 40.0 {
        result.recommendations.push(DEMAND_RECOMMENDATION.to_string());
    }
    if result.areas.medium.percentage < 30.0 {
        result.recommendations.push(BALANCE_RECOMMENDATION.to_string());
    }

    if !detections.is_empty() && fps > 0.0 {
        result.peak_hours = analyze_peak_hours(detections, PEAK_BIN_MINUTES);
    }

    result.total_visitors = detections
        .iter()
        .map(|d| d.track_id)
        .collect::<HashSet<_>>()
        .len();

    result
}

/// Bucket detection timestamps into fixed-width bins and report the
/// busiest bin(s); ties are all reported, in ascending bin order.
pub fn analyze_peak_hours(detections: &[Detection], bin_minutes: u32) -> Vec<PeakWindow> {
    if detections.is_empty() {
        return Vec::new();
    }

    let bin_seconds = (bin_minutes * 60) as f64;
    let max_time = detections
        .iter()
        .map(|d| d.timestamp)
        .fold(f64::NEG_INFINITY, f64::max);
    let num_bins = (max_time / bin_seconds).floor() as usize + 1;

    let mut bins = vec![0usize; num_bins];
    for detection in detections {
        let idx = (detection.timestamp / bin_seconds).floor() as usize;
        bins[idx.min(num_bins - 1)] += 1;
    }

    let peak_count = *bins.iter().max().unwrap_or(&0);

    bins.iter()
        .enumerate()
        .filter(|(_, count)| **count == peak_count)
        .map(|(idx, count)| PeakWindow {
            start_minute: idx as u32 * bin_minutes,
            end_minute: (idx as u32 + 1) * bin_minutes,
            count: *count,
        })
        .collect()
}

/// Load a rendered heatmap image back as a single-channel raster for
/// recomputation.
pub fn load_heatmap_gray(path: impl AsRef<Path>) -> MediaResult<Array2<f32>> {
    let path = path.as_ref();
    let gray = image::open(path)
        .map_err(|e| MediaError::image_load(path, e.to_string()))?
        .to_luma8();

    let (width, height) = gray.dimensions();
    let mut raster = Array2::<f32>::zeros((height as usize, width as usize));
    for (x, y, pixel) in gray.enumerate_pixels() {
        raster[(y as usize, x as usize)] = pixel[0] as f32;
    }
    Ok(raster)
}

/// Min-max normalize onto the 0-100 density scale; a constant input maps
/// to all zeros.
fn normalize_0_100(values: &Array2<f32>) -> Array2<f32> {
    let min = values.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = values.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    if !(max > min) {
        return Array2::zeros(values.raw_dim());
    }

    let scale = 100.0 / (max - min);
    values.mapv(|v| (v - min) * scale)
}

fn percentage(pixels: usize, total_pixels: f64) -> f64 {
    round1(pixels as f64 / total_pixels * 100.0)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
