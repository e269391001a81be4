//! Traffic analysis results.
//!
//! `AnalysisResult` is derived data: it is a pure function of a rendered
//! heatmap plus a detection set and can be recomputed at any time, so it is
//! never stored mutably.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One classified tile of the heatmap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ZoneRegion {
    /// Tile top-left x in heatmap pixels
    pub x: u32,
    /// Tile top-left y in heatmap pixels
    pub y: u32,
    /// Mean density of the tile on the 0-100 scale, rounded to one decimal
    pub density: f64,
}

/// Aggregate for one traffic bucket.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TrafficZone {
    /// Share of the whole image covered by this bucket, percent rounded to
    /// one decimal
    pub percentage: f64,
    /// Every tile classified into this bucket
    pub regions: Vec<ZoneRegion>,
}

/// The three mutually exclusive traffic buckets.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TrafficAreas {
    pub high: TrafficZone,
    pub medium: TrafficZone,
    pub low: TrafficZone,
}

/// One busiest time bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PeakWindow {
    /// Bin start, minutes from video start
    pub start_minute: u32,
    /// Bin end, minutes from video start
    pub end_minute: u32,
    /// Detections falling into the bin
    pub count: usize,
}

/// Complete traffic report for one heatmap + detection set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisResult {
    /// Zoned traffic shares
    pub areas: TrafficAreas,
    /// Rule-based recommendations; zero or more may fire
    pub recommendations: Vec<String>,
    /// Busiest time bins (all ties reported); empty without timestamps
    pub peak_hours: Vec<PeakWindow>,
    /// Distinct track ids across the supplied detections
    pub total_visitors: usize,
}
