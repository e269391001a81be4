//! Time windows restricting which detections are considered.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error building a time window.
#[derive(Debug, Error, PartialEq)]
pub enum TimeWindowError {
    #[error("time window is empty or inverted: start={start}s end={end}s")]
    Empty { start: f64, end: f64 },

    #[error("time window end {end}s exceeds video duration {duration}s")]
    BeyondDuration { end: f64, duration: f64 },
}

/// A closed interval of seconds from video start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    /// Start of the window, seconds from video start
    pub start_secs: f64,

    /// End of the window, seconds from video start
    pub end_secs: f64,
}

impl TimeWindow {
    /// Create a window, rejecting empty or inverted intervals.
    pub fn new(start_secs: f64, end_secs: f64) -> Result<Self, TimeWindowError> {
        if !(end_secs > start_secs) || start_secs < 0.0 {
            return Err(TimeWindowError::Empty {
                start: start_secs,
                end: end_secs,
            });
        }
        Ok(Self {
            start_secs,
            end_secs,
        })
    }

    /// Reject a window extending past the video's duration.
    pub fn check_within(&self, duration_secs: f64) -> Result<(), TimeWindowError> {
        if self.end_secs > duration_secs {
            return Err(TimeWindowError::BeyondDuration {
                end: self.end_secs,
                duration: duration_secs,
            });
        }
        Ok(())
    }

    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// Whether `timestamp` falls inside the window (inclusive bounds).
    pub fn contains(&self, timestamp: f64) -> bool {
        timestamp >= self.start_secs && timestamp <= self.end_secs
    }
}
