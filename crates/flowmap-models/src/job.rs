//! Job record and lifecycle status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::window::TimeWindow;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a job.
///
/// Transitions only follow `pending -> processing -> {completed, error,
/// cancelled}`. The three outcome states are terminal: once a job reaches
/// one, no further transition is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for a worker
    #[default]
    Pending,
    /// A worker is running the stages
    Processing,
    /// All stages finished, results are servable
    Completed,
    /// A stage failed, message carries the cause
    Error,
    /// Cancellation was observed before completion
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Parse from the stored string form. Unknown strings map to `Pending`
    /// so a corrupted row is recoverable by the orphan sweep.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "processing" => JobStatus::Processing,
            "completed" => JobStatus::Completed,
            "error" => JobStatus::Error,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of one heatmap job.
///
/// Output artifact names are present only once the corresponding stage has
/// produced them; downstream readers must only trust them when `status` is
/// `Completed`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,

    /// Owning user
    pub user: String,

    /// Uploaded source video file name (within the job's upload folder)
    pub input_video: String,

    /// Reference (floor plan) image file name
    pub input_reference: String,

    /// Current lifecycle status
    #[serde(default)]
    pub status: JobStatus,

    /// Human-readable progress/result message, overwritten on every transition
    pub message: String,

    /// Annotated video file name, once produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_video: Option<String>,

    /// Blended heatmap image file name, once produced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_heatmap: Option<String>,

    /// Optional restriction on which detections are considered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Create a new pending job record.
    pub fn new(
        user: impl Into<String>,
        input_video: impl Into<String>,
        input_reference: impl Into<String>,
        time_window: Option<TimeWindow>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user: user.into(),
            input_video: input_video.into(),
            input_reference: input_reference.into(),
            status: JobStatus::Pending,
            message: "Job submitted, awaiting processing.".to_string(),
            output_video: None,
            output_heatmap: None,
            time_window,
            created_at: now,
            updated_at: now,
        }
    }
}
