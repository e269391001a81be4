//! Pipeline error types.

use thiserror::Error;

use flowmap_media::MediaError;
use flowmap_store::StoreError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected synchronously at submission, before any worker starts.
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("job not found: {0}")]
    NotFound(String),

    /// Artifact or analysis access for a job that has not completed.
    #[error("job not completed: {0}")]
    NotCompleted(String),

    /// Cooperative cancellation; a distinct terminal outcome, not a failure.
    #[error("job cancelled")]
    Cancelled,

    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(job_id: impl std::fmt::Display) -> Self {
        Self::NotFound(job_id.to_string())
    }

    pub fn not_completed(job_id: impl std::fmt::Display) -> Self {
        Self::NotCompleted(job_id.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this is a cancellation (possibly surfaced through a media
    /// stage) rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled) || matches!(self, Self::Media(m) if m.is_cancelled())
    }
}
