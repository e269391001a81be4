//! Durable job records and artifact layout.
//!
//! The job store is a SQLite table keyed by job id; it is the source of
//! truth for status recovery after restart. Artifact files live in
//! per-job upload and result folders next to the database.

pub mod artifacts;
pub mod error;
pub mod jobs;

pub use artifacts::ArtifactLayout;
pub use error::{StoreError, StoreResult};
pub use jobs::{JobStore, JobUpdate};
