//! Job lifecycle, worker and service facade.
//!
//! One submitted job runs through three ordered stages (detect,
//! synthesize, analyze) on its own spawned worker, with cooperative
//! cancellation checked between and within stages, progress mirrored to
//! the durable store, and exactly one terminal transition.

pub mod config;
pub mod error;
pub mod logging;
pub mod recovery;
pub mod service;
pub mod state;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use logging::JobLogger;
pub use recovery::recover_orphans;
pub use service::{JobArtifacts, JobService, StatusView};
pub use state::{CancelFlag, JobTable, ProgressMap};
