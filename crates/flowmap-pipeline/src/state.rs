//! In-memory pipeline state.
//!
//! The job table and the analysis-progress map are owned by the pipeline
//! component and shared behind locks; nothing here is ambient global
//! state. The cancel flag is the only field written from outside a job's
//! worker, so it is an atomic the boundary layer can set without taking
//! the table lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use flowmap_models::{JobId, JobStatus};

/// Set-once, monotonic cancellation flag for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    requested: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Once set the flag never resets.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Adapt to the pull-based check the media engines poll.
    pub fn as_cancel_fn(&self) -> flowmap_media::CancelFn {
        let flag = self.clone();
        Arc::new(move || flag.is_requested())
    }
}

/// Live in-memory state of one job.
#[derive(Debug, Clone)]
struct JobHandle {
    status: JobStatus,
    message: String,
    cancel: CancelFlag,
}

/// Pipeline-owned table of live and recently finished jobs.
///
/// Status and message are mutated only by the job's worker; the boundary
/// layer reads snapshots and sets the cancel flag. Terminal entries stay
/// readable until the job is deleted.
#[derive(Clone, Default)]
pub struct JobTable {
    inner: Arc<RwLock<HashMap<JobId, JobHandle>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submitted job and hand back its cancel flag.
    pub fn insert(&self, job_id: JobId, message: impl Into<String>) -> CancelFlag {
        let cancel = CancelFlag::new();
        let handle = JobHandle {
            status: JobStatus::Pending,
            message: message.into(),
            cancel: cancel.clone(),
        };
        self.inner
            .write()
            .expect("job table lock poisoned")
            .insert(job_id, handle);
        cancel
    }

    /// Worker-side status/message update. Ignores unknown jobs and never
    /// overwrites a terminal status.
    pub fn set_status(&self, job_id: &JobId, status: JobStatus, message: impl Into<String>) {
        let mut table = self.inner.write().expect("job table lock poisoned");
        if let Some(handle) = table.get_mut(job_id) {
            if handle.status.is_terminal() {
                return;
            }
            handle.status = status;
            handle.message = message.into();
        }
    }

    /// Worker-side message-only update.
    pub fn set_message(&self, job_id: &JobId, message: impl Into<String>) {
        let mut table = self.inner.write().expect("job table lock poisoned");
        if let Some(handle) = table.get_mut(job_id) {
            if handle.status.is_terminal() {
                return;
            }
            handle.message = message.into();
        }
    }

    /// Status/message snapshot for polls.
    pub fn snapshot(&self, job_id: &JobId) -> Option<(JobStatus, String)> {
        self.inner
            .read()
            .expect("job table lock poisoned")
            .get(job_id)
            .map(|h| (h.status, h.message.clone()))
    }

    /// The cancel flag of a live job.
    pub fn cancel_flag(&self, job_id: &JobId) -> Option<CancelFlag> {
        self.inner
            .read()
            .expect("job table lock poisoned")
            .get(job_id)
            .map(|h| h.cancel.clone())
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.inner
            .read()
            .expect("job table lock poisoned")
            .contains_key(job_id)
    }

    pub fn remove(&self, job_id: &JobId) {
        self.inner
            .write()
            .expect("job table lock poisoned")
            .remove(job_id);
    }
}

/// Fractional progress of windowed analysis regenerations, keyed by job.
///
/// Entries appear when a regeneration starts, reach 1.0 on completion and
/// are removed when the job is deleted.
#[derive(Clone, Default)]
pub struct ProgressMap {
    inner: Arc<RwLock<HashMap<JobId, f64>>>,
}

impl ProgressMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, job_id: &JobId, progress: f64) {
        self.inner
            .write()
            .expect("progress map lock poisoned")
            .insert(job_id.clone(), progress.clamp(0.0, 1.0));
    }

    /// Progress in [0, 1]; 0.0 for unknown jobs.
    pub fn get(&self, job_id: &JobId) -> f64 {
        self.inner
            .read()
            .expect("progress map lock poisoned")
            .get(job_id)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn remove(&self, job_id: &JobId) {
        self.inner
            .write()
            .expect("progress map lock poisoned")
            .remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_monotonic() {
        let flag = CancelFlag::new();
        assert!(!flag.is_requested());
        flag.request();
        flag.request();
        assert!(flag.is_requested());
    }

    #[test]
    fn test_table_snapshot_and_update() {
        let table = JobTable::new();
        let job_id = JobId::new();
        table.insert(job_id.clone(), "queued");

        assert_eq!(
            table.snapshot(&job_id),
            Some((JobStatus::Pending, "queued".to_string()))
        );

        table.set_status(&job_id, JobStatus::Processing, "running");
        assert_eq!(
            table.snapshot(&job_id),
            Some((JobStatus::Processing, "running".to_string()))
        );
    }

    #[test]
    fn test_terminal_status_sticks_in_memory() {
        let table = JobTable::new();
        let job_id = JobId::new();
        table.insert(job_id.clone(), "queued");

        table.set_status(&job_id, JobStatus::Cancelled, "Job was cancelled by user.");
        table.set_status(&job_id, JobStatus::Completed, "done");
        table.set_message(&job_id, "late progress");

        let (status, message) = table.snapshot(&job_id).unwrap();
        assert_eq!(status, JobStatus::Cancelled);
        assert_eq!(message, "Job was cancelled by user.");
    }

    #[test]
    fn test_cancel_flag_shared_with_table() {
        let table = JobTable::new();
        let job_id = JobId::new();
        let flag = table.insert(job_id.clone(), "queued");

        table.cancel_flag(&job_id).unwrap().request();
        assert!(flag.is_requested());
    }

    #[test]
    fn test_progress_map_lifecycle() {
        let map = ProgressMap::new();
        let job_id = JobId::new();

        assert_eq!(map.get(&job_id), 0.0);
        map.set(&job_id, 0.5);
        assert_eq!(map.get(&job_id), 0.5);
        map.set(&job_id, 2.0);
        assert_eq!(map.get(&job_id), 1.0);
        map.remove(&job_id);
        assert_eq!(map.get(&job_id), 0.0);
    }
}
