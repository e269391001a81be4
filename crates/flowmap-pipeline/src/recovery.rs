//! Startup orphan recovery.
//!
//! A crash-recovery sweep, not a resume: jobs a prior process abandoned
//! mid-flight are forced to `error`, and their partial artifacts are not
//! reused.

use metrics::counter;
use tracing::{info, warn};

use flowmap_models::JobStatus;
use flowmap_store::JobStore;

use crate::error::PipelineResult;
use crate::state::JobTable;

/// Message distinguishing interrupted jobs from ordinary failures.
pub const INTERRUPTED_MESSAGE: &str =
    "Error during processing: interrupted by server restart before completion";

/// Force every stored non-terminal job with no attached worker to `error`.
///
/// Run once at process startup, before any new submissions; returns the
/// number of jobs recovered.
pub async fn recover_orphans(store: &JobStore, table: &JobTable) -> PipelineResult<usize> {
    let orphans = store.find_non_terminal().await?;

    let mut recovered = 0usize;
    for job in orphans {
        // A job with a live worker in this process is not an orphan.
        if table.contains(&job.id) {
            continue;
        }

        warn!(
            job_id = %job.id,
            status = %job.status,
            "Found orphaned job from a previous run"
        );

        if store
            .mark_terminal(&job.id, JobStatus::Error, INTERRUPTED_MESSAGE)
            .await?
        {
            recovered += 1;
            counter!("flowmap_jobs_recovered_total").increment(1);
        }
    }

    if recovered > 0 {
        info!("Orphan sweep recovered {} abandoned jobs", recovered);
    }

    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmap_models::JobRecord;
    use flowmap_store::JobUpdate;

    #[tokio::test]
    async fn test_orphans_are_forced_to_error() {
        let store = JobStore::open_in_memory().await.unwrap();
        let table = JobTable::new();

        let pending = JobRecord::new("u", "a.mp4", "a.jpg", None);
        let processing = JobRecord::new("u", "b.mp4", "b.jpg", None);
        let done = JobRecord::new("u", "c.mp4", "c.jpg", None);

        store.create(&pending).await.unwrap();
        store.create(&processing).await.unwrap();
        store.create(&done).await.unwrap();

        store
            .update(&processing.id, &JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        store
            .mark_terminal(&done.id, JobStatus::Completed, "done")
            .await
            .unwrap();

        let recovered = recover_orphans(&store, &table).await.unwrap();
        assert_eq!(recovered, 2);

        for job_id in [&pending.id, &processing.id] {
            let job = store.get(job_id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Error);
            assert_eq!(job.message, INTERRUPTED_MESSAGE);
        }

        // Terminal jobs are untouched
        let job = store.get(&done.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_jobs_with_live_workers_are_skipped() {
        let store = JobStore::open_in_memory().await.unwrap();
        let table = JobTable::new();

        let live = JobRecord::new("u", "a.mp4", "a.jpg", None);
        store.create(&live).await.unwrap();
        table.insert(live.id.clone(), "queued");

        let recovered = recover_orphans(&store, &table).await.unwrap();
        assert_eq!(recovered, 0);

        let job = store.get(&live.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
    }
}
