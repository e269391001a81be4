//! SQLite-backed job repository.

use std::path::Path;

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use flowmap_models::{JobId, JobRecord, JobStatus, TimeWindow};

use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    user TEXT NOT NULL,
    input_video TEXT NOT NULL,
    input_reference TEXT NOT NULL,
    status TEXT NOT NULL,
    message TEXT NOT NULL,
    output_video TEXT,
    output_heatmap TEXT,
    window_start_secs REAL,
    window_end_secs REAL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
"#;

/// Partial field update for a job row.
///
/// Absent fields keep their stored value. Updates carrying any field are
/// rejected once the stored status is terminal, so a late worker write can
/// never downgrade a finished job.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub output_video: Option<String>,
    pub output_heatmap: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Repository for job rows.
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (and create if missing) the job database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Job store opened at {}", path.as_ref().display());
        Ok(store)
    }

    /// Open an in-memory store (tests and self-checks).
    pub async fn open_in_memory() -> StoreResult<Self> {
        // A single connection keeps every query on the same memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert a new job row.
    pub async fn create(&self, job: &JobRecord) -> StoreResult<()> {
        debug!(job_id = %job.id, "Inserting job row");

        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, user, input_video, input_reference, status, message,
                              output_video, output_heatmap, window_start_secs, window_end_secs,
                              created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(job.id.as_str())
        .bind(&job.user)
        .bind(&job.input_video)
        .bind(&job.input_reference)
        .bind(job.status.as_str())
        .bind(&job.message)
        .bind(&job.output_video)
        .bind(&job.output_heatmap)
        .bind(job.time_window.map(|w| w.start_secs))
        .bind(job.time_window.map(|w| w.end_secs))
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        counter!("flowmap_store_jobs_created_total").increment(1);
        Ok(())
    }

    /// Fetch a job row by id.
    pub async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Apply a partial update. Returns false when the row was missing or
    /// already terminal (terminal status wins; the write is dropped).
    pub async fn update(&self, job_id: &JobId, update: &JobUpdate) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                status = COALESCE(?1, status),
                message = COALESCE(?2, message),
                output_video = COALESCE(?3, output_video),
                output_heatmap = COALESCE(?4, output_heatmap),
                updated_at = ?5
            WHERE job_id = ?6
              AND status NOT IN ('completed', 'error', 'cancelled')
            "#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(&update.message)
        .bind(&update.output_video)
        .bind(&update.output_heatmap)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write a terminal status. Returns false when another terminal status
    /// was stored first (that one wins).
    pub async fn mark_terminal(
        &self,
        job_id: &JobId,
        status: JobStatus,
        message: &str,
    ) -> StoreResult<bool> {
        debug_assert!(status.is_terminal());

        let result = sqlx::query(
            r#"
            UPDATE jobs SET status = ?1, message = ?2, updated_at = ?3
            WHERE job_id = ?4
              AND status NOT IN ('completed', 'error', 'cancelled')
            "#,
        )
        .bind(status.as_str())
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(job_id.as_str())
        .execute(&self.pool)
        .await?;

        let won = result.rows_affected() > 0;
        if won {
            counter!("flowmap_store_jobs_finished_total", "status" => status.as_str())
                .increment(1);
        }
        Ok(won)
    }

    /// Delete a job row. Returns false when it did not exist.
    pub async fn delete(&self, job_id: &JobId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE job_id = ?1")
            .bind(job_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All jobs of one user, newest first.
    pub async fn list_for_user(&self, user: &str) -> StoreResult<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE user = ?1 ORDER BY created_at DESC")
            .bind(user)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    /// Jobs stuck in a non-terminal status, for the startup orphan sweep.
    pub async fn find_non_terminal(&self) -> StoreResult<Vec<JobRecord>> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE status IN ('pending', 'processing')")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }
}

fn row_to_record(row: &SqliteRow) -> StoreResult<JobRecord> {
    let window = match (
        row.try_get::<Option<f64>, _>("window_start_secs")?,
        row.try_get::<Option<f64>, _>("window_end_secs")?,
    ) {
        (Some(start), Some(end)) => TimeWindow::new(start, end).ok(),
        _ => None,
    };

    let status: String = row.try_get("status")?;

    Ok(JobRecord {
        id: JobId::from_string(row.try_get::<String, _>("job_id")?),
        user: row.try_get("user")?,
        input_video: row.try_get("input_video")?,
        input_reference: row.try_get("input_reference")?,
        status: JobStatus::from_str_lossy(&status),
        message: row.try_get("message")?,
        output_video: row.try_get("output_video")?,
        output_heatmap: row.try_get("output_heatmap")?,
        time_window: window,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}

fn parse_timestamp(row: &SqliteRow, column: &str) -> StoreResult<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::Database(sqlx::Error::Decode(
                format!("invalid timestamp in {}: {}", column, e).into(),
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_job() -> (JobStore, JobRecord) {
        let store = JobStore::open_in_memory().await.unwrap();
        let job = JobRecord::new("user123", "store.mp4", "plan.jpg", None);
        store.create(&job).await.unwrap();
        (store, job)
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() {
        let (store, job) = store_with_job().await;

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.input_video, "store.mp4");
        assert!(fetched.output_heatmap.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let store = JobStore::open_in_memory().await.unwrap();
        assert!(store.get(&JobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_update() {
        let (store, job) = store_with_job().await;

        let applied = store
            .update(
                &job.id,
                &JobUpdate::status(JobStatus::Processing).with_message("Detecting people (40%)"),
            )
            .await
            .unwrap();
        assert!(applied);

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Processing);
        assert_eq!(fetched.message, "Detecting people (40%)");
        // Untouched fields survive
        assert_eq!(fetched.input_reference, "plan.jpg");
    }

    #[tokio::test]
    async fn test_terminal_status_wins() {
        let (store, job) = store_with_job().await;

        assert!(store
            .mark_terminal(&job.id, JobStatus::Cancelled, "Job was cancelled by user.")
            .await
            .unwrap());

        // A late worker write must not resurrect the job
        let applied = store
            .update(
                &job.id,
                &JobUpdate::status(JobStatus::Processing).with_message("late write"),
            )
            .await
            .unwrap();
        assert!(!applied);

        // Nor may a second terminal write replace the first
        assert!(!store
            .mark_terminal(&job.id, JobStatus::Completed, "done")
            .await
            .unwrap());

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Cancelled);
        assert_eq!(fetched.message, "Job was cancelled by user.");
    }

    #[tokio::test]
    async fn test_list_for_user_newest_first() {
        let store = JobStore::open_in_memory().await.unwrap();

        let mut first = JobRecord::new("user123", "a.mp4", "a.jpg", None);
        first.created_at = Utc::now() - chrono::Duration::seconds(60);
        let second = JobRecord::new("user123", "b.mp4", "b.jpg", None);
        let other = JobRecord::new("someone-else", "c.mp4", "c.jpg", None);

        store.create(&first).await.unwrap();
        store.create(&second).await.unwrap();
        store.create(&other).await.unwrap();

        let jobs = store.list_for_user("user123").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, second.id);
        assert_eq!(jobs[1].id, first.id);
    }

    #[tokio::test]
    async fn test_find_non_terminal() {
        let (store, job) = store_with_job().await;

        let stuck = JobRecord::new("user123", "d.mp4", "d.jpg", None);
        store.create(&stuck).await.unwrap();
        store
            .update(&stuck.id, &JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();

        store
            .mark_terminal(&job.id, JobStatus::Completed, "done")
            .await
            .unwrap();

        let orphans = store.find_non_terminal().await.unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, stuck.id);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, job) = store_with_job().await;
        assert!(store.delete(&job.id).await.unwrap());
        assert!(!store.delete(&job.id).await.unwrap());
        assert!(store.get(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_time_window_round_trip() {
        let store = JobStore::open_in_memory().await.unwrap();
        let window = TimeWindow::new(10.0, 90.0).unwrap();
        let job = JobRecord::new("user123", "a.mp4", "a.jpg", Some(window));
        store.create(&job).await.unwrap();

        let fetched = store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(fetched.time_window, Some(window));
    }
}
