//! The boundary-layer facade: submit, status, cancel, result, analysis,
//! progress, delete, history.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::info;
use validator::Validate;

use flowmap_media::{
    analyze_heatmap, extract_first_frame, load_heatmap_gray, probe_video, render_blended_image,
    ProgressFn,
};
use flowmap_models::{
    AnalysisResult, CalibrationPoints, DetectionSet, JobId, JobRecord, JobStatus, SubmitRequest,
    TimeWindow,
};
use flowmap_store::{ArtifactLayout, JobStore};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::recovery::recover_orphans;
use crate::state::{JobTable, ProgressMap};
use crate::worker::{run_job, WorkerContext, CANCELLED_MESSAGE};

/// Status poll response.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: JobStatus,
    pub message: String,
}

/// Artifact locations of a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobArtifacts {
    pub heatmap_image: PathBuf,
    pub annotated_video: PathBuf,
}

/// The job pipeline's public surface.
///
/// Owns the in-memory job table, the worker pool bound and the
/// analysis-progress map; everything durable lives in the store.
#[derive(Clone)]
pub struct JobService {
    ctx: Arc<WorkerContext>,
    analysis_progress: ProgressMap,
}

impl JobService {
    /// Open the store under the configured data dir, run the orphan
    /// sweep, and stand the service up.
    pub async fn new(config: PipelineConfig) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let store = JobStore::open(config.database_path()).await?;
        Self::from_parts(config, store).await
    }

    /// Assemble from an already opened store (tests use the in-memory
    /// store here).
    pub async fn from_parts(config: PipelineConfig, store: JobStore) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let table = JobTable::new();
        let recovered = recover_orphans(&store, &table).await?;
        if recovered > 0 {
            info!("Startup sweep recovered {} orphaned jobs", recovered);
        }

        let artifacts = ArtifactLayout::new(&config.data_dir);
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));

        Ok(Self {
            ctx: Arc::new(WorkerContext {
                config,
                store,
                artifacts,
                table,
                semaphore,
            }),
            analysis_progress: ProgressMap::new(),
        })
    }

    /// Validate a submission, stage its inputs, and dispatch exactly one
    /// worker. Returns as soon as the worker is spawned.
    pub async fn submit(&self, request: SubmitRequest) -> PipelineResult<JobId> {
        request
            .validate()
            .map_err(|e| PipelineError::validation(e.to_string()))?;

        let points = CalibrationPoints::from_slice(&request.calibration_points)
            .map_err(|e| PipelineError::validation(e.to_string()))?;

        let video_src = Path::new(&request.video_path);
        if !video_src.exists() {
            return Err(PipelineError::validation(format!(
                "video file not found: {}",
                request.video_path
            )));
        }

        let info = probe_video(video_src)
            .await
            .map_err(|e| PipelineError::validation(format!("unreadable video: {}", e)))?;

        let window = match request.time_window {
            Some(w) => {
                let window = TimeWindow::new(w.start_secs, w.end_secs)
                    .map_err(|e| PipelineError::validation(e.to_string()))?;
                window
                    .check_within(info.duration)
                    .map_err(|e| PipelineError::validation(e.to_string()))?;
                Some(window)
            }
            None => None,
        };

        let video_name = required_file_name(video_src)?;
        let mut job = JobRecord::new(&request.user, video_name.clone(), String::new(), window);

        self.ctx.artifacts.ensure_job_dirs(&job.id).await?;

        tokio::fs::copy(
            video_src,
            self.ctx.artifacts.upload_path(&job.id, &video_name),
        )
        .await?;

        // Stage the reference image: the upload when present, otherwise
        // the video's first frame.
        job.input_reference = match &request.reference_image_path {
            Some(reference) => {
                let reference_src = Path::new(reference);
                if !reference_src.exists() {
                    return Err(PipelineError::validation(format!(
                        "reference image not found: {}",
                        reference
                    )));
                }
                let name = required_file_name(reference_src)?;
                tokio::fs::copy(
                    reference_src,
                    self.ctx.artifacts.upload_path(&job.id, &name),
                )
                .await?;
                name
            }
            None => {
                let extracted = self.ctx.artifacts.extracted_reference_path(&job.id);
                extract_first_frame(
                    self.ctx.artifacts.upload_path(&job.id, &video_name),
                    &extracted,
                )
                .await?;
                required_file_name(&extracted)?
            }
        };

        tokio::fs::write(
            self.ctx.artifacts.points_path(&job.id),
            serde_json::to_vec(&points)?,
        )
        .await?;

        self.ctx.store.create(&job).await?;
        let cancel = self.ctx.table.insert(job.id.clone(), &job.message);

        info!(job_id = %job.id, user = %job.user, "Job submitted");

        // Exactly one worker per job id; dispatch and forget.
        tokio::spawn(run_job(Arc::clone(&self.ctx), job.clone(), cancel));

        Ok(job.id)
    }

    /// Current status and message, served from memory when a worker is
    /// (or was) attached, from the store otherwise.
    pub async fn status(&self, job_id: &JobId) -> PipelineResult<StatusView> {
        if let Some((status, message)) = self.ctx.table.snapshot(job_id) {
            return Ok(StatusView { status, message });
        }

        match self.ctx.store.get(job_id).await? {
            Some(job) => Ok(StatusView {
                status: job.status,
                message: job.message,
            }),
            None => Err(PipelineError::not_found(job_id)),
        }
    }

    /// Best-effort cancellation: sets the flag and returns without waiting
    /// for the worker to observe it. Terminal jobs are a no-op. A job with
    /// no live worker (after a restart) is durably marked cancelled here.
    pub async fn cancel(&self, job_id: &JobId) -> PipelineResult<()> {
        if let Some((status, _)) = self.ctx.table.snapshot(job_id) {
            if status.is_terminal() {
                return Ok(());
            }
            if let Some(flag) = self.ctx.table.cancel_flag(job_id) {
                flag.request();
                info!(job_id = %job_id, "Cancellation requested");
            }
            return Ok(());
        }

        match self.ctx.store.get(job_id).await? {
            Some(job) if !job.status.is_terminal() => {
                self.ctx
                    .store
                    .mark_terminal(job_id, JobStatus::Cancelled, CANCELLED_MESSAGE)
                    .await?;
                info!(job_id = %job_id, "Cancelled job with no live worker");
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(PipelineError::not_found(job_id)),
        }
    }

    /// Artifact locations; only valid once the job completed.
    pub async fn result(&self, job_id: &JobId) -> PipelineResult<JobArtifacts> {
        let job = self.require_completed(job_id).await?;

        let heatmap_name = job
            .output_heatmap
            .ok_or_else(|| PipelineError::not_completed(job_id))?;
        let video_name = job
            .output_video
            .ok_or_else(|| PipelineError::not_completed(job_id))?;

        let results_dir = self.ctx.artifacts.results_dir(job_id);
        let heatmap_image = results_dir.join(heatmap_name);
        let annotated_video = results_dir.join(video_name);

        for path in [&heatmap_image, &annotated_video] {
            if !path.exists() {
                return Err(PipelineError::internal(format!(
                    "result artifact missing: {}",
                    path.display()
                )));
            }
        }

        Ok(JobArtifacts {
            heatmap_image,
            annotated_video,
        })
    }

    /// Recompute the analysis on demand, optionally scoped to a
    /// sub-window of the original video.
    ///
    /// A windowed request regenerates a custom heatmap artifact first and
    /// tracks its fractional progress under the job id (see
    /// [`JobService::progress`]).
    pub async fn analysis(
        &self,
        job_id: &JobId,
        window: Option<TimeWindow>,
    ) -> PipelineResult<AnalysisResult> {
        let job = self.require_completed(job_id).await?;

        let raw = tokio::fs::read(self.ctx.artifacts.detections_path(job_id)).await?;
        let detection_set: DetectionSet = serde_json::from_slice(&raw)?;

        // The job's own window scopes the default report too, matching
        // what the worker produced at completion.
        let base: Vec<_> = match &job.time_window {
            Some(job_window) => detection_set.within_window(job_window),
            None => detection_set.detections.clone(),
        };

        match window {
            None => {
                let heatmap_name = job
                    .output_heatmap
                    .ok_or_else(|| PipelineError::not_completed(job_id))?;
                let heatmap_path = self.ctx.artifacts.results_dir(job_id).join(heatmap_name);

                let heatmap =
                    tokio::task::spawn_blocking(move || load_heatmap_gray(&heatmap_path))
                        .await
                        .map_err(|e| {
                            PipelineError::internal(format!("Analysis task panicked: {}", e))
                        })??;

                Ok(analyze_heatmap(&heatmap, &base, detection_set.fps))
            }
            Some(window) => {
                let window = TimeWindow::new(window.start_secs, window.end_secs)
                    .map_err(|e| PipelineError::validation(e.to_string()))?;

                let filtered = DetectionSet::new(detection_set.fps, base).within_window(&window);

                let reference_path = self
                    .ctx
                    .artifacts
                    .upload_path(job_id, &job.input_reference);
                let custom_path = self.ctx.artifacts.custom_heatmap_path(job_id, &window);

                self.analysis_progress.set(job_id, 0.0);
                let progress: ProgressFn = {
                    let progress_map = self.analysis_progress.clone();
                    let job_id = job_id.clone();
                    Arc::new(move |p| progress_map.set(&job_id, p))
                };

                let render_detections = filtered.clone();
                let render_path = custom_path.clone();
                tokio::task::spawn_blocking(move || {
                    render_blended_image(
                        &render_detections,
                        &reference_path,
                        &render_path,
                        Some(progress),
                        None,
                    )
                })
                .await
                .map_err(|e| PipelineError::internal(format!("Render task panicked: {}", e)))??;

                self.analysis_progress.set(job_id, 1.0);

                let heatmap = tokio::task::spawn_blocking(move || load_heatmap_gray(&custom_path))
                    .await
                    .map_err(|e| PipelineError::internal(format!("Analysis task panicked: {}", e)))??;

                Ok(analyze_heatmap(&heatmap, &filtered, detection_set.fps))
            }
        }
    }

    /// Fractional progress of the most recent windowed analysis for this
    /// job; 0.0 when none ran.
    pub fn progress(&self, job_id: &JobId) -> f64 {
        self.analysis_progress.get(job_id)
    }

    /// Delete a job: store row, artifact folders, in-memory state. A live
    /// worker gets a cancellation request first.
    pub async fn delete(&self, job_id: &JobId) -> PipelineResult<()> {
        if let Some(flag) = self.ctx.table.cancel_flag(job_id) {
            flag.request();
        }

        if !self.ctx.store.delete(job_id).await? {
            return Err(PipelineError::not_found(job_id));
        }

        self.ctx.artifacts.remove_job(job_id).await?;
        self.ctx.table.remove(job_id);
        self.analysis_progress.remove(job_id);

        info!(job_id = %job_id, "Job deleted");
        Ok(())
    }

    /// All jobs of one user, newest first.
    pub async fn history(&self, user: &str) -> PipelineResult<Vec<JobRecord>> {
        Ok(self.ctx.store.list_for_user(user).await?)
    }

    /// The durable store (for boundary layers that need raw rows).
    pub fn store(&self) -> &JobStore {
        &self.ctx.store
    }

    /// The artifact layout.
    pub fn artifacts(&self) -> &ArtifactLayout {
        &self.ctx.artifacts
    }

    async fn require_completed(&self, job_id: &JobId) -> PipelineResult<JobRecord> {
        let job = self
            .ctx
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| PipelineError::not_found(job_id))?;

        if job.status != JobStatus::Completed {
            return Err(PipelineError::not_completed(job_id));
        }
        Ok(job)
    }
}

fn required_file_name(path: &Path) -> PipelineResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| PipelineError::validation(format!("not a file path: {}", path.display())))
}
