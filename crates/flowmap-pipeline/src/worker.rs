//! The per-job worker: three ordered stages with cooperative cancellation.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use flowmap_media::{
    analyze_heatmap, detect_and_track, load_heatmap_gray, synthesize_heatmap, HeatmapRequest,
    PersonDetector, ProgressFn,
};
use flowmap_models::{DetectionSet, JobId, JobRecord, JobStatus};
use flowmap_store::{ArtifactLayout, JobStore, JobUpdate};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::JobLogger;
use crate::state::{CancelFlag, JobTable};

/// Fixed message written when cancellation is observed.
pub const CANCELLED_MESSAGE: &str = "Job was cancelled by user.";

/// Message written by the completed transition.
pub const COMPLETED_MESSAGE: &str = "Processing completed successfully";

/// Shared context handed to every spawned worker.
pub struct WorkerContext {
    pub config: PipelineConfig,
    pub store: JobStore,
    pub artifacts: ArtifactLayout,
    pub table: JobTable,
    /// Bounds how many jobs process concurrently; queued jobs stay pending.
    pub semaphore: Arc<Semaphore>,
}

/// Run one job to its terminal state. Never panics the caller: every
/// outcome ends as a terminal status on the job.
pub async fn run_job(ctx: Arc<WorkerContext>, job: JobRecord, cancel: CancelFlag) {
    let logger = JobLogger::new(&job.id, "process_video");

    // Queued jobs wait here in `pending`.
    let _permit = match ctx.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            logger.log_error("Worker semaphore closed");
            finish(&ctx, &job.id, JobStatus::Error, "Error during processing: worker pool shut down").await;
            return;
        }
    };

    logger.log_start("Starting video processing");

    match execute(&ctx, &job, &cancel, &logger).await {
        Ok(()) => {
            finish(&ctx, &job.id, JobStatus::Completed, COMPLETED_MESSAGE).await;
            logger.log_completion(COMPLETED_MESSAGE);
        }
        Err(e) if e.is_cancelled() => {
            finish(&ctx, &job.id, JobStatus::Cancelled, CANCELLED_MESSAGE).await;
            logger.log_progress("Cancelled by user");
        }
        Err(e) => {
            let message = format!("Error during processing: {}", e);
            finish(&ctx, &job.id, JobStatus::Error, &message).await;
            logger.log_error(&message);
        }
    }
}

/// The three ordered stages. Returns `Cancelled` the moment the flag is
/// observed, between stages or inside them.
async fn execute(
    ctx: &WorkerContext,
    job: &JobRecord,
    cancel: &CancelFlag,
    logger: &JobLogger,
) -> PipelineResult<()> {
    check_cancelled(cancel)?;
    transition(ctx, &job.id, JobStatus::Processing, "Starting video processing...").await?;

    let video_path = ctx.artifacts.upload_path(&job.id, &job.input_video);
    let reference_path = ctx.artifacts.upload_path(&job.id, &job.input_reference);
    let annotated_path = ctx.artifacts.annotated_video_path(&job.id);
    let heatmap_path = ctx.artifacts.heatmap_path(&job.id);

    // Progress messages funnel through a bounded channel; excess updates
    // are dropped rather than blocking a stage on store writes.
    let (progress_tx, mut progress_rx) = mpsc::channel::<String>(32);
    {
        let store = ctx.store.clone();
        let table = ctx.table.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            while let Some(message) = progress_rx.recv().await {
                table.set_message(&job_id, &message);
                if let Err(e) = store.update(&job_id, &JobUpdate::message(&message)).await {
                    warn!(job_id = %job_id, "Failed to mirror progress to store: {}", e);
                }
            }
        });
    }

    // Stage 1: detect and track.
    check_cancelled(cancel)?;
    let detector_config = ctx.config.detector.clone();
    let detector = tokio::task::spawn_blocking(move || PersonDetector::new(detector_config))
        .await
        .map_err(|e| PipelineError::internal(format!("Detector init panicked: {}", e)))??;

    let output = detect_and_track(
        &video_path,
        &annotated_path,
        Arc::new(detector),
        Some(stage_progress(&progress_tx, "Detecting people")),
        Some(cancel.as_cancel_fn()),
    )
    .await?;

    let detection_set = DetectionSet::new(output.fps, output.detections);
    tokio::fs::write(
        ctx.artifacts.detections_path(&job.id),
        serde_json::to_vec(&detection_set)?,
    )
    .await?;

    let annotated_name = file_name(&annotated_path);
    ctx.store
        .update(
            &job.id,
            &JobUpdate {
                output_video: Some(annotated_name),
                ..Default::default()
            },
        )
        .await?;

    logger.log_progress(&format!(
        "Detection finished: {} detections at {:.1} fps",
        detection_set.detections.len(),
        detection_set.fps
    ));

    // The job's time window restricts which detections feed the heatmap
    // and the analysis.
    let detections = match &job.time_window {
        Some(window) => detection_set.within_window(window),
        None => detection_set.detections.clone(),
    };

    // Stage 2: synthesize the heatmap and the annotated copy.
    check_cancelled(cancel)?;
    synthesize_heatmap(
        HeatmapRequest {
            detections: detections.clone(),
            reference_image_path: reference_path,
            output_heatmap_path: heatmap_path.clone(),
            output_video_path: annotated_path,
            video_path,
        },
        Some(stage_progress(&progress_tx, "Generating heatmap")),
        Some(cancel.as_cancel_fn()),
    )
    .await?;

    let heatmap_name = file_name(&heatmap_path);
    ctx.store
        .update(
            &job.id,
            &JobUpdate {
                output_heatmap: Some(heatmap_name),
                ..Default::default()
            },
        )
        .await?;

    // Stage 3: run the analysis once so completion guarantees an
    // exportable report.
    check_cancelled(cancel)?;
    let heatmap = tokio::task::spawn_blocking(move || load_heatmap_gray(&heatmap_path))
        .await
        .map_err(|e| PipelineError::internal(format!("Analysis task panicked: {}", e)))??;
    let analysis = analyze_heatmap(&heatmap, &detections, detection_set.fps);

    logger.log_progress(&format!(
        "Analysis ready: {} visitors, {} peak windows, high traffic {:.1}%",
        analysis.total_visitors,
        analysis.peak_hours.len(),
        analysis.areas.high.percentage
    ));

    Ok(())
}

/// Non-terminal transition: memory updated, then mirrored to the store
/// before the worker proceeds.
async fn transition(
    ctx: &WorkerContext,
    job_id: &JobId,
    status: JobStatus,
    message: &str,
) -> PipelineResult<()> {
    ctx.table.set_status(job_id, status, message);
    ctx.store
        .update(job_id, &JobUpdate::status(status).with_message(message))
        .await?;
    Ok(())
}

fn check_cancelled(cancel: &CancelFlag) -> PipelineResult<()> {
    if cancel.is_requested() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Format fractional stage progress like "Detecting people (42%)".
fn stage_progress(tx: &mpsc::Sender<String>, stage: &'static str) -> ProgressFn {
    let tx = tx.clone();
    Arc::new(move |progress| {
        let message = format!("{} ({}%)", stage, (progress * 100.0).round() as u32);
        let _ = tx.try_send(message);
    })
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Write the terminal transition: store first, memory after. When another
/// terminal status won the store race, adopt it instead of overwriting.
async fn finish(ctx: &WorkerContext, job_id: &JobId, status: JobStatus, message: &str) {
    debug_assert!(status.is_terminal());

    let won = match ctx.store.mark_terminal(job_id, status, message).await {
        Ok(won) => won,
        Err(e) => {
            warn!(job_id = %job_id, "Failed to store terminal status: {}", e);
            // Memory still records the outcome so polls see it.
            true
        }
    };

    if won {
        ctx.table.set_status(job_id, status, message);
        counter!("flowmap_jobs_finished_total", "status" => status.as_str()).increment(1);
    } else if let Ok(Some(stored)) = ctx.store.get(job_id).await {
        ctx.table.set_status(job_id, stored.status, stored.message);
    }
}
