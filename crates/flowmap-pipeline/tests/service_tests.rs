//! Service-level tests: lifecycle rules, cancellation semantics, and
//! on-demand analysis over staged artifacts.

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use flowmap_models::{
    Detection, DetectionSet, JobId, JobRecord, JobStatus, PixelRect, SubmitRequest, TimeWindow,
};
use flowmap_pipeline::{JobService, PipelineConfig, PipelineError};
use flowmap_store::{JobStore, JobUpdate};

async fn service_in(dir: &TempDir) -> JobService {
    let config = PipelineConfig {
        data_dir: dir.path().to_path_buf(),
        max_concurrent_jobs: 2,
        ..Default::default()
    };
    let store = JobStore::open_in_memory().await.unwrap();
    JobService::from_parts(config, store).await.unwrap()
}

fn valid_points() -> Vec<[f32; 2]> {
    vec![[0.0, 0.0], [100.0, 0.0], [100.0, 100.0], [0.0, 100.0]]
}

fn detection(track_id: u32, timestamp: f64, cx: f32, cy: f32) -> Detection {
    Detection::new(
        (timestamp * 30.0) as u32,
        PixelRect::new(cx - 20.0, cy - 40.0, cx + 20.0, cy + 40.0),
        track_id,
        timestamp,
    )
}

/// Stage a completed job with detections, heatmap and reference artifacts
/// on disk, bypassing the media stages.
async fn stage_completed_job(service: &JobService) -> JobId {
    let mut job = JobRecord::new("user123", "store.mp4", "plan.png", None);
    let job_id = job.id.clone();

    service.artifacts().ensure_job_dirs(&job_id).await.unwrap();

    // Reference image (also used by windowed re-rendering)
    let reference = RgbImage::from_pixel(200, 200, Rgb([120, 120, 120]));
    reference
        .save(service.artifacts().upload_path(&job_id, "plan.png"))
        .unwrap();

    // Detections: track ids [1,1,2,3,3,3], timestamps [0,0,301,301,301,400]
    let detections = vec![
        detection(1, 0.0, 50.0, 50.0),
        detection(1, 0.0, 52.0, 50.0),
        detection(2, 301.0, 150.0, 150.0),
        detection(3, 301.0, 60.0, 120.0),
        detection(3, 301.0, 62.0, 120.0),
        detection(3, 400.0, 64.0, 122.0),
    ];
    let set = DetectionSet::new(30.0, detections);
    tokio::fs::write(
        service.artifacts().detections_path(&job_id),
        serde_json::to_vec(&set).unwrap(),
    )
    .await
    .unwrap();

    // A heatmap with one hot region
    let mut heatmap = RgbImage::new(200, 200);
    for y in 0..50 {
        for x in 0..50 {
            heatmap.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    let heatmap_path = service.artifacts().heatmap_path(&job_id);
    heatmap.save(&heatmap_path).unwrap();

    job.output_video = Some(format!("video_{}.mp4", job_id));
    job.output_heatmap = Some(format!("video_{}_heatmap.jpg", job_id));

    // Results row: outputs recorded while processing, then the terminal
    // transition.
    service.store().create(&job).await.unwrap();
    service
        .store()
        .update(
            &job_id,
            &JobUpdate {
                status: Some(JobStatus::Processing),
                message: None,
                output_video: job.output_video.clone(),
                output_heatmap: job.output_heatmap.clone(),
            },
        )
        .await
        .unwrap();
    service
        .store()
        .mark_terminal(&job_id, JobStatus::Completed, "Processing completed successfully")
        .await
        .unwrap();

    // The annotated video only matters for result(); a placeholder file
    // is enough here.
    tokio::fs::write(
        service
            .artifacts()
            .results_dir(&job_id)
            .join(format!("video_{}.mp4", job_id)),
        b"",
    )
    .await
    .unwrap();

    job_id
}

#[tokio::test]
async fn submit_rejects_wrong_point_count() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let err = service
        .submit(SubmitRequest {
            user: "user123".into(),
            video_path: "store.mp4".into(),
            reference_image_path: None,
            calibration_points: valid_points()[..3].to_vec(),
            time_window: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn submit_rejects_disallowed_file_type() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let err = service
        .submit(SubmitRequest {
            user: "user123".into(),
            video_path: "store.mkv".into(),
            reference_image_path: None,
            calibration_points: valid_points(),
            time_window: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn submit_rejects_missing_video_file() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let err = service
        .submit(SubmitRequest {
            user: "user123".into(),
            video_path: dir.path().join("absent.mp4").to_string_lossy().into_owned(),
            reference_image_path: None,
            calibration_points: valid_points(),
            time_window: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn status_of_unknown_job_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let err = service.status(&JobId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn cancel_without_live_worker_is_recorded_durably() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    // A job that exists only in the store, as after a restart
    let job = JobRecord::new("user123", "a.mp4", "a.jpg", None);
    service.store().create(&job).await.unwrap();

    service.cancel(&job.id).await.unwrap();

    let view = service.status(&job.id).await.unwrap();
    assert_eq!(view.status, JobStatus::Cancelled);
    assert_eq!(view.message, "Job was cancelled by user.");
}

#[tokio::test]
async fn cancel_on_terminal_job_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let job = JobRecord::new("user123", "a.mp4", "a.jpg", None);
    service.store().create(&job).await.unwrap();
    service
        .store()
        .mark_terminal(&job.id, JobStatus::Completed, "Processing completed successfully")
        .await
        .unwrap();

    service.cancel(&job.id).await.unwrap();

    let view = service.status(&job.id).await.unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.message, "Processing completed successfully");
}

#[tokio::test]
async fn cancel_of_unknown_job_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let err = service.cancel(&JobId::new()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn result_refused_for_non_completed_job() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let job = JobRecord::new("user123", "a.mp4", "a.jpg", None);
    service.store().create(&job).await.unwrap();

    let err = service.result(&job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotCompleted(_)));

    let err = service.analysis(&job.id, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotCompleted(_)));
}

#[tokio::test]
async fn result_serves_artifacts_once_completed() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;
    let job_id = stage_completed_job(&service).await;

    let artifacts = service.result(&job_id).await.unwrap();
    assert!(artifacts.heatmap_image.exists());
    assert!(artifacts.annotated_video.exists());
}

#[tokio::test]
async fn analysis_reports_visitors_and_peaks() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;
    let job_id = stage_completed_job(&service).await;

    let analysis = service.analysis(&job_id, None).await.unwrap();

    // Track ids [1,1,2,3,3,3]
    assert_eq!(analysis.total_visitors, 3);
    // Bins: [0,300) holds 2 detections, [300,600) holds 4
    assert_eq!(analysis.peak_hours.len(), 1);
    assert_eq!(analysis.peak_hours[0].start_minute, 5);
    assert_eq!(analysis.peak_hours[0].end_minute, 10);
    assert_eq!(analysis.peak_hours[0].count, 4);
    // The staged heatmap has one hot 50x50 tile out of 200x200
    assert_eq!(analysis.areas.high.percentage, 6.3);
}

#[tokio::test]
async fn analysis_is_pure() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;
    let job_id = stage_completed_job(&service).await;

    let first = service.analysis(&job_id, None).await.unwrap();
    let second = service.analysis(&job_id, None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn windowed_analysis_regenerates_and_rescopes() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;
    let job_id = stage_completed_job(&service).await;

    let window = TimeWindow::new(0.0, 300.0).unwrap();
    let analysis = service.analysis(&job_id, Some(window)).await.unwrap();

    // Only the two timestamp-0 detections of track 1 fall in the window
    assert_eq!(analysis.total_visitors, 1);
    assert_eq!(analysis.peak_hours.len(), 1);
    assert_eq!(analysis.peak_hours[0].start_minute, 0);
    assert_eq!(analysis.peak_hours[0].count, 2);

    // The regeneration finished and left its artifact behind
    assert_eq!(service.progress(&job_id), 1.0);
    assert!(service
        .artifacts()
        .custom_heatmap_path(&job_id, &window)
        .exists());
}

#[tokio::test]
async fn delete_removes_row_and_artifacts() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;
    let job_id = stage_completed_job(&service).await;

    service.delete(&job_id).await.unwrap();

    assert!(matches!(
        service.status(&job_id).await.unwrap_err(),
        PipelineError::NotFound(_)
    ));
    assert!(!service.artifacts().results_dir(&job_id).exists());

    let err = service.delete(&job_id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn history_lists_own_jobs_newest_first() {
    let dir = TempDir::new().unwrap();
    let service = service_in(&dir).await;

    let mut old = JobRecord::new("user123", "a.mp4", "a.jpg", None);
    old.created_at = chrono::Utc::now() - chrono::Duration::seconds(120);
    let new = JobRecord::new("user123", "b.mp4", "b.jpg", None);
    let foreign = JobRecord::new("other", "c.mp4", "c.jpg", None);

    service.store().create(&old).await.unwrap();
    service.store().create(&new).await.unwrap();
    service.store().create(&foreign).await.unwrap();

    let history = service.history("user123").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, new.id);
    assert_eq!(history[1].id, old.id);
}
