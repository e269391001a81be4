//! The detection source: video in, tracked detections + annotated copy out.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use tracing::{debug, info};

use flowmap_models::Detection;

use crate::detect::{IoUTracker, PersonDetector};
use crate::draw;
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameReader, FrameWriter};
use crate::probe::probe_video;
use crate::{CancelFn, ProgressFn};

/// Progress is reported after every batch of this many frames; batching
/// keeps store-write overhead bounded.
const PROGRESS_FRAME_BATCH: u64 = 10;

/// Result of one detection run.
#[derive(Debug)]
pub struct DetectionOutput {
    /// Path of the annotated video copy
    pub annotated_video: PathBuf,
    /// Every confirmed detection, in frame order
    pub detections: Vec<Detection>,
    /// Source video frame rate
    pub fps: f64,
}

/// Run person detection and tracking over a whole video.
///
/// Frames stream out of an FFmpeg rawvideo pipe; each one passes through
/// the detector and tracker, gets its boxes and track labels drawn, and is
/// re-encoded into `annotated_video_path`.
///
/// `is_cancelled` is polled once per frame; when it reports true the run
/// stops promptly with [`MediaError::Cancelled`]. `on_progress` receives a
/// fraction in [0, 1] after every tenth frame.
pub async fn detect_and_track(
    video_path: impl AsRef<Path>,
    annotated_video_path: impl AsRef<Path>,
    detector: Arc<PersonDetector>,
    on_progress: Option<ProgressFn>,
    is_cancelled: Option<CancelFn>,
) -> MediaResult<DetectionOutput> {
    let video_path = video_path.as_ref();
    let annotated_video_path = annotated_video_path.as_ref();

    let info = probe_video(video_path).await?;
    let total_frames = info.total_frames();

    let mut reader = FrameReader::open(video_path, info.width, info.height).await?;
    let mut writer =
        FrameWriter::create(annotated_video_path, info.width, info.height, info.fps).await?;

    let mut tracker = IoUTracker::for_persons();
    let mut detections: Vec<Detection> = Vec::new();
    let mut frame_count: u64 = 0;
    let mut cancelled = false;

    loop {
        if is_cancelled.as_ref().map(|f| f()) == Some(true) {
            info!("Detection cancelled at frame {}", frame_count);
            cancelled = true;
            break;
        }

        let Some(frame) = reader.next_frame().await? else {
            break;
        };

        // Inference is CPU-bound; keep it off the async executor.
        let worker = Arc::clone(&detector);
        let (mut frame, raw) = tokio::task::spawn_blocking(move || {
            let raw = worker.detect(&frame);
            (frame, raw)
        })
        .await
        .map_err(|e| MediaError::internal(format!("Detection task panicked: {}", e)))?;
        let raw = raw?;

        let timestamp = frame_count as f64 / info.fps;
        for (track_id, bbox) in tracker.update(&raw) {
            detections.push(Detection::new(frame_count as u32, bbox, track_id, timestamp));
            draw::draw_tracked_box(&mut frame, bbox.x1, bbox.y1, bbox.x2, bbox.y2, track_id);
        }

        writer.write_frame(&frame).await?;
        counter!("flowmap_detection_frames_total").increment(1);

        frame_count += 1;
        if frame_count % PROGRESS_FRAME_BATCH == 0 {
            if let Some(progress) = &on_progress {
                progress((frame_count as f64 / total_frames as f64).min(1.0));
            }
            debug!(
                "Processed frame {}/{} ({} detections so far)",
                frame_count,
                total_frames,
                detections.len()
            );
        }
    }

    reader.close().await?;

    if cancelled {
        // The partial annotated file is left behind; the pipeline owns
        // cleanup of artifacts for non-completed jobs.
        let _ = writer.finish().await;
        return Err(MediaError::Cancelled);
    }

    writer.finish().await?;

    info!(
        "Detection finished: {} frames, {} detections, {} tracks",
        frame_count,
        detections.len(),
        tracker.active_tracks()
    );

    Ok(DetectionOutput {
        annotated_video: annotated_video_path.to_path_buf(),
        detections,
        fps: info.fps,
    })
}
