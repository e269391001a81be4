//! Annotation pass: re-render the source video with detection overlays.

use std::collections::HashMap;
use std::path::Path;

use tracing::info;

use flowmap_models::Detection;

use crate::draw;
use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameReader, FrameWriter};
use crate::probe::probe_video;
use crate::CancelFn;

/// Re-encode `video_path` into `output_path`, drawing every detection's
/// bounding box and track id label onto its frame.
///
/// Frame-sequential and I/O-bound; it needs the detections but not the
/// accumulation raster. `is_cancelled` is polled once per frame.
pub async fn render_annotated_video(
    video_path: impl AsRef<Path>,
    detections: &[Detection],
    output_path: impl AsRef<Path>,
    is_cancelled: Option<CancelFn>,
) -> MediaResult<()> {
    let video_path = video_path.as_ref();
    let output_path = output_path.as_ref();

    let info = probe_video(video_path).await?;

    // Group detections by frame for O(1) lookup in the frame loop.
    let mut by_frame: HashMap<u32, Vec<&Detection>> = HashMap::new();
    for detection in detections {
        by_frame.entry(detection.frame).or_default().push(detection);
    }

    let mut reader = FrameReader::open(video_path, info.width, info.height).await?;
    let mut writer = FrameWriter::create(output_path, info.width, info.height, info.fps).await?;

    let mut frame_index: u32 = 0;
    let mut cancelled = false;

    loop {
        if is_cancelled.as_ref().map(|f| f()) == Some(true) {
            cancelled = true;
            break;
        }

        let Some(mut frame) = reader.next_frame().await? else {
            break;
        };

        if let Some(frame_detections) = by_frame.get(&frame_index) {
            for detection in frame_detections {
                draw::draw_tracked_box(
                    &mut frame,
                    detection.bbox.x1,
                    detection.bbox.y1,
                    detection.bbox.x2,
                    detection.bbox.y2,
                    detection.track_id,
                );
            }
        }

        writer.write_frame(&frame).await?;
        frame_index += 1;
    }

    reader.close().await?;

    if cancelled {
        let _ = writer.finish().await;
        return Err(MediaError::Cancelled);
    }

    writer.finish().await?;

    info!(
        "Annotated video written to {} ({} frames)",
        output_path.display(),
        frame_index
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unopenable_video_fails() {
        let err = render_annotated_video("/nonexistent/video.mp4", &[], "/tmp/out.mp4", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
