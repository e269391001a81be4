//! The heatmap synthesis engine.

use std::path::PathBuf;

use image::RgbImage;
use metrics::counter;
use tracing::info;

use flowmap_models::Detection;

use crate::error::{MediaError, MediaResult};
use crate::heatmap::{
    gaussian_blur, render_annotated_video, turbo, AccumulationRaster, BLUR_SIGMA, GAMMA,
    MAX_ALPHA, STAMP_RADIUS,
};
use crate::{CancelFn, ProgressFn};

/// Inputs of one synthesis run.
#[derive(Debug, Clone)]
pub struct HeatmapRequest {
    /// Detections to accumulate
    pub detections: Vec<Detection>,
    /// Reference (floor plan) image path
    pub reference_image_path: PathBuf,
    /// Where to write the blended heatmap image
    pub output_heatmap_path: PathBuf,
    /// Where to write the annotated video copy
    pub output_video_path: PathBuf,
    /// Source video path (re-opened for the annotation pass)
    pub video_path: PathBuf,
}

/// Generate the blended heatmap image, then re-render the source video
/// with detection overlays.
///
/// `on_progress` reports `stamped / total_detections` after each stamp;
/// this is intentionally decoupled from the annotation pass, which is
/// I/O-bound and not separately reported. `is_cancelled` is polled per
/// stamp and per annotated frame.
///
/// Partially written outputs of a failed or cancelled run are not cleaned
/// up here; artifact cleanup belongs to the pipeline and store.
pub async fn synthesize_heatmap(
    request: HeatmapRequest,
    on_progress: Option<ProgressFn>,
    is_cancelled: Option<CancelFn>,
) -> MediaResult<()> {
    let HeatmapRequest {
        detections,
        reference_image_path,
        output_heatmap_path,
        output_video_path,
        video_path,
    } = request;

    // Raster work is pure CPU; keep it off the async executor.
    let blend_detections = detections.clone();
    let blend_progress = on_progress.clone();
    let blend_cancel = is_cancelled.clone();
    let heatmap_path = output_heatmap_path.clone();
    tokio::task::spawn_blocking(move || {
        render_blended_image(
            &blend_detections,
            &reference_image_path,
            &heatmap_path,
            blend_progress,
            blend_cancel,
        )
    })
    .await
    .map_err(|e| MediaError::internal(format!("Synthesis task panicked: {}", e)))??;

    counter!("flowmap_heatmaps_rendered_total").increment(1);
    info!(
        "Blended heatmap written to {}",
        output_heatmap_path.display()
    );

    render_annotated_video(&video_path, &detections, &output_video_path, is_cancelled).await?;

    Ok(())
}

/// Render just the blended heatmap image: accumulate, gamma, normalize,
/// blur, colorize, alpha-composite, save.
///
/// Blocking; also used directly for windowed "custom" heatmap requests
/// where no annotation pass is wanted.
pub fn render_blended_image(
    detections: &[Detection],
    reference_image_path: &std::path::Path,
    output_heatmap_path: &std::path::Path,
    on_progress: Option<ProgressFn>,
    is_cancelled: Option<CancelFn>,
) -> MediaResult<()> {
    let reference = image::open(reference_image_path)
        .map_err(|e| MediaError::image_load(reference_image_path, e.to_string()))?
        .to_rgb8();
    let (width, height) = reference.dimensions();

    let mut raster = AccumulationRaster::new(height as usize, width as usize);

    let total = detections.len();
    for (stamped, detection) in detections.iter().enumerate() {
        if is_cancelled.as_ref().map(|f| f()) == Some(true) {
            return Err(MediaError::Cancelled);
        }

        let (cx, cy) = detection.bbox.center();
        raster.stamp_disk(cx as i64, cy as i64, STAMP_RADIUS, 1.0);

        if let Some(progress) = &on_progress {
            progress((stamped + 1) as f64 / total as f64);
        }
    }

    raster.apply_gamma(GAMMA);

    // One copy feeds the alpha mask, the other the color ramp.
    let alpha = raster.normalized(1.0);
    let intensity = raster.normalized(255.0);
    let smoothed = gaussian_blur(&intensity, BLUR_SIGMA);

    let mut blended = RgbImage::new(width, height);
    for (x, y, pixel) in blended.enumerate_pixels_mut() {
        let (ix, iy) = (x as usize, y as usize);
        let a = alpha[(iy, ix)] * MAX_ALPHA;
        let color = turbo(smoothed[(iy, ix)] / 255.0);
        let reference_pixel = reference.get_pixel(x, y);

        for c in 0..3 {
            let value = reference_pixel[c] as f32 * (1.0 - a) + color[c] as f32 * a;
            pixel[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    blended
        .save(output_heatmap_path)
        .map_err(|e| MediaError::image_load(output_heatmap_path, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowmap_models::PixelRect;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn detection_at(cx: f32, cy: f32, track_id: u32) -> Detection {
        Detection::new(
            0,
            PixelRect::new(cx - 20.0, cy - 40.0, cx + 20.0, cy + 40.0),
            track_id,
            0.0,
        )
    }

    #[test]
    fn test_blended_image_highlights_detection_centers() {
        let dir = TempDir::new().unwrap();
        let reference_path = dir.path().join("reference.png");
        let output_path = dir.path().join("heatmap.png");

        // Mid-gray reference so both blend directions are visible
        let reference = RgbImage::from_pixel(200, 200, image::Rgb([128, 128, 128]));
        reference.save(&reference_path).unwrap();

        let detections = vec![detection_at(50.0, 50.0, 1), detection_at(150.0, 150.0, 2)];

        render_blended_image(&detections, &reference_path, &output_path, None, None).unwrap();

        let blended = image::open(&output_path).unwrap().to_rgb8();
        assert_eq!(blended.dimensions(), (200, 200));

        // A far corner keeps the reference color; the stamp centers do not.
        let corner = blended.get_pixel(199, 0);
        let center = blended.get_pixel(50, 50);
        assert_eq!(*corner, image::Rgb([128, 128, 128]));
        assert_ne!(*center, image::Rgb([128, 128, 128]));
    }

    #[test]
    fn test_empty_detections_reproduce_reference() {
        let dir = TempDir::new().unwrap();
        let reference_path = dir.path().join("reference.png");
        let output_path = dir.path().join("heatmap.png");

        let reference = RgbImage::from_pixel(64, 64, image::Rgb([10, 200, 30]));
        reference.save(&reference_path).unwrap();

        render_blended_image(&[], &reference_path, &output_path, None, None).unwrap();

        let blended = image::open(&output_path).unwrap().to_rgb8();
        // Zero accumulation means zero alpha everywhere
        assert_eq!(*blended.get_pixel(32, 32), image::Rgb([10, 200, 30]));
    }

    #[test]
    fn test_missing_reference_image_fails() {
        let dir = TempDir::new().unwrap();
        let err = render_blended_image(
            &[],
            &dir.path().join("missing.png"),
            &dir.path().join("out.png"),
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::ImageLoad { .. }));
    }

    #[test]
    fn test_cancellation_stops_stamping() {
        let dir = TempDir::new().unwrap();
        let reference_path = dir.path().join("reference.png");
        RgbImage::new(64, 64).save(&reference_path).unwrap();

        let cancel: CancelFn = std::sync::Arc::new(|| true);
        let err = render_blended_image(
            &[detection_at(10.0, 10.0, 1)],
            &reference_path,
            &dir.path().join("out.png"),
            None,
            Some(cancel),
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_progress_reports_each_stamp() {
        let dir = TempDir::new().unwrap();
        let reference_path = dir.path().join("reference.png");
        let output_path = dir.path().join("out.png");
        RgbImage::new(64, 64).save(&reference_path).unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let progress: ProgressFn = std::sync::Arc::new(move |p| sink.lock().unwrap().push(p));

        let detections = vec![
            detection_at(10.0, 10.0, 1),
            detection_at(20.0, 20.0, 1),
            detection_at(30.0, 30.0, 2),
            detection_at(40.0, 40.0, 3),
        ];
        render_blended_image(&detections, &reference_path, &output_path, Some(progress), None)
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(*seen.last().unwrap(), 1.0);
    }
}
