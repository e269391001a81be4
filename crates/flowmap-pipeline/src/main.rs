//! One-shot pipeline runner.
//!
//! Submits a single video (plus optional reference image) to the job
//! pipeline, polls it to a terminal state, and prints the analysis as
//! JSON. The HTTP boundary layer is external; this binary is the local
//! equivalent for operating and debugging the pipeline.

use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flowmap_media::probe_video;
use flowmap_models::SubmitRequest;
use flowmap_pipeline::{JobService, PipelineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("flowmap=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(true).with_target(true))
            .with(env_filter)
            .init();
    }

    let mut args = std::env::args().skip(1);
    let Some(video_path) = args.next() else {
        bail!("usage: flowmap-runner <video> [reference-image]");
    };
    let reference_image_path = args.next();

    let config = PipelineConfig::from_env();
    info!("Runner config: {:?}", config);

    let service = JobService::new(config)
        .await
        .context("failed to start job service")?;

    let calibration_points = calibration_points(&video_path).await?;

    let job_id = service
        .submit(SubmitRequest {
            user: std::env::var("FLOWMAP_USER").unwrap_or_else(|_| "local".to_string()),
            video_path,
            reference_image_path,
            calibration_points,
            time_window: None,
        })
        .await
        .context("submission rejected")?;

    info!("Submitted job {}", job_id);

    // Poll until the worker reaches a terminal state.
    let mut last_message = String::new();
    loop {
        let view = service.status(&job_id).await?;
        if view.message != last_message {
            info!("[{}] {}", view.status, view.message);
            last_message = view.message;
        }
        if view.status.is_terminal() {
            if view.status != flowmap_models::JobStatus::Completed {
                bail!("job finished as {}: {}", view.status, last_message);
            }
            break;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let artifacts = service.result(&job_id).await?;
    info!("Heatmap: {}", artifacts.heatmap_image.display());
    info!("Annotated video: {}", artifacts.annotated_video.display());

    let analysis = service.analysis(&job_id, None).await?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);

    Ok(())
}

/// Calibration points from `FLOWMAP_POINTS` (JSON `[[x,y]; 4]`), falling
/// back to the video's corners.
async fn calibration_points(video_path: &str) -> anyhow::Result<Vec<[f32; 2]>> {
    if let Ok(raw) = std::env::var("FLOWMAP_POINTS") {
        let points: Vec<[f32; 2]> =
            serde_json::from_str(&raw).context("invalid FLOWMAP_POINTS JSON")?;
        return Ok(points);
    }

    let info = probe_video(video_path).await.context("cannot probe video")?;
    let (w, h) = (info.width as f32, info.height as f32);
    Ok(vec![[0.0, 0.0], [w, 0.0], [w, h], [0.0, h]])
}
