//! Per-job artifact directory layout.
//!
//! Uploads and results live in per-job folders under one data root:
//!
//! ```text
//! <root>/uploads/<job_id>/<video>, <reference image>, points.json
//! <root>/results/<job_id>/video_<job_id>.mp4, video_<job_id>_heatmap.jpg,
//!                         detections.json, custom_heatmap_<s>_<e>.jpg
//! ```
//!
//! Job-unique paths make concurrent workers safe by construction; the
//! pipeline treats every path as an opaque read/write location.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use flowmap_models::{JobId, TimeWindow};

use crate::error::StoreResult;

/// Artifact path helper rooted at the data directory.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn upload_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join("uploads").join(job_id.as_str())
    }

    pub fn results_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join("results").join(job_id.as_str())
    }

    /// Create both per-job folders.
    pub async fn ensure_job_dirs(&self, job_id: &JobId) -> StoreResult<()> {
        fs::create_dir_all(self.upload_dir(job_id)).await?;
        fs::create_dir_all(self.results_dir(job_id)).await?;
        Ok(())
    }

    /// An uploaded input file inside the job's upload folder.
    pub fn upload_path(&self, job_id: &JobId, file_name: &str) -> PathBuf {
        self.upload_dir(job_id).join(file_name)
    }

    /// Calibration points dump.
    pub fn points_path(&self, job_id: &JobId) -> PathBuf {
        self.upload_dir(job_id)
            .join(format!("points_{}.json", job_id))
    }

    /// Reference image extracted from the video when none was uploaded.
    pub fn extracted_reference_path(&self, job_id: &JobId) -> PathBuf {
        self.upload_dir(job_id)
            .join(format!("reference_{}.jpg", job_id))
    }

    /// The annotated output video.
    pub fn annotated_video_path(&self, job_id: &JobId) -> PathBuf {
        self.results_dir(job_id).join(format!("video_{}.mp4", job_id))
    }

    /// The blended heatmap image.
    pub fn heatmap_path(&self, job_id: &JobId) -> PathBuf {
        self.results_dir(job_id)
            .join(format!("video_{}_heatmap.jpg", job_id))
    }

    /// The persisted detections dump.
    pub fn detections_path(&self, job_id: &JobId) -> PathBuf {
        self.results_dir(job_id).join("detections.json")
    }

    /// A windowed custom heatmap, named by its time window.
    pub fn custom_heatmap_path(&self, job_id: &JobId, window: &TimeWindow) -> PathBuf {
        self.results_dir(job_id).join(format!(
            "custom_heatmap_{:.1}_{:.1}.jpg",
            window.start_secs, window.end_secs
        ))
    }

    /// Remove both per-job folders and everything in them.
    pub async fn remove_job(&self, job_id: &JobId) -> StoreResult<()> {
        for dir in [self.upload_dir(job_id), self.results_dir(job_id)] {
            if dir.exists() {
                debug!("Removing artifact folder {}", dir.display());
                fs::remove_dir_all(&dir).await?;
            }
        }
        Ok(())
    }
}
