//! Pipeline configuration.

use std::path::PathBuf;

use flowmap_media::DetectorConfig;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Data root: the job database plus per-job upload/result folders
    pub data_dir: PathBuf,
    /// Maximum jobs processing concurrently; submissions beyond this queue
    /// in `pending`
    pub max_concurrent_jobs: usize,
    /// Person detector settings
    pub detector: DetectorConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            max_concurrent_jobs: 2,
            detector: DetectorConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut detector = DetectorConfig::default();
        if let Ok(path) = std::env::var("FLOWMAP_MODEL_PATH") {
            detector.model_path = path;
        }
        if let Some(confidence) = std::env::var("FLOWMAP_DETECTOR_CONFIDENCE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            detector.confidence_threshold = confidence;
        }

        Self {
            data_dir: std::env::var("FLOWMAP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_concurrent_jobs: std::env::var("FLOWMAP_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent_jobs),
            detector,
        }
    }

    /// Path of the SQLite job database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("flowmap.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.database_path(), PathBuf::from("./data/flowmap.db"));
    }
}
