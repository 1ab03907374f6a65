//! Configuration file support.
//!
//! Settings are layered, lowest priority first:
//! - built-in defaults
//! - TOML file: `--config PATH`, or `gato-detector.toml` in the working directory
//! - CLI flags

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::cli::Cli;
use crate::error::{DetectorError, Result};
use crate::mouth::DEFAULT_THRESHOLD;
use crate::status_queue::QueuePolicy;

pub const DEFAULT_CONFIG_FILE: &str = "gato-detector.toml";

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub queue: QueueConfig,
    pub models: ModelsConfig,
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CameraConfig {
    /// Device index as reported by `--list-cameras`.
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Show the selfie view (flip horizontally) before detection.
    pub mirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            fps: 30,
            mirror: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectionConfig {
    /// Mouth ratio above which a frame is HEHE.
    pub threshold: f32,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub policy: QueuePolicy,
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            policy: QueuePolicy::Always,
            capacity: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
    pub face_detector: PathBuf,
    pub face_landmarks: PathBuf,
    /// Precomputed detector anchors; generated when unset.
    pub anchors: Option<PathBuf>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            face_detector: PathBuf::from("assets/models/face_detection_back_256x256.onnx"),
            face_landmarks: PathBuf::from("assets/models/face_landmarks_detector.onnx"),
            anchors: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsConfig {
    pub sus_image: PathBuf,
    pub hehe_image: PathBuf,
    /// TrueType font for the status text drawn over the video.
    pub font: Option<PathBuf>,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            sus_image: PathBuf::from("assets/sus.png"),
            hehe_image: PathBuf::from("assets/hehe.jpeg"),
            font: Some(PathBuf::from("assets/fonts/DejaVuSans-Bold.ttf")),
        }
    }
}

impl AppConfig {
    /// Loads the config file, if any.
    ///
    /// An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                info!("Loading config: {}", path.display());
                load_file(path)
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    info!("Loading config: {}", default_path.display());
                    load_file(default_path)
                } else {
                    debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                    Ok(Self::default())
                }
            }
        }
    }

    /// Applies command-line overrides.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(index) = cli.camera {
            self.camera.index = index;
        }
        if cli.no_mirror {
            self.camera.mirror = false;
        }
        if let Some(threshold) = cli.threshold {
            self.detection.threshold = threshold;
        }
        if let Some(policy) = cli.policy {
            self.queue.policy = policy;
        }
        if let Some(capacity) = cli.capacity {
            self.queue.capacity = capacity;
        }
        if let Some(ref dir) = cli.models_dir {
            self.models.face_detector = dir.join(file_name_or(&self.models.face_detector));
            self.models.face_landmarks = dir.join(file_name_or(&self.models.face_landmarks));
        }
        self
    }

    /// Validate configuration values are within acceptable ranges.
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if !d.threshold.is_finite() || d.threshold < 0.0 {
            return Err(DetectorError::Config(format!(
                "detection.threshold must be a non-negative number, got {}",
                d.threshold
            )));
        }
        for (name, value) in [
            ("min_detection_confidence", d.min_detection_confidence),
            ("min_tracking_confidence", d.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::Config(format!(
                    "detection.{name} must be 0.0-1.0, got {value}"
                )));
            }
        }

        if self.queue.capacity == 0 {
            return Err(DetectorError::Config(
                "queue.capacity must be at least 1".to_string(),
            ));
        }

        if self.camera.width == 0 || self.camera.height == 0 || self.camera.fps == 0 {
            return Err(DetectorError::Config(format!(
                "camera format {}x{}@{} is invalid",
                self.camera.width, self.camera.height, self.camera.fps
            )));
        }

        Ok(())
    }
}

fn file_name_or(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf())
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DetectorError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    Ok(toml::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn defaults_match_face_mesh_settings() {
        let config = AppConfig::default();
        assert_eq!(config.detection.threshold, 0.35);
        assert_eq!(config.detection.min_detection_confidence, 0.5);
        assert_eq!(config.detection.min_tracking_confidence, 0.5);
        assert!(config.camera.mirror);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
[detection]
threshold = 0.4

[queue]
policy = "on-change"
"#,
        )
        .unwrap();

        assert_eq!(config.detection.threshold, 0.4);
        assert_eq!(config.detection.min_tracking_confidence, 0.5);
        assert_eq!(config.queue.policy, QueuePolicy::OnChange);
        assert_eq!(config.queue.capacity, 10);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<AppConfig, _> = toml::from_str("[detection]\nthreshhold = 1.0\n");
        assert!(result.is_err());
    }

    #[test]
    fn cli_overrides_file() {
        let cli = Cli::try_parse_from([
            "gato-detector",
            "--threshold",
            "0.5",
            "--policy",
            "latest",
            "--camera",
            "2",
            "--no-mirror",
            "--models-dir",
            "/opt/models",
        ])
        .unwrap();

        let config = AppConfig::default().with_cli(&cli);
        assert_eq!(config.detection.threshold, 0.5);
        assert_eq!(config.queue.policy, QueuePolicy::Latest);
        assert_eq!(config.camera.index, 2);
        assert!(!config.camera.mirror);
        assert_eq!(
            config.models.face_landmarks,
            PathBuf::from("/opt/models/face_landmarks_detector.onnx")
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.detection.min_detection_confidence = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.queue.capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/gato.toml")));
        assert!(matches!(result, Err(DetectorError::Config(_))));
    }
}
