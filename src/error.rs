// Error types for the detector

use thiserror::Error;

/// Main error type for the detector
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Unexpected model output: {0}")]
    ModelOutput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("UI error: {0}")]
    Ui(String),

    #[error("ONNX Runtime error: {0}")]
    Onnx(#[from] ort::OrtError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Failed to read anchors: {0}")]
    Anchors(#[from] ndarray_npy::ReadNpyError),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for detector operations
pub type Result<T> = std::result::Result<T, DetectorError>;

impl From<nokhwa::NokhwaError> for DetectorError {
    fn from(err: nokhwa::NokhwaError) -> Self {
        match err {
            nokhwa::NokhwaError::OpenDeviceError(device, error) => {
                DetectorError::Camera(format!("Device {device}: {error}"))
            }
            nokhwa::NokhwaError::OpenStreamError(error) => {
                DetectorError::Camera(format!("Could not open stream: {error}"))
            }
            _ => DetectorError::Camera(err.to_string()),
        }
    }
}

impl From<eframe::Error> for DetectorError {
    fn from(err: eframe::Error) -> Self {
        DetectorError::Ui(err.to_string())
    }
}
