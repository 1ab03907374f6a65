//! Single-face mesh tracking: detect once, then follow the face with the mesh model.

use image::DynamicImage;
use ort::{Environment, ExecutionProvider};
use tracing::{debug, info};

use crate::config::{DetectionConfig, ModelsConfig};
use crate::error::Result;
use crate::face_detection::model_blazeface::BlazefaceModel;
use crate::face_detection::{FaceBoundingBox, FaceDetectionModel};
use crate::face_landmarks::model_mediapipe::MediapipeFaceLandmarksModel;
use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel};

pub struct FaceMeshTracker {
    detector: Box<dyn FaceDetectionModel>,
    landmarks_model: Box<dyn FaceLandmarksModel>,
    tracked_bbox: Option<FaceBoundingBox>,
    min_tracking_confidence: f32,
}

impl FaceMeshTracker {
    pub fn new(
        detector: Box<dyn FaceDetectionModel>,
        landmarks_model: Box<dyn FaceLandmarksModel>,
        min_tracking_confidence: f32,
    ) -> Self {
        Self {
            detector,
            landmarks_model,
            tracked_bbox: None,
            min_tracking_confidence,
        }
    }

    /// Loads both ONNX models on a shared CPU environment.
    pub fn from_config(detection: &DetectionConfig, models: &ModelsConfig) -> Result<Self> {
        let environment = Environment::builder()
            .with_name("gato-detector")
            .with_execution_providers([ExecutionProvider::CPU(Default::default())])
            .build()?
            .into_arc();

        let detector = BlazefaceModel::new(
            &environment,
            &models.face_detector,
            models.anchors.as_deref(),
            detection.min_detection_confidence,
        )?;
        let landmarks_model = MediapipeFaceLandmarksModel::new(&environment, &models.face_landmarks)?;

        info!(
            "Face mesh ready (detection >= {}, tracking >= {})",
            detection.min_detection_confidence, detection.min_tracking_confidence
        );

        Ok(Self::new(
            Box::new(detector),
            Box::new(landmarks_model),
            detection.min_tracking_confidence,
        ))
    }

    /// Whether the next frame will reuse the previous face region.
    pub fn is_tracking(&self) -> bool {
        self.tracked_bbox.is_some()
    }

    pub fn reset(&mut self) {
        self.tracked_bbox = None;
    }

    /// Finds the face mesh in `image`, or `None` when no face is present.
    pub fn process(&mut self, image: &DynamicImage) -> Result<Option<FaceLandmarks>> {
        let face_bbox = match self.tracked_bbox.take() {
            Some(bbox) => bbox,
            None => match self.detector.run(image)? {
                Some(bbox) => {
                    debug!("Detected face at {:?} (score {:.2})", bbox.to_tuple(), bbox.score);
                    bbox
                }
                None => return Ok(None),
            },
        };

        let landmarks = self.landmarks_model.run(image, Some(face_bbox))?;

        if landmarks.confidence() < self.min_tracking_confidence {
            debug!("Lost face (confidence {:.2})", landmarks.confidence());
            return Ok(None);
        }

        let next_bbox = landmarks.bbox_from_landmarks(image.width(), image.height());
        if !next_bbox.is_empty() {
            self.tracked_bbox = Some(next_bbox);
        }

        Ok(Some(landmarks))
    }
}
