pub mod model_mediapipe;

use image::DynamicImage;
use nalgebra::{Point2, Point3};

use crate::error::Result;
use crate::face_detection::FaceBoundingBox;
use crate::mouth::{MouthLandmarks, LOWER_LIP, MOUTH_LEFT, MOUTH_RIGHT, UPPER_LIP};

/// Points of the plain face mesh.
pub const NUM_MESH_LANDMARKS: usize = 468;
/// Mesh plus the ten refined iris points.
pub const NUM_REFINED_LANDMARKS: usize = 478;

// define FaceLandmarksModel trait
pub trait FaceLandmarksModel: Send {
    /// Runs the mesh model on the region around `face_bbox` (whole frame if `None`).
    fn run(&self, image: &DynamicImage, face_bbox: Option<FaceBoundingBox>) -> Result<FaceLandmarks>;
}

/// Face mesh of a single face.
///
/// `x` and `y` are normalized to the full frame, `z` is relative depth on the same scale as `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceLandmarks {
    points: Vec<Point3<f32>>,
    face_bbox: FaceBoundingBox,
    confidence: f32,
}

impl FaceLandmarks {
    pub fn new(points: Vec<Point3<f32>>, face_bbox: FaceBoundingBox, confidence: f32) -> Self {
        Self {
            points,
            face_bbox,
            confidence,
        }
    }

    /// Builds landmarks from a flat `[x0, y0, z0, x1, ...]` vector.
    pub fn from_vec(points: &[f32], face_bbox: FaceBoundingBox, confidence: f32) -> Self {
        let points = points
            .chunks_exact(3)
            .map(|p| Point3::new(p[0], p[1], p[2]))
            .collect();
        Self::new(points, face_bbox, confidence)
    }

    pub fn get(&self, index: usize) -> Option<Point3<f32>> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[Point3<f32>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Face-presence probability reported by the mesh model.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Region the mesh model was run on.
    pub fn face_bbox(&self) -> FaceBoundingBox {
        self.face_bbox
    }

    pub fn has_iris(&self) -> bool {
        self.points.len() >= NUM_REFINED_LANDMARKS
    }

    /// Landmark in pixel coordinates of a `width` x `height` frame.
    pub fn to_pixels(&self, index: usize, width: u32, height: u32) -> Option<(f32, f32)> {
        self.get(index)
            .map(|p| (p.x * width as f32, p.y * height as f32))
    }

    pub fn mouth(&self) -> Option<MouthLandmarks> {
        let flat = |index: usize| self.get(index).map(|p| Point2::new(p.x, p.y));

        Some(MouthLandmarks {
            upper: flat(UPPER_LIP)?,
            lower: flat(LOWER_LIP)?,
            left: flat(MOUTH_LEFT)?,
            right: flat(MOUTH_RIGHT)?,
        })
    }

    /// Square box around all landmarks, used to track the face into the next frame.
    pub fn bbox_from_landmarks(&self, image_width: u32, image_height: u32) -> FaceBoundingBox {
        let mut x_min = f32::MAX;
        let mut y_min = f32::MAX;
        let mut x_max = f32::MIN;
        let mut y_max = f32::MIN;

        for p in self.points.iter() {
            x_min = x_min.min(p.x);
            y_min = y_min.min(p.y);
            x_max = x_max.max(p.x);
            y_max = y_max.max(p.y);
        }

        if self.points.is_empty() {
            return FaceBoundingBox::new(0, 0, 0, 0, self.confidence);
        }

        let x_min = x_min * image_width as f32;
        let x_max = x_max * image_width as f32;
        let y_min = y_min * image_height as f32;
        let y_max = y_max * image_height as f32;

        let center = ((x_min + x_max) / 2.0, (y_min + y_max) / 2.0);
        let size = (x_max - x_min).max(y_max - y_min);

        let x = (center.0 - size / 2.0).max(0.0);
        let y = (center.1 - size / 2.0).max(0.0);
        let size = size
            .min(image_width as f32 - x)
            .min(image_height as f32 - y)
            .max(0.0);

        FaceBoundingBox::new(x as u32, y as u32, size as u32, size as u32, self.confidence)
    }
}
