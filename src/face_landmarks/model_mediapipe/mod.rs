use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use ort::tensor::OrtOwnedTensor;
use ort::{Environment, Session, SessionBuilder, Value};
use tracing::info;

use crate::error::{DetectorError, Result};
use crate::face_detection::FaceBoundingBox;
use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel, NUM_MESH_LANDMARKS};
use crate::utils::{image_to_tensor, sigmoid};

pub const INPUT_SIZE: u32 = 256;

/// Fraction of the face width added on each side before cropping.
const BBOX_PADDING: f32 = 0.25;

pub struct MediapipeFaceLandmarksModel {
    session: Session,
}

impl MediapipeFaceLandmarksModel {
    pub fn new(environment: &Arc<Environment>, model_path: &Path) -> Result<Self> {
        let session = SessionBuilder::new(environment)?
            .with_intra_threads(4)?
            .with_model_from_file(model_path)
            .map_err(|e| {
                DetectorError::ModelLoad(format!(
                    "face landmarks {}: {e}",
                    model_path.display()
                ))
            })?;

        info!("Loaded face landmarks model from {}", model_path.display());

        Ok(MediapipeFaceLandmarksModel { session })
    }
}

/// Maps raw model output (pixels of the 256x256 crop) into frame-normalized landmarks.
pub fn crop_to_frame(
    raw: &[f32],
    crop: &FaceBoundingBox,
    image_width: u32,
    image_height: u32,
) -> Vec<f32> {
    let scale = INPUT_SIZE as f32;
    let (crop_w, crop_h) = (crop.width as f32, crop.height as f32);

    raw.chunks_exact(3)
        .flat_map(|p| {
            let x = (p[0] / scale * crop_w + crop.x as f32) / image_width as f32;
            let y = (p[1] / scale * crop_h + crop.y as f32) / image_height as f32;
            let z = p[2] / scale * crop_w / image_width as f32;
            [x, y, z]
        })
        .collect()
}

/// Picks the mesh (first output with a full mesh) and the face flag (first single-value output).
pub fn split_outputs(outputs: Vec<Vec<f32>>) -> (Option<Vec<f32>>, Option<f32>) {
    let mut mesh: Option<Vec<f32>> = None;
    let mut face_flag: Option<f32> = None;
    for values in outputs {
        match values.len() {
            1 if face_flag.is_none() => face_flag = Some(values[0]),
            n if n >= NUM_MESH_LANDMARKS * 3 && mesh.is_none() => mesh = Some(values),
            _ => {}
        }
    }
    (mesh, face_flag)
}

impl FaceLandmarksModel for MediapipeFaceLandmarksModel {
    fn run(&self, input: &DynamicImage, face_bbox: Option<FaceBoundingBox>) -> Result<FaceLandmarks> {
        let (image_width, image_height) = (input.width(), input.height());

        let crop = match face_bbox {
            Some(bbox) => bbox.padded(BBOX_PADDING, image_width, image_height),
            None => {
                let side = image_width.min(image_height);
                FaceBoundingBox::new(
                    (image_width - side) / 2,
                    (image_height - side) / 2,
                    side,
                    side,
                    1.0,
                )
            }
        };

        if crop.is_empty() {
            return Err(DetectorError::ModelOutput(format!(
                "empty crop region {:?}",
                crop.to_tuple()
            )));
        }

        let cropped = input
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);

        let array = image_to_tensor(&cropped)?;
        let inputs = vec![Value::from_array(self.session.allocator(), &array)?];
        let outputs: Vec<Value> = self.session.run(inputs)?;

        let mut values: Vec<Vec<f32>> = Vec::with_capacity(outputs.len());
        for output in outputs.iter() {
            let tensor: OrtOwnedTensor<f32, _> = output.try_extract()?;
            values.push(tensor.view().iter().copied().collect());
        }
        let (mesh, face_flag) = split_outputs(values);

        let mesh = mesh.ok_or_else(|| {
            DetectorError::ModelOutput("face landmarks output missing".to_string())
        })?;
        let confidence = face_flag.map(sigmoid).unwrap_or(0.0);

        let points = crop_to_frame(&mesh, &crop, image_width, image_height);

        Ok(FaceLandmarks::from_vec(&points, crop, confidence))
    }
}
