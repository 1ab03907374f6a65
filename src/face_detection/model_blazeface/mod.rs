use std::cmp::min;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use image::DynamicImage;
use ndarray::prelude::*;
use ndarray_npy::ReadNpyExt;
use ort::tensor::OrtOwnedTensor;
use ort::{Environment, Session, SessionBuilder, Value};
use tracing::{debug, info};

use crate::error::{DetectorError, Result};
use crate::face_detection::{FaceBoundingBox, FaceDetectionModel};
use crate::utils::{image_to_tensor, sigmoid};

pub const INPUT_SIZE: u32 = 256;
pub const NUM_ANCHORS: usize = 896;
/// Box center, box size and six keypoints.
const BOX_VALUES: usize = 16;

pub struct BlazefaceModel {
    session: Session,
    anchors: Array2<f32>,
    min_score: f32,
}

impl BlazefaceModel {
    pub fn new(
        environment: &Arc<Environment>,
        model_path: &Path,
        anchors_path: Option<&Path>,
        min_score: f32,
    ) -> Result<Self> {
        let session = SessionBuilder::new(environment)?
            .with_intra_threads(2)?
            .with_model_from_file(model_path)
            .map_err(|e| {
                DetectorError::ModelLoad(format!(
                    "face detector {}: {e}",
                    model_path.display()
                ))
            })?;

        let anchors = match anchors_path {
            Some(path) => load_anchors(path)?,
            None => generate_anchors(),
        };

        if anchors.nrows() != NUM_ANCHORS || anchors.ncols() != 4 {
            return Err(DetectorError::ModelLoad(format!(
                "expected {NUM_ANCHORS}x4 anchors, got {}x{}",
                anchors.nrows(),
                anchors.ncols()
            )));
        }

        info!("Loaded face detector from {}", model_path.display());

        Ok(BlazefaceModel {
            session,
            anchors,
            min_score,
        })
    }
}

/// Reads an `(N, 4)` anchor table stored as float64 `.npy`.
pub fn load_anchors(path: &Path) -> Result<Array2<f32>> {
    let reader = BufReader::new(File::open(path)?);
    let anchors: Array2<f64> = Array2::read_npy(reader)?;
    Ok(anchors.mapv(|x| x as f32))
}

/// SSD anchors of the 256x256 full-range detector: `[x_center, y_center, w, h]`.
pub fn generate_anchors() -> Array2<f32> {
    let strides = [16u32, 32, 32, 32];
    let mut anchors: Vec<[f32; 4]> = Vec::with_capacity(NUM_ANCHORS);

    let mut layer = 0;
    while layer < strides.len() {
        let stride = strides[layer];

        // consecutive layers with the same stride share a feature map
        let mut anchors_per_cell = 0;
        while layer < strides.len() && strides[layer] == stride {
            anchors_per_cell += 2;
            layer += 1;
        }

        let size = (INPUT_SIZE + stride - 1) / stride;
        for y in 0..size {
            for x in 0..size {
                let x_center = (x as f32 + 0.5) / size as f32;
                let y_center = (y as f32 + 0.5) / size as f32;
                for _ in 0..anchors_per_cell {
                    anchors.push([x_center, y_center, 1.0, 1.0]);
                }
            }
        }
    }

    Array2::from_shape_fn((anchors.len(), 4), |(i, j)| anchors[i][j])
}

/// Decodes one raw box into `[xmin, ymin, xmax, ymax]`, normalized to the model input.
pub fn decode_box(raw_box: &[f32], anchor: ArrayView1<f32>) -> [f32; 4] {
    let scale = INPUT_SIZE as f32;

    let x_center = raw_box[0] / scale * anchor[2] + anchor[0];
    let y_center = raw_box[1] / scale * anchor[3] + anchor[1];
    let w = raw_box[2] / scale * anchor[2];
    let h = raw_box[3] / scale * anchor[3];

    [
        x_center - w / 2.0,
        y_center - h / 2.0,
        x_center + w / 2.0,
        y_center + h / 2.0,
    ]
}

fn argmax(input: &[f32]) -> Option<usize> {
    input
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(i, _)| i)
}

impl FaceDetectionModel for BlazefaceModel {
    fn run(&self, image: &DynamicImage) -> Result<Option<FaceBoundingBox>> {
        // cut a centered square from the image
        let smallest_side = min(image.width(), image.height());
        if smallest_side == 0 {
            return Ok(None);
        }
        let crop_x = (image.width() - smallest_side) / 2;
        let crop_y = (image.height() - smallest_side) / 2;

        let cropped_image = image
            .crop_imm(crop_x, crop_y, smallest_side, smallest_side)
            .resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);

        let array = image_to_tensor(&cropped_image)?;
        let inputs = vec![Value::from_array(self.session.allocator(), &array)?];
        let outputs: Vec<Value> = self.session.run(inputs)?;

        // the converted model splits scores and boxes across several outputs
        let mut scores: Vec<f32> = Vec::with_capacity(NUM_ANCHORS);
        let mut boxes: Vec<f32> = Vec::with_capacity(NUM_ANCHORS * BOX_VALUES);
        for output in outputs.iter() {
            let tensor: OrtOwnedTensor<f32, _> = output.try_extract()?;
            let view = tensor.view();
            match view.shape().last() {
                Some(1) => scores.extend(view.iter().copied()),
                Some(&n) if n == BOX_VALUES => boxes.extend(view.iter().copied()),
                other => {
                    return Err(DetectorError::ModelOutput(format!(
                        "unexpected detector output width {other:?}"
                    )))
                }
            }
        }

        if scores.len() != self.anchors.nrows() || boxes.len() != scores.len() * BOX_VALUES {
            return Err(DetectorError::ModelOutput(format!(
                "got {} scores and {} box values for {} anchors",
                scores.len(),
                boxes.len(),
                self.anchors.nrows()
            )));
        }

        let best = match argmax(&scores) {
            Some(best) => best,
            None => return Ok(None),
        };
        let score = sigmoid(scores[best]);
        if score < self.min_score {
            debug!("No face above threshold (best score {:.3})", score);
            return Ok(None);
        }

        let raw_box = &boxes[best * BOX_VALUES..(best + 1) * BOX_VALUES];
        let [xmin, ymin, xmax, ymax] = decode_box(raw_box, self.anchors.row(best));

        let side = smallest_side as f32;
        let to_px = |v: f32, offset: u32| (v.clamp(0.0, 1.0) * side) as u32 + offset;

        let x = to_px(xmin, crop_x);
        let y = to_px(ymin, crop_y);
        let width = to_px(xmax, crop_x).saturating_sub(x);
        let height = to_px(ymax, crop_y).saturating_sub(y);

        Ok(Some(FaceBoundingBox::new(x, y, width, height, score)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_anchor_count() {
        let anchors = generate_anchors();
        assert_eq!(anchors.dim(), (NUM_ANCHORS, 4));
    }

    #[test]
    fn first_anchors_are_on_fine_grid() {
        let anchors = generate_anchors();
        // 16x16 grid, two anchors per cell
        assert_eq!(anchors.row(0).to_vec(), vec![0.5 / 16.0, 0.5 / 16.0, 1.0, 1.0]);
        assert_eq!(anchors.row(1), anchors.row(0));
        assert_eq!(anchors[[2, 0]], 1.5 / 16.0);
        // coarse grid starts after 16 * 16 * 2 anchors
        assert_eq!(anchors[[512, 0]], 0.5 / 8.0);
    }

    #[test]
    fn decode_box_around_anchor() {
        let anchor = ndarray::array![0.5f32, 0.5, 1.0, 1.0];
        let mut raw = [0.0f32; BOX_VALUES];
        raw[2] = 64.0;
        raw[3] = 128.0;

        let [xmin, ymin, xmax, ymax] = decode_box(&raw, anchor.view());
        assert!((xmin - 0.375).abs() < 1e-6);
        assert!((xmax - 0.625).abs() < 1e-6);
        assert!((ymin - 0.25).abs() < 1e-6);
        assert!((ymax - 0.75).abs() < 1e-6);
    }

    #[test]
    fn argmax_picks_highest() {
        assert_eq!(argmax(&[0.1, 3.0, -1.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn anchors_roundtrip_through_npy() {
        use ndarray_npy::WriteNpyExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchors.npy");
        let expected = generate_anchors().mapv(|x| x as f64);
        expected
            .write_npy(std::fs::File::create(&path).unwrap())
            .unwrap();

        let loaded = load_anchors(&path).unwrap();
        assert_eq!(loaded, generate_anchors());
    }
}
