use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use image::{DynamicImage, RgbImage};
use ndarray::{Array, CowArray, IxDyn};
use rayon::prelude::*;

use crate::error::Result;
use crate::face_detection::FaceBoundingBox;
use crate::mouth::Classification;

// make SharedState an alias for a Mutex protected struct State
pub type SharedState = Arc<Mutex<State>>;

/// Number of frames the fps estimate is averaged over.
const FPS_WINDOW: usize = 10;
/// Number of ratio samples kept for the diagnostics plot.
pub const RATIO_HISTORY: usize = 150;

// define the data that will be shared between the worker and the ui
pub struct State {
    pub fps: Option<f32>,
    pub fps_ts: TimeSeries,
    pub last_frame_time: Option<Instant>,
    pub resolution: Option<(u32, u32)>,

    /// Latest annotated frame and a counter bumped on every new frame.
    pub frame: Option<RgbImage>,
    pub frame_seq: u64,

    pub devices: Option<Vec<String>>,
    /// Camera the ui asks for.
    pub current_device: Option<u32>,
    /// Camera the worker has open.
    pub active_device: Option<u32>,

    pub face_bbox: Option<FaceBoundingBox>,
    pub classification: Option<Classification>,
    pub ratio_ts: TimeSeries,

    pub worker_error: Option<String>,
    pub started: Instant,
}

impl State {
    pub fn new(device: u32) -> Self {
        Self {
            current_device: Some(device),
            ..Self::default()
        }
    }

    /// Records a processed frame and refreshes the fps estimate.
    pub fn record_frame(&mut self, frame: RgbImage, classification: Classification) {
        let now = Instant::now();
        let timestamp = now.duration_since(self.started).as_micros();

        if let Some(last) = self.last_frame_time {
            let frame_delta = now.duration_since(last).as_secs_f32();
            if frame_delta > 0.0 {
                self.fps_ts.push(1.0 / frame_delta, timestamp);
                self.fps = Some(self.fps_ts.get_mean().round());
            }
        }
        self.last_frame_time = Some(now);

        self.resolution = Some(frame.dimensions());
        self.frame = Some(frame);
        self.frame_seq += 1;

        if classification.face_found {
            self.ratio_ts.push(classification.ratio, timestamp);
        }
        self.classification = Some(classification);
    }
}

// by default, all fields are empty
impl Default for State {
    fn default() -> Self {
        Self {
            fps: None,
            fps_ts: TimeSeries::new(FPS_WINDOW),
            last_frame_time: None,
            resolution: None,

            frame: None,
            frame_seq: 0,

            devices: None,
            current_device: None,
            active_device: None,

            face_bbox: None,
            classification: None,
            ratio_ts: TimeSeries::new(RATIO_HISTORY),

            worker_error: None,
            started: Instant::now(),
        }
    }
}

/// Locks the shared state, recovering the data if a thread panicked while holding it.
pub fn lock_state(state: &SharedState) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
pub struct TimeSeries {
    data: VecDeque<f32>,
    timestamp: VecDeque<u128>,
    max_length: usize,
}

impl TimeSeries {
    pub fn new(max_length: usize) -> Self {
        Self {
            data: VecDeque::new(),
            timestamp: VecDeque::new(),
            max_length,
        }
    }

    pub fn push(&mut self, value: f32, timestamp: u128) {
        self.data.push_back(value);
        self.timestamp.push_back(timestamp);

        if self.data.len() > self.max_length {
            self.data.pop_front();
            self.timestamp.pop_front();
        }
    }

    pub fn get_mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    pub fn last(&self) -> Option<f32> {
        self.data.back().copied()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// (value, timestamp) pairs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (f32, u128)> + '_ {
        self.data.iter().copied().zip(self.timestamp.iter().copied())
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x.clamp(-100.0, 100.0)).exp())
}

/// Converts an image into a normalized `[1, H, W, 3]` tensor.
pub fn image_to_tensor<'a>(image: &DynamicImage) -> Result<CowArray<'a, f32, IxDyn>> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let data: Vec<f32> = rgb.as_raw().par_iter().map(|&p| p as f32 / 255.0).collect();

    let array = Array::from_shape_vec((1, height as usize, width as usize, 3), data)?;
    Ok(array.into_dyn().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mouth::Status;

    #[test]
    fn time_series_drops_oldest() {
        let mut ts = TimeSeries::new(3);
        for i in 0..5 {
            ts.push(i as f32, i as u128);
        }
        assert_eq!(ts.len(), 3);
        assert_eq!(ts.iter().next(), Some((2.0, 2)));
        assert_eq!(ts.last(), Some(4.0));
        assert_eq!(ts.get_mean(), 3.0);
    }

    #[test]
    fn empty_time_series_mean_is_zero() {
        assert_eq!(TimeSeries::new(4).get_mean(), 0.0);
    }

    #[test]
    fn record_frame_updates_state() {
        let mut state = State::new(2);
        assert_eq!(state.current_device, Some(2));

        let classification = Classification {
            status: Status::Hehe,
            ratio: 0.5,
            face_found: true,
        };
        state.record_frame(RgbImage::new(8, 6), classification);
        state.record_frame(RgbImage::new(8, 6), Classification::no_face());

        assert_eq!(state.frame_seq, 2);
        assert_eq!(state.resolution, Some((8, 6)));
        assert_eq!(state.ratio_ts.len(), 1);
        assert_eq!(state.classification.map(|c| c.status), Some(Status::Sus));
    }

    #[test]
    fn sigmoid_is_bounded() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(1000.0) <= 1.0);
        assert!(sigmoid(-1000.0) >= 0.0);
    }

    #[test]
    fn tensor_is_nhwc_and_normalized() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 2, image::Rgb([255, 0, 51])));
        let tensor = image_to_tensor(&image).unwrap();
        assert_eq!(tensor.shape(), &[1, 2, 4, 3]);
        assert_eq!(tensor[[0, 1, 3, 0]], 1.0);
        assert_eq!(tensor[[0, 1, 3, 1]], 0.0);
        assert!((tensor[[0, 0, 0, 2]] - 0.2).abs() < 1e-6);
    }
}
