//! Background video worker: frame in, annotated frame and status out.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use image::{imageops, DynamicImage, RgbImage};
use tracing::{debug, error, info, trace, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::face::FaceMeshTracker;
use crate::hud::Hud;
use crate::mouth::Classification;
use crate::status_queue::StatusQueue;
use crate::utils::{lock_state, SharedState};
use crate::webcam::{list_devices, FrameSource, ImageFileSource, Webcam};

/// Capture failures tolerated in a row before the worker gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 30;
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Why [`run_worker`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    EndOfStream,
    /// The ui asked for another camera.
    DeviceChanged(u32),
}

pub struct VideoProcessor {
    tracker: FaceMeshTracker,
    hud: Hud,
    queue: Arc<StatusQueue>,
    shared_state: SharedState,
    threshold: f32,
    mirror: bool,
}

impl VideoProcessor {
    pub fn new(
        tracker: FaceMeshTracker,
        hud: Hud,
        queue: Arc<StatusQueue>,
        shared_state: SharedState,
        threshold: f32,
        mirror: bool,
    ) -> Self {
        Self {
            tracker,
            hud,
            queue,
            shared_state,
            threshold,
            mirror,
        }
    }

    pub fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    /// Forgets the tracked face, e.g. after switching cameras.
    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    /// Classifies one frame, publishes the status and returns the annotated frame.
    pub fn recv(&mut self, frame: RgbImage) -> RgbImage {
        let frame = if self.mirror {
            imageops::flip_horizontal(&frame)
        } else {
            frame
        };
        let image = DynamicImage::ImageRgb8(frame);

        let landmarks = match self.tracker.process(&image) {
            Ok(landmarks) => landmarks,
            Err(e) => {
                warn!("Face mesh failed, treating frame as no face: {e}");
                self.tracker.reset();
                None
            }
        };

        let mouth = landmarks.as_ref().and_then(|l| l.mouth());
        let classification = match mouth {
            Some(ref mouth) => Classification::from_mouth(mouth, self.threshold),
            None => Classification::no_face(),
        };
        let face = landmarks.as_ref().filter(|_| mouth.is_some());

        if self.queue.push(classification.status) {
            trace!("Queued {} (ratio {:.3})", classification.status, classification.ratio);
        }

        let mut annotated = image.into_rgb8();
        self.hud.draw(&mut annotated, face, &classification);

        let mut state = lock_state(&self.shared_state);
        state.face_bbox = face.map(|l| l.face_bbox());
        state.record_frame(annotated.clone(), classification);

        annotated
    }
}

/// Pulls frames from `source` until it ends, `shutdown` is set, or the ui selects another device.
///
/// `device` is the camera being read, `None` for sources that cannot be switched.
pub fn run_worker(
    source: &mut dyn FrameSource,
    processor: &mut VideoProcessor,
    shutdown: &AtomicBool,
    device: Option<u32>,
) -> Result<WorkerExit> {
    let mut consecutive_errors = 0;

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return Ok(WorkerExit::Shutdown);
        }

        if let Some(active) = device {
            let requested = lock_state(processor.shared_state()).current_device;
            if let Some(requested) = requested.filter(|&r| r != active) {
                return Ok(WorkerExit::DeviceChanged(requested));
            }
        }

        match source.next_frame() {
            Ok(Some(frame)) => {
                consecutive_errors = 0;
                processor.recv(frame);
            }
            Ok(None) => {
                info!("Video source ended");
                return Ok(WorkerExit::EndOfStream);
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    error!("Giving up after {consecutive_errors} failed frames");
                    return Err(e);
                }
                warn!("Skipping frame: {e}");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}

/// Starts the video worker thread.
///
/// Frames come from `input` when set, otherwise from the camera selected in the shared state.
/// A fatal error is stored in `worker_error` for the ui before being returned.
pub fn spawn_worker(
    config: AppConfig,
    input: Option<PathBuf>,
    shared_state: SharedState,
    queue: Arc<StatusQueue>,
    shutdown: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<()>>> {
    let handle = thread::Builder::new()
        .name("video-worker".to_string())
        .spawn(move || {
            let result = worker_main(&config, input, &shared_state, queue, &shutdown);
            if let Err(ref e) = result {
                error!("Video worker stopped: {e}");
                lock_state(&shared_state).worker_error = Some(e.to_string());
            }
            result
        })?;

    Ok(handle)
}

fn worker_main(
    config: &AppConfig,
    input: Option<PathBuf>,
    shared_state: &SharedState,
    queue: Arc<StatusQueue>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let tracker = FaceMeshTracker::from_config(&config.detection, &config.models)?;
    let hud = Hud::load(config.assets.font.as_deref());
    let mut processor = VideoProcessor::new(
        tracker,
        hud,
        queue,
        Arc::clone(shared_state),
        config.detection.threshold,
        config.camera.mirror,
    );

    if let Some(path) = input {
        let mut source = ImageFileSource::open(&path, Some(config.camera.fps))?;
        run_worker(&mut source, &mut processor, shutdown, None)?;
        return Ok(());
    }

    match list_devices() {
        Ok(devices) => lock_state(shared_state).devices = Some(devices),
        Err(e) => warn!("Could not list cameras: {e}"),
    }

    let mut index = lock_state(shared_state)
        .current_device
        .unwrap_or(config.camera.index);

    loop {
        let mut webcam = Webcam::open(index, &config.camera)?;
        {
            let mut state = lock_state(shared_state);
            state.active_device = Some(index);
            state.current_device = Some(index);
        }

        match run_worker(&mut webcam, &mut processor, shutdown, Some(index))? {
            WorkerExit::DeviceChanged(next) => {
                info!("Switching from camera {} to {}", index, next);
                drop(webcam);
                processor.reset();
                index = next;
            }
            exit => {
                debug!("Worker finished: {:?}", exit);
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use nalgebra::Point3;

    use crate::error::DetectorError;
    use crate::face_detection::{FaceBoundingBox, FaceDetectionModel};
    use crate::face_landmarks::{FaceLandmarks, FaceLandmarksModel, NUM_MESH_LANDMARKS};
    use crate::mouth::{Status, LOWER_LIP, MOUTH_LEFT, MOUTH_RIGHT, UPPER_LIP};
    use crate::status_queue::QueuePolicy;
    use crate::utils::State;

    struct AlwaysFace;

    impl FaceDetectionModel for AlwaysFace {
        fn run(&self, image: &DynamicImage) -> Result<Option<FaceBoundingBox>> {
            Ok(Some(FaceBoundingBox::full_frame(image.width(), image.height())))
        }
    }

    /// Mouth opening read from the red channel of the top-left pixel.
    struct RedChannelMouth;

    impl FaceLandmarksModel for RedChannelMouth {
        fn run(&self, image: &DynamicImage, face_bbox: Option<FaceBoundingBox>) -> Result<FaceLandmarks> {
            let opening = image.to_rgb8().get_pixel(0, 0)[0] as f32 / 255.0 * 0.2;
            let mut points = vec![Point3::new(0.5, 0.5, 0.0); NUM_MESH_LANDMARKS];
            points[UPPER_LIP] = Point3::new(0.5, 0.5, 0.0);
            points[LOWER_LIP] = Point3::new(0.5, 0.5 + opening, 0.0);
            points[MOUTH_LEFT] = Point3::new(0.4, 0.55, 0.0);
            points[MOUTH_RIGHT] = Point3::new(0.6, 0.55, 0.0);
            let bbox = face_bbox.unwrap_or_else(|| FaceBoundingBox::full_frame(image.width(), image.height()));
            Ok(FaceLandmarks::new(points, bbox, 1.0))
        }
    }

    /// Fails on its second call only.
    struct FlakyMesh {
        calls: AtomicUsize,
    }

    impl FaceLandmarksModel for FlakyMesh {
        fn run(&self, image: &DynamicImage, face_bbox: Option<FaceBoundingBox>) -> Result<FaceLandmarks> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(DetectorError::ModelOutput("face landmarks output missing".to_string()));
            }
            RedChannelMouth.run(image, face_bbox)
        }
    }

    struct CountingFace {
        calls: Arc<AtomicUsize>,
    }

    impl FaceDetectionModel for CountingFace {
        fn run(&self, image: &DynamicImage) -> Result<Option<FaceBoundingBox>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            AlwaysFace.run(image)
        }
    }

    struct ScriptedSource {
        frames: VecDeque<Result<Option<RgbImage>>>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn resolution(&self) -> (u32, u32) {
            (16, 16)
        }
    }

    fn frame(red: u8) -> RgbImage {
        let mut image = RgbImage::new(16, 16);
        // mirroring moves the top-right pixel to the top-left
        image.put_pixel(15, 0, image::Rgb([red, 0, 0]));
        image
    }

    fn processor(policy: QueuePolicy) -> (VideoProcessor, Arc<StatusQueue>) {
        let queue = Arc::new(StatusQueue::new(10, policy));
        let tracker = FaceMeshTracker::new(Box::new(AlwaysFace), Box::new(RedChannelMouth), 0.5);
        let state = Arc::new(Mutex::new(State::new(0)));
        let processor = VideoProcessor::new(tracker, Hud::default(), Arc::clone(&queue), state, 0.35, true);
        (processor, queue)
    }

    #[test]
    fn recv_publishes_status_and_state() {
        let (mut processor, queue) = processor(QueuePolicy::Always);

        // opening 0.2 over width 0.2 = ratio 1.0
        let annotated = processor.recv(frame(255));
        assert_eq!(annotated.dimensions(), (16, 16));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));

        processor.recv(frame(0));
        assert_eq!(queue.try_pop(), Some(Status::Sus));

        let state = lock_state(processor.shared_state());
        assert_eq!(state.frame_seq, 2);
        assert_eq!(state.ratio_ts.len(), 2);
        assert!(state.face_bbox.is_some());
    }

    #[test]
    fn worker_skips_errors_until_end() {
        let (mut processor, queue) = processor(QueuePolicy::OnChange);
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![
                Ok(Some(frame(255))),
                Err(DetectorError::Camera("glitch".to_string())),
                Ok(Some(frame(255))),
                Ok(Some(frame(0))),
            ]),
        };

        let shutdown = AtomicBool::new(false);
        let exit = run_worker(&mut source, &mut processor, &shutdown, None).unwrap();
        assert_eq!(exit, WorkerExit::EndOfStream);

        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert_eq!(queue.try_pop(), Some(Status::Sus));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn worker_gives_up_after_repeated_errors() {
        let (mut processor, _queue) = processor(QueuePolicy::Always);
        let frames = (0..MAX_CONSECUTIVE_ERRORS)
            .map(|_| Err(DetectorError::Camera("unplugged".to_string())))
            .collect();
        let mut source = ScriptedSource { frames };

        let shutdown = AtomicBool::new(false);
        assert!(run_worker(&mut source, &mut processor, &shutdown, None).is_err());
    }

    #[test]
    fn worker_stops_on_shutdown_and_device_change() {
        let (mut processor, _queue) = processor(QueuePolicy::Always);
        let mut source = ScriptedSource {
            frames: VecDeque::from(vec![Ok(Some(frame(0)))]),
        };

        let shutdown = AtomicBool::new(true);
        let exit = run_worker(&mut source, &mut processor, &shutdown, Some(0)).unwrap();
        assert_eq!(exit, WorkerExit::Shutdown);

        lock_state(processor.shared_state()).current_device = Some(1);
        let shutdown = AtomicBool::new(false);
        let exit = run_worker(&mut source, &mut processor, &shutdown, Some(0)).unwrap();
        assert_eq!(exit, WorkerExit::DeviceChanged(1));
    }

    #[test]
    fn inference_error_counts_as_no_face_and_redetects() {
        let queue = Arc::new(StatusQueue::new(10, QueuePolicy::Always));
        let detections = Arc::new(AtomicUsize::new(0));
        let tracker = FaceMeshTracker::new(
            Box::new(CountingFace {
                calls: Arc::clone(&detections),
            }),
            Box::new(FlakyMesh {
                calls: AtomicUsize::new(0),
            }),
            0.5,
        );
        let state = Arc::new(Mutex::new(State::new(0)));
        let mut processor = VideoProcessor::new(tracker, Hud::default(), Arc::clone(&queue), state, 0.35, true);

        processor.recv(frame(255));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert!(processor.tracker.is_tracking());

        processor.recv(frame(255));
        assert_eq!(queue.try_pop(), Some(Status::Sus));
        assert!(!processor.tracker.is_tracking());
        assert!(!lock_state(processor.shared_state()).classification.unwrap().face_found);

        processor.recv(frame(255));
        assert_eq!(queue.try_pop(), Some(Status::Hehe));
        assert_eq!(detections.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fatal_worker_error_is_kept_in_state() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("frame.png");
        RgbImage::new(8, 8).save(&input).unwrap();

        let mut config = AppConfig::default();
        config.models.face_detector = dir.path().join("missing.onnx");
        config.models.face_landmarks = dir.path().join("missing_landmarks.onnx");
        config.assets.font = None;

        let state = Arc::new(Mutex::new(State::new(0)));
        let queue = Arc::new(StatusQueue::new(4, QueuePolicy::Always));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = spawn_worker(config, Some(input), Arc::clone(&state), Arc::clone(&queue), shutdown).unwrap();
        let result = handle.join().unwrap();

        assert!(result.is_err());
        assert!(lock_state(&state).worker_error.is_some());
        assert!(queue.is_empty());
    }
}
