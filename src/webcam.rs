// frame sources: a nokhwa camera, or image files replayed from disk
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution,
};
use nokhwa::{query, Camera};
use tracing::{debug, info, warn};

use crate::config::CameraConfig;
use crate::error::{DetectorError, Result};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

pub trait FrameSource {
    /// Next RGB frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Resolution of the frames delivered so far.
    fn resolution(&self) -> (u32, u32);
}

/// Human-readable names of the cameras, in index order.
pub fn list_devices() -> Result<Vec<String>> {
    let devices = query(ApiBackend::Auto)?;
    debug!("There are {} available cameras.", devices.len());
    Ok(devices.iter().map(|d| d.human_name()).collect())
}

pub struct Webcam {
    camera: Camera,
    index: u32,
}

impl Webcam {
    /// Opens camera `index`, asking for the closest format to the configured one.
    pub fn open(index: u32, config: &CameraConfig) -> Result<Self> {
        let resolution = Resolution::new(config.width, config.height);
        let camera_format = CameraFormat::new(resolution, FrameFormat::MJPEG, config.fps);
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(camera_format));

        debug!("Opening camera {} with format {:?}", index, requested);
        let mut camera = Camera::new(CameraIndex::Index(index), requested)?;
        camera.open_stream()?;

        let format = camera.camera_format();
        info!(
            "Camera {} ({}) streaming {}x{} @ {} fps ({:?})",
            index,
            camera.info().human_name(),
            format.resolution().width(),
            format.resolution().height(),
            format.frame_rate(),
            format.format()
        );

        Ok(Self { camera, index })
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl FrameSource for Webcam {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let buffer = self.camera.frame()?;
        let image = buffer.decode_image::<RgbFormat>()?;
        Ok(Some(image))
    }

    fn resolution(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!("Failed to stop camera {}: {e}", self.index);
        }
    }
}

/// Replays a single image or every image in a directory (sorted by name) once.
pub struct ImageFileSource {
    files: Vec<PathBuf>,
    position: usize,
    resolution: (u32, u32),
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl ImageFileSource {
    /// `fps` paces the replay like a camera would; `None` replays as fast as possible.
    pub fn open(path: &Path, fps: Option<u32>) -> Result<Self> {
        let files = if path.is_dir() {
            let mut files = Vec::new();
            for entry in std::fs::read_dir(path)? {
                let file = entry?.path();
                if is_image_file(&file) {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(DetectorError::Camera(format!(
                "input {} does not exist",
                path.display()
            )));
        };

        if files.is_empty() {
            return Err(DetectorError::Camera(format!(
                "no images found in {}",
                path.display()
            )));
        }

        info!("Replaying {} image(s) from {}", files.len(), path.display());

        Ok(Self {
            files,
            position: 0,
            resolution: (0, 0),
            frame_interval: fps.filter(|&fps| fps > 0).map(|fps| Duration::from_secs(1) / fps),
            last_frame: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

fn is_image_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

impl FrameSource for ImageFileSource {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        let image = image::open(path)?.to_rgb8();

        self.pace();
        self.resolution = image.dimensions();
        Ok(Some(image))
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}
