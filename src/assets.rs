//! Reference images shown next to the video.

use std::path::Path;

use image::RgbaImage;
use tracing::{info, warn};

use crate::mouth::Status;

pub const CAPTION_WAITING: &str = "Aguardando...";
pub const CAPTION_HEHE: &str = "MUITO HEHE!";
pub const CAPTION_SUS: &str = "Suspeito...";

const PLACEHOLDER_SIZE: u32 = 256;

pub fn caption_for(status: Status) -> &'static str {
    match status {
        Status::Hehe => CAPTION_HEHE,
        Status::Sus => CAPTION_SUS,
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub rgba: RgbaImage,
    /// Set when the file could not be loaded.
    pub placeholder: bool,
}

impl ReferenceImage {
    pub fn width(&self) -> u32 {
        self.rgba.width()
    }

    pub fn height(&self) -> u32 {
        self.rgba.height()
    }

    fn load(path: &Path, status: Status) -> Self {
        match image::open(path) {
            Ok(image) => {
                info!("Loaded {} image from {}", status, path.display());
                Self {
                    rgba: image.to_rgba8(),
                    placeholder: false,
                }
            }
            Err(e) => {
                warn!(
                    "Could not load {} image {}: {e}; using a placeholder",
                    status,
                    path.display()
                );
                Self::placeholder(status)
            }
        }
    }

    /// Square filled with the status color.
    pub fn placeholder(status: Status) -> Self {
        let [r, g, b] = status.hud_color().0;
        Self {
            rgba: RgbaImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, image::Rgba([r, g, b, 255])),
            placeholder: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceImages {
    sus: ReferenceImage,
    hehe: ReferenceImage,
}

impl ReferenceImages {
    pub fn load(sus_path: &Path, hehe_path: &Path) -> Self {
        Self {
            sus: ReferenceImage::load(sus_path, Status::Sus),
            hehe: ReferenceImage::load(hehe_path, Status::Hehe),
        }
    }

    pub fn image_for(&self, status: Status) -> &ReferenceImage {
        match status {
            Status::Hehe => &self.hehe,
            Status::Sus => &self.sus,
        }
    }
}
