pub mod model_blazeface;

use image::DynamicImage;

use crate::error::Result;

pub trait FaceDetectionModel: Send {
    /// Returns the most confident face, or `None` if nothing passes the score threshold.
    fn run(&self, image: &DynamicImage) -> Result<Option<FaceBoundingBox>>;
}

/// Bounding box around a detected face, in pixels of the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceBoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Confidence score of the detected face.
    pub score: f32,
}

impl FaceBoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32, score: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            score,
        }
    }

    /// Covers the whole image.
    pub fn full_frame(image_width: u32, image_height: u32) -> Self {
        Self::new(0, 0, image_width, image_height, 1.0)
    }

    pub fn origin(&self) -> (u32, u32) {
        (self.x, self.y)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// (x, y, width, height)
    pub fn to_tuple(&self) -> (u32, u32, u32, u32) {
        (self.x, self.y, self.width, self.height)
    }

    /// Grows the box by `fraction` of its width on every side and clamps it to the image.
    pub fn padded(&self, fraction: f32, image_width: u32, image_height: u32) -> Self {
        let padding = fraction * self.width as f32;

        let x = self.x as f32 - padding;
        let y = self.y as f32 - padding;
        let w = self.width as f32 + 2.0 * padding;
        let h = self.height as f32 + 2.0 * padding;

        let (x, y, width, height) =
            adjust_bbox(x as i32, y as i32, w as i32, h as i32, image_width, image_height);

        Self::new(x, y, width, height, self.score)
    }
}

/// Clamps a box to the image while keeping its aspect ratio.
pub(crate) fn adjust_bbox(
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    image_w: u32,
    image_h: u32,
) -> (u32, u32, u32, u32) {
    if w <= 0 || h <= 0 {
        return (0, 0, 0, 0);
    }

    let original_aspect_ratio = w as f32 / h as f32;

    let clamped_x = x.clamp(0, image_w as i32);
    let clamped_y = y.clamp(0, image_h as i32);

    // the part left of or above the image is cut off, not shifted inside
    let w = w - (clamped_x - x).max(0);
    let h = h - (clamped_y - y).max(0);
    let (x, y) = (clamped_x, clamped_y);

    let w = w.min(image_w as i32 - x).max(0);
    let h = h.min(image_h as i32 - y).max(0);

    // shorten the longer side to restore the aspect ratio
    let short_side = w.min(h) as f32;
    let (w, h) = if original_aspect_ratio >= 1.0 {
        (short_side, short_side / original_aspect_ratio)
    } else {
        (short_side * original_aspect_ratio, short_side)
    };

    (x as u32, y as u32, w as u32, h as u32)
}
