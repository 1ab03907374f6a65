use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use tracing::{info, warn};

use crate::face_landmarks::FaceLandmarks;
use crate::mouth::{Classification, MOUTH_LANDMARK_IDS};

pub const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 255, 255]);
pub const LANDMARK_RADIUS: i32 = 3;
/// Distance from the bottom edge to the text baseline.
pub const TEXT_BOTTOM_MARGIN: i32 = 30;
const TEXT_SCALE: f32 = 48.0;

/// Draws the mouth landmarks and the status text over a frame.
pub struct Hud {
    font: Option<Font<'static>>,
    scale: Scale,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Hud {
    pub fn new(font: Option<Font<'static>>) -> Self {
        Self {
            font,
            scale: Scale::uniform(TEXT_SCALE),
        }
    }

    /// Loads the font at `path`; a missing or unreadable font disables text rendering.
    pub fn load(path: Option<&Path>) -> Self {
        let font = path.and_then(|path| match std::fs::read(path) {
            Ok(bytes) => match Font::try_from_vec(bytes) {
                Some(font) => {
                    info!("Loaded HUD font from {}", path.display());
                    Some(font)
                }
                None => {
                    warn!("{} is not a valid TrueType font", path.display());
                    None
                }
            },
            Err(e) => {
                warn!("Could not read HUD font {}: {e}", path.display());
                None
            }
        });

        Self::new(font)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn draw(
        &self,
        image: &mut RgbImage,
        landmarks: Option<&FaceLandmarks>,
        classification: &Classification,
    ) {
        let Some(landmarks) = landmarks else {
            return;
        };
        let (width, height) = image.dimensions();

        for index in MOUTH_LANDMARK_IDS {
            if let Some((x, y)) = landmarks.to_pixels(index, width, height) {
                draw_filled_circle_mut(
                    image,
                    (x.round() as i32, y.round() as i32),
                    LANDMARK_RADIUS,
                    LANDMARK_COLOR,
                );
            }
        }

        self.draw_status(image, classification);
    }

    fn draw_status(&self, image: &mut RgbImage, classification: &Classification) {
        let (width, height) = image.dimensions();
        let color = classification.status.hud_color();
        let baseline = height as i32 - TEXT_BOTTOM_MARGIN;

        match self.font {
            Some(ref font) => {
                let text = classification.status.label();
                let (text_width, _) = text_size(self.scale, font, text);
                let ascent = font.v_metrics(self.scale).ascent.round() as i32;

                // draw_text_mut positions the top of the glyph box
                let x = (width as i32 - text_width) / 2;
                let y = baseline - ascent;
                draw_text_mut(image, color, x, y, self.scale, font, text);
            }
            None => {
                let bar_width = (width / 4).max(1);
                let bar_height = 12u32.min(height);
                let rect = Rect::at((width - bar_width) as i32 / 2, baseline - bar_height as i32)
                    .of_size(bar_width, bar_height);
                draw_filled_rect_mut(image, rect, color);
            }
        }
    }
}
