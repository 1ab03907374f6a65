//! Mouth-opening ratio and the HEHE / SUS decision rule.

use std::fmt;

use image::Rgb;
use nalgebra::Point2;

/// Face-mesh index of the inner upper lip.
pub const UPPER_LIP: usize = 13;
/// Face-mesh index of the inner lower lip.
pub const LOWER_LIP: usize = 14;
/// Face-mesh index of the left mouth corner.
pub const MOUTH_LEFT: usize = 78;
/// Face-mesh index of the right mouth corner.
pub const MOUTH_RIGHT: usize = 308;

pub const MOUTH_LANDMARK_IDS: [usize; 4] = [UPPER_LIP, LOWER_LIP, MOUTH_LEFT, MOUTH_RIGHT];

/// Ratio above which the frame counts as "tongue out".
pub const DEFAULT_THRESHOLD: f32 = 0.35;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Status {
    Hehe,
    #[default]
    Sus,
}

impl Status {
    pub fn label(&self) -> &'static str {
        match self {
            Status::Hehe => "HEHE",
            Status::Sus => "SUS",
        }
    }

    /// Color of the status text drawn over the video (RGB).
    pub fn hud_color(&self) -> Rgb<u8> {
        match self {
            Status::Hehe => Rgb([0, 255, 0]),
            Status::Sus => Rgb([255, 0, 0]),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The four mouth points in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouthLandmarks {
    pub upper: Point2<f32>,
    pub lower: Point2<f32>,
    pub left: Point2<f32>,
    pub right: Point2<f32>,
}

impl MouthLandmarks {
    pub fn ratio(&self) -> f32 {
        mouth_ratio(self)
    }

    pub fn points(&self) -> [Point2<f32>; 4] {
        [self.upper, self.lower, self.left, self.right]
    }
}

/// Vertical lip distance over horizontal corner distance.
///
/// Returns `0.0` when the corners coincide horizontally or the input is not finite.
pub fn mouth_ratio(mouth: &MouthLandmarks) -> f32 {
    let v_dist = (mouth.upper.y - mouth.lower.y).abs();
    let h_dist = (mouth.left.x - mouth.right.x).abs();

    if h_dist == 0.0 {
        return 0.0;
    }

    let ratio = v_dist / h_dist;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}

pub fn classify(ratio: f32, threshold: f32) -> Status {
    if ratio > threshold {
        Status::Hehe
    } else {
        Status::Sus
    }
}

/// Outcome of one processed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub ratio: f32,
    pub face_found: bool,
}

impl Classification {
    pub fn from_mouth(mouth: &MouthLandmarks, threshold: f32) -> Self {
        let ratio = mouth.ratio();
        Self {
            status: classify(ratio, threshold),
            ratio,
            face_found: true,
        }
    }

    pub fn no_face() -> Self {
        Self {
            status: Status::Sus,
            ratio: 0.0,
            face_found: false,
        }
    }
}
