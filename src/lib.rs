//! Webcam tongue detector.
//!
//! Every frame goes through the face mesh; the mouth-opening ratio of four lip landmarks
//! decides between HEHE (tongue out) and SUS. Statuses travel from the video worker to the
//! window through a bounded [`status_queue::StatusQueue`].

pub mod app;
pub mod assets;
pub mod cli;
pub mod config;
pub mod error;
pub mod face;
pub mod face_detection;
pub mod face_landmarks;
pub mod headless;
pub mod hud;
pub mod mouth;
pub mod processor;
pub mod status_queue;
pub mod utils;
pub mod webcam;

pub use error::{DetectorError, Result};
