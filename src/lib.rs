//! Planar-target camera calibration, board pose and distance measurement,
//! and a Lucas-Kanade point tracker.
//!
//! The numerical core (homographies, Zhang initialisation, Levenberg-Marquardt
//! refinement, pose estimation) and the interactive state (settings, sample
//! collection, overlay, tracker lifecycle) are plain Rust. Capture, pattern
//! detection, optical flow and windows live in [`vision`] behind the
//! `opencv` feature.

pub mod board;
pub mod calibrate;
pub mod camera;
pub mod error;
pub mod homography;
pub mod keys;
pub mod lm;
pub mod output;
pub mod overlay;
pub mod pose;
pub mod refine;
pub mod report;
pub mod session;
pub mod settings;
pub mod source;
pub mod synthetic;
pub mod tracker;

#[cfg(feature = "opencv")]
pub mod vision;

pub use error::{Error, Result};
