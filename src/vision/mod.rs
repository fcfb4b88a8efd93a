//! OpenCV-backed capture, detection, tracking and display.

pub mod capture;
pub mod convert;
pub mod detect;
pub mod display;
pub mod draw;
pub mod flow;
pub mod undistort;
