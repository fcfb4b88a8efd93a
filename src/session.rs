use log::{error, info, warn};
use nalgebra as na;

use crate::calibrate::{calibrate, Calibration};
use crate::report::CalibrationReport;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Pattern is detected and drawn, nothing is collected.
    Detection,
    /// Detections are collected as samples.
    Capturing,
    Calibrated,
}

/// Sample collection and the mode machine of the calibration tool.
///
/// Image lists start out capturing and take every detection. Live inputs
/// wait for the start key and then only take a detection on the frame the
/// capture key was pressed.
#[derive(Debug)]
pub struct CaptureSession {
    mode: Mode,
    live: bool,
    nr_frames: usize,
    samples: Vec<Vec<na::Point2<f64>>>,
    capture_requested: bool,
    image_size: Option<(u32, u32)>,
    show_undistorted: bool,
}

impl CaptureSession {
    pub fn new(nr_frames: usize, live: bool) -> Self {
        Self {
            mode: if live { Mode::Detection } else { Mode::Capturing },
            live,
            nr_frames,
            samples: Vec::new(),
            capture_requested: false,
            image_size: None,
            show_undistorted: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn samples(&self) -> &[Vec<na::Point2<f64>>] {
        &self.samples
    }

    pub fn image_size(&self) -> Option<(u32, u32)> {
        self.image_size
    }

    /// Record the size of the current frame.
    pub fn observe_frame(&mut self, width: u32, height: u32) {
        self.image_size = Some((width, height));
    }

    /// Enough samples to calibrate.
    pub fn ready(&self) -> bool {
        self.mode == Mode::Capturing && self.samples.len() >= self.nr_frames
    }

    /// The source ran dry before calibration happened.
    pub fn needs_final_calibration(&self) -> bool {
        self.mode != Mode::Calibrated && !self.samples.is_empty()
    }

    pub fn request_capture(&mut self) {
        self.capture_requested = true;
    }

    /// Offer the detections of the current frame. Returns whether they were
    /// kept as a sample.
    pub fn offer(&mut self, points: &[na::Point2<f64>]) -> bool {
        if self.mode != Mode::Capturing || (self.live && !self.capture_requested) {
            return false;
        }
        self.samples.push(points.to_vec());
        true
    }

    /// A capture request only lasts for the frame it was made on.
    pub fn end_frame(&mut self) {
        self.capture_requested = false;
    }

    /// Start (or restart) collecting. Live inputs only.
    pub fn start_capturing(&mut self) -> bool {
        if !self.live {
            return false;
        }
        self.mode = Mode::Capturing;
        self.samples.clear();
        true
    }

    /// Initial state of the undistorted view, from the settings.
    pub fn set_show_undistorted(&mut self, show: bool) {
        self.show_undistorted = show;
    }

    /// Whether frames should be shown undistorted right now.
    pub fn undistort_view(&self) -> bool {
        self.mode == Mode::Calibrated && self.show_undistorted
    }

    /// Flip the undistorted view. Ignored until calibrated.
    pub fn toggle_undistorted(&mut self) -> bool {
        if self.mode != Mode::Calibrated {
            return false;
        }
        self.show_undistorted = !self.show_undistorted;
        true
    }

    pub fn status_text(&self) -> String {
        match self.mode {
            Mode::Capturing if self.show_undistorted => {
                format!("{}/{} Undist", self.samples.len(), self.nr_frames)
            }
            Mode::Capturing => format!("{}/{}", self.samples.len(), self.nr_frames),
            Mode::Calibrated => "Calibrated".into(),
            Mode::Detection => "Press 'g' to start".into(),
        }
    }

    /// Calibrate from the collected samples and save the results.
    ///
    /// Success moves to [`Mode::Calibrated`], failure back to
    /// [`Mode::Detection`]. A results file that cannot be written is logged
    /// and does not fail the calibration.
    pub fn run_calibration(&mut self, settings: &Settings) -> Option<Calibration> {
        let Some(image_size) = self.image_size else {
            warn!("no frame seen yet, nothing to calibrate");
            return None;
        };
        let object = settings.board.object_points();
        match calibrate(
            &object,
            &self.samples,
            image_size,
            &settings.calibration_options(),
        ) {
            Ok(calibration) => {
                info!(
                    "Calibration succeeded. avg re projection error = {:.5}",
                    calibration.avg_error
                );
                let report = CalibrationReport::from_calibration(
                    settings,
                    image_size,
                    &calibration,
                    &self.samples,
                    &object,
                );
                if let Err(e) = report.save(settings.results_path()) {
                    error!("could not save calibration results: {e}");
                }
                self.mode = Mode::Calibrated;
                Some(calibration)
            }
            Err(e) => {
                error!("Calibration failed: {e}");
                self.mode = Mode::Detection;
                None
            }
        }
    }
}
