use std::path::Path;

use log::info;
use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::calibrate::Calibration;
use crate::camera::{pose_to_vectors, CameraModel, Distortion, Intrinsics};
use crate::error::Result;
use crate::settings::Settings;

/// Calibration results as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub calibration_time: String,
    pub nr_of_frames: usize,
    pub image_width: u32,
    pub image_height: u32,
    pub board_width: u32,
    pub board_height: u32,
    pub square_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_aspect_ratio: Option<f64>,
    pub flags: i32,
    #[serde(default)]
    pub flag_names: Vec<String>,
    pub fisheye_model: bool,
    /// Row-major.
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: Vec<f64>,
    pub avg_reprojection_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_view_reprojection_errors: Option<Vec<f64>>,
    /// Rotation vector + translation vector per view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic_parameters: Option<Vec<[f64; 6]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_points: Option<Vec<Vec<[f64; 2]>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_points: Option<Vec<[f64; 3]>>,
}

impl CalibrationReport {
    pub fn from_calibration(
        settings: &Settings,
        image_size: (u32, u32),
        calibration: &Calibration,
        image_points: &[Vec<na::Point2<f64>>],
        grid_points: &[na::Point3<f64>],
    ) -> Self {
        let flags = settings.flags();
        let k = calibration.camera.intrinsics.matrix();
        let write_extrinsics = settings.write_extrinsics && !calibration.poses.is_empty();

        Self {
            calibration_time: chrono::Local::now().format("%c").to_string(),
            nr_of_frames: calibration.poses.len(),
            image_width: image_size.0,
            image_height: image_size.1,
            board_width: settings.board.width,
            board_height: settings.board.height,
            square_size: settings.board.square_size,
            fix_aspect_ratio: settings.calibration_options().aspect_ratio,
            flags: flags.bits(),
            flag_names: flags.names().into_iter().map(String::from).collect(),
            fisheye_model: settings.use_fisheye,
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortion_coefficients: calibration.camera.distortion.coefficients().to_vec(),
            avg_reprojection_error: calibration.avg_error,
            per_view_reprojection_errors: (settings.write_extrinsics
                && !calibration.per_view_errors.is_empty())
            .then(|| calibration.per_view_errors.clone()),
            extrinsic_parameters: write_extrinsics
                .then(|| calibration.poses.iter().map(pose_to_vectors).collect()),
            image_points: (settings.write_points && !image_points.is_empty()).then(|| {
                image_points
                    .iter()
                    .map(|view| view.iter().map(|p| [p.x, p.y]).collect())
                    .collect()
            }),
            grid_points: (settings.write_grid && !grid_points.is_empty())
                .then(|| grid_points.iter().map(|p| [p.x, p.y, p.z]).collect()),
        }
    }

    pub fn camera_matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::from_fn(|r, c| self.camera_matrix[r][c])
    }

    /// The camera model the report describes.
    pub fn camera_model(&self) -> Result<CameraModel> {
        Ok(CameraModel {
            intrinsics: Intrinsics::from_matrix(&self.camera_matrix()),
            distortion: Distortion::from_coefficients(
                self.fisheye_model,
                &self.distortion_coefficients,
            )?,
        })
    }

    /// Write pretty-printed JSON, creating the parent folder if needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("calibration results written to {}", path.display());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("reading calibration results from {}", path.display());
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}
