use opencv::{
    calib3d,
    core::{self, Size},
    imgproc,
    prelude::*,
};

use crate::camera::CameraModel;
use crate::error::Result;
use crate::vision::convert::{camera_matrix_to_cv, coefficients_to_cv};

/// Precomputed remap tables for one camera and image size.
pub struct Undistorter {
    map1: Mat,
    map2: Mat,
}

impl Undistorter {
    /// Rescaled so the whole undistorted image stays visible.
    pub fn new(camera: &CameraModel, image_size: (u32, u32)) -> Result<Self> {
        Self::build(camera, image_size, false)
    }

    /// Keeps the original camera matrix, so overlays projected with it line
    /// up with the undistorted frame.
    pub fn same_camera(camera: &CameraModel, image_size: (u32, u32)) -> Result<Self> {
        Self::build(camera, image_size, true)
    }

    fn build(camera: &CameraModel, image_size: (u32, u32), keep_k: bool) -> Result<Self> {
        let k = camera_matrix_to_cv(&camera.intrinsics.matrix())?;
        let d = coefficients_to_cv(camera.distortion.coefficients())?;
        let size = Size::new(image_size.0 as i32, image_size.1 as i32);
        let eye = Mat::eye(3, 3, core::CV_64F)?.to_mat()?;
        let mut map1 = Mat::default();
        let mut map2 = Mat::default();

        if camera.distortion.is_fisheye() {
            let mut new_k = k.try_clone()?;
            if !keep_k {
                calib3d::fisheye_estimate_new_camera_matrix_for_undistort_rectify(
                    &k, &d, size, &eye, &mut new_k, 1.0, size, 1.0,
                )?;
            }
            calib3d::fisheye_init_undistort_rectify_map(
                &k,
                &d,
                &eye,
                &new_k,
                size,
                core::CV_16SC2,
                &mut map1,
                &mut map2,
            )?;
        } else {
            let new_k = if keep_k {
                k.try_clone()?
            } else {
                let mut roi = core::Rect::default();
                calib3d::get_optimal_new_camera_matrix(&k, &d, size, 1.0, size, &mut roi, false)?
            };
            calib3d::init_undistort_rectify_map(
                &k,
                &d,
                &core::no_array(),
                &new_k,
                size,
                core::CV_16SC2,
                &mut map1,
                &mut map2,
            )?;
        }
        Ok(Self { map1, map2 })
    }

    pub fn apply(&self, frame: &Mat) -> Result<Mat> {
        let mut out = Mat::default();
        imgproc::remap(
            frame,
            &mut out,
            &self.map1,
            &self.map2,
            imgproc::INTER_LINEAR,
            core::BORDER_CONSTANT,
            core::Scalar::default(),
        )?;
        Ok(out)
    }
}
