use image::RgbImage;
use nalgebra as na;
use opencv::{core, imgproc, prelude::*};

use crate::error::Result;

/// BGR `Mat` from an RGB image.
pub fn rgb_to_mat(image: &RgbImage) -> Result<Mat> {
    let (w, h) = image.dimensions();
    let mut mat = Mat::new_rows_cols_with_default(
        h as i32,
        w as i32,
        core::CV_8UC3,
        core::Scalar::all(0.0),
    )?;
    let bytes = mat.data_bytes_mut()?;
    for (dst, src) in bytes.chunks_exact_mut(3).zip(image.pixels()) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }
    Ok(mat)
}

pub fn to_gray(frame: &Mat) -> Result<Mat> {
    let mut gray = Mat::default();
    imgproc::cvt_color(frame, &mut gray, imgproc::COLOR_BGR2GRAY, 0)?;
    Ok(gray)
}

pub fn points_from_cv(points: &core::Vector<core::Point2f>) -> Vec<na::Point2<f64>> {
    points
        .iter()
        .map(|p| na::Point2::new(p.x as f64, p.y as f64))
        .collect()
}

pub fn points_to_cv(points: &[na::Point2<f64>]) -> core::Vector<core::Point2f> {
    points
        .iter()
        .map(|p| core::Point2f::new(p.x as f32, p.y as f32))
        .collect()
}

pub fn pixel(p: &na::Point2<f64>) -> core::Point {
    core::Point::new(p.x.round() as i32, p.y.round() as i32)
}

pub fn camera_matrix_to_cv(k: &na::Matrix3<f64>) -> Result<Mat> {
    let rows: Vec<Vec<f64>> = (0..3).map(|r| k.row(r).iter().cloned().collect()).collect();
    Ok(Mat::from_slice_2d(&rows)?)
}

pub fn coefficients_to_cv(coeffs: &[f64]) -> Result<Mat> {
    Ok(Mat::from_slice(coeffs)?.try_clone()?)
}

/// Paint every non-black pixel of `mask` onto `frame`.
pub fn composite_mask(mask: &RgbImage, frame: &mut Mat) -> Result<()> {
    let overlay = rgb_to_mat(mask)?;
    let gray = to_gray(&overlay)?;
    overlay.copy_to_masked(frame, &gray)?;
    Ok(())
}
