use nalgebra as na;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pinhole intrinsics with zero skew.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn matrix(&self) -> na::Matrix3<f64> {
        na::Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(k: &na::Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    /// Pixel coordinates of a normalized image point.
    pub fn to_pixel(&self, xn: f64, yn: f64) -> na::Point2<f64> {
        na::Point2::new(self.fx * xn + self.cx, self.fy * yn + self.cy)
    }
}

/// Lens distortion in OpenCV coefficient order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Distortion {
    /// Brown-Conrady: `k1, k2, p1, p2, k3`.
    RadTan([f64; 5]),
    /// Equidistant fisheye: `k1, k2, k3, k4`.
    Fisheye([f64; 4]),
}

impl Distortion {
    pub fn none(fisheye: bool) -> Self {
        if fisheye {
            Self::Fisheye([0.0; 4])
        } else {
            Self::RadTan([0.0; 5])
        }
    }

    pub fn is_fisheye(&self) -> bool {
        matches!(self, Self::Fisheye(_))
    }

    pub fn coefficients(&self) -> &[f64] {
        match self {
            Self::RadTan(c) => c,
            Self::Fisheye(c) => c,
        }
    }

    /// Build from a stored coefficient list. Pinhole lists shorter than five
    /// entries are zero-padded, longer ones (rational model) are truncated.
    pub fn from_coefficients(fisheye: bool, coeffs: &[f64]) -> Result<Self> {
        if fisheye {
            let c: [f64; 4] = coeffs.try_into().map_err(|_| {
                Error::Calibration(format!(
                    "fisheye model needs 4 distortion coefficients, got {}",
                    coeffs.len()
                ))
            })?;
            return Ok(Self::Fisheye(c));
        }
        if coeffs.len() < 4 {
            return Err(Error::Calibration(format!(
                "pinhole model needs at least 4 distortion coefficients, got {}",
                coeffs.len()
            )));
        }
        let mut c = [0.0; 5];
        for (dst, src) in c.iter_mut().zip(coeffs) {
            *dst = *src;
        }
        Ok(Self::RadTan(c))
    }

    /// Distort a normalized image point.
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        match *self {
            Self::RadTan([k1, k2, p1, p2, k3]) => {
                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                (
                    x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
                    y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
                )
            }
            Self::Fisheye([k1, k2, k3, k4]) => {
                let r = (x * x + y * y).sqrt();
                if r < 1e-12 {
                    return (x, y);
                }
                let theta = r.atan();
                let t2 = theta * theta;
                let theta_d = theta * (1.0 + t2 * (k1 + t2 * (k2 + t2 * (k3 + t2 * k4))));
                let scale = theta_d / r;
                (x * scale, y * scale)
            }
        }
    }
}

/// Intrinsics plus distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
}

impl CameraModel {
    /// Project a point given in camera coordinates.
    pub fn project(&self, pt: &na::Point3<f64>) -> na::Point2<f64> {
        let (xd, yd) = self.distortion.apply(pt.x / pt.z, pt.y / pt.z);
        self.intrinsics.to_pixel(xd, yd)
    }

    /// Project board points seen from `pose` (board → camera).
    pub fn project_points(
        &self,
        pose: &na::Isometry3<f64>,
        object_points: &[na::Point3<f64>],
    ) -> Vec<na::Point2<f64>> {
        object_points
            .iter()
            .map(|p| self.project(&(pose * p)))
            .collect()
    }

    /// Finite parameters and positive focal lengths.
    pub fn is_valid(&self) -> bool {
        let k = &self.intrinsics;
        let finite = [k.fx, k.fy, k.cx, k.cy]
            .iter()
            .chain(self.distortion.coefficients())
            .all(|v| v.is_finite());
        finite && k.fx > 0.0 && k.fy > 0.0
    }
}

/// Rotation vector + translation in OpenCV's `rvec`/`tvec` layout.
pub fn pose_to_vectors(pose: &na::Isometry3<f64>) -> [f64; 6] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

pub fn pose_from_vectors(v: &[f64]) -> na::Isometry3<f64> {
    na::Isometry3::new(
        na::Vector3::new(v[3], v[4], v[5]),
        na::Vector3::new(v[0], v[1], v[2]),
    )
}

/// True when `r` is orthonormal to within 1e-6.
pub fn is_rotation_matrix(r: &na::Matrix3<f64>) -> bool {
    (r.transpose() * r - na::Matrix3::identity()).norm() < 1e-6
}

/// Root mean square distance between paired point sets, plus the summed
/// squared error it was computed from.
pub fn rms_error(observed: &[na::Point2<f64>], projected: &[na::Point2<f64>]) -> (f64, f64) {
    let sq: f64 = observed
        .iter()
        .zip(projected)
        .map(|(a, b)| (a - b).norm_squared())
        .sum();
    let n = observed.len().max(1) as f64;
    ((sq / n).sqrt(), sq)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn camera(distortion: Distortion) -> CameraModel {
        CameraModel {
            intrinsics: Intrinsics {
                fx: 800.0,
                fy: 780.0,
                cx: 320.0,
                cy: 240.0,
            },
            distortion,
        }
    }

    #[test]
    fn undistorted_projection_is_pinhole() {
        let cam = camera(Distortion::none(false));
        let p = cam.project(&na::Point3::new(0.1, -0.2, 2.0));
        assert_relative_eq!(p.x, 320.0 + 800.0 * 0.05, epsilon = 1e-12);
        assert_relative_eq!(p.y, 240.0 - 780.0 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn fisheye_without_coefficients_is_equidistant() {
        let d = Distortion::none(true);
        let (x, _) = d.apply(1.0, 0.0);
        assert_relative_eq!(x, std::f64::consts::FRAC_PI_4, epsilon = 1e-12);
        assert_eq!(d.apply(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn radial_distortion_pushes_points_out() {
        let d = Distortion::RadTan([0.1, 0.0, 0.0, 0.0, 0.0]);
        let (x, y) = d.apply(0.5, 0.0);
        assert_relative_eq!(x, 0.5 * (1.0 + 0.1 * 0.25), epsilon = 1e-12);
        assert_eq!(y, 0.0);
    }

    #[test]
    fn coefficient_lists() {
        let d = Distortion::from_coefficients(false, &[0.1, 0.2, 0.0, 0.0]).unwrap();
        assert_eq!(d, Distortion::RadTan([0.1, 0.2, 0.0, 0.0, 0.0]));
        let d = Distortion::from_coefficients(false, &[1.0; 8]).unwrap();
        assert_eq!(d.coefficients().len(), 5);
        assert!(Distortion::from_coefficients(true, &[0.0; 5]).is_err());
        assert!(Distortion::from_coefficients(false, &[0.0; 2]).is_err());
    }

    #[test]
    fn pose_vectors_round_trip() {
        let v = [0.1, -0.2, 0.3, 10.0, -5.0, 600.0];
        let back = pose_to_vectors(&pose_from_vectors(&v));
        for (a, b) in v.iter().zip(back.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn invalid_models() {
        let mut cam = camera(Distortion::none(false));
        assert!(cam.is_valid());
        cam.intrinsics.fx = f64::NAN;
        assert!(!cam.is_valid());
        let cam = camera(Distortion::RadTan([f64::INFINITY, 0.0, 0.0, 0.0, 0.0]));
        assert!(!cam.is_valid());
    }
}
