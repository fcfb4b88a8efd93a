use argmin::core::{Executor, Jacobian, Operator, State};
use argmin::solver::gaussnewton::GaussNewton;
use log::debug;
use nalgebra as na;

use crate::board::to_planar;
use crate::calibrate::compute_tf;
use crate::camera::{
    is_rotation_matrix, pose_from_vectors, pose_to_vectors, rms_error, CameraModel, Distortion,
};
use crate::error::{Error, Result};
use crate::homography::compute_h;

const MAX_ITERS: u64 = 20;

/// Board pose in one frame plus everything the overlay draws from it.
#[derive(Debug, Clone)]
pub struct PoseEstimate {
    /// Board → camera.
    pub pose: na::Isometry3<f64>,
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
    /// RMS distance between detections and the refined back-projection.
    pub rmse: f64,
    /// Roll, pitch, yaw in degrees.
    pub euler_degrees: Option<[f64; 3]>,
    /// `K · [r1 r2 t]`, board plane to image.
    pub scene_to_image: na::Matrix3<f64>,
    pub image_to_scene: Option<na::Matrix3<f64>>,
    /// Origin and the X, Y, Z axis ends, projected without distortion.
    pub axes: [na::Point2<f64>; 4],
}

/// Reprojection residuals of a single view over `rvec, tvec`.
struct PnpProblem<'a> {
    camera: &'a CameraModel,
    object_points: &'a [na::Point3<f64>],
    image_points: &'a [na::Point2<f64>],
}

impl PnpProblem<'_> {
    fn residuals(&self, v: &[f64]) -> na::DVector<f64> {
        let pose = pose_from_vectors(v);
        let mut r = na::DVector::zeros(2 * self.object_points.len());
        for (i, (obj, img)) in self.object_points.iter().zip(self.image_points).enumerate() {
            let d = self.camera.project(&(pose * obj)) - img;
            r[2 * i] = d.x;
            r[2 * i + 1] = d.y;
        }
        r
    }
}

impl Operator for PnpProblem<'_> {
    type Param = na::DVector<f64>;
    type Output = na::DVector<f64>;

    fn apply(&self, p: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        Ok(self.residuals(p.as_slice()))
    }
}

impl Jacobian for PnpProblem<'_> {
    type Param = na::DVector<f64>;
    type Jacobian = na::DMatrix<f64>;

    fn jacobian(&self, p: &Self::Param) -> std::result::Result<Self::Jacobian, argmin::core::Error> {
        let mut j = na::DMatrix::zeros(2 * self.object_points.len(), 6);
        let mut v = p.clone();
        for k in 0..6 {
            let h = 1e-6 * (1.0 + p[k].abs());
            v[k] = p[k] + h;
            let plus = self.residuals(v.as_slice());
            v[k] = p[k] - h;
            let minus = self.residuals(v.as_slice());
            v[k] = p[k];
            j.set_column(k, &((plus - minus) / (2.0 * h)));
        }
        Ok(j)
    }
}

/// Board → camera pose from one view of a planar board.
///
/// Initialised from the board homography, then refined with Gauss-Newton
/// on the full (distorted) projection.
pub fn solve_pnp(
    camera: &CameraModel,
    object_points: &[na::Point3<f64>],
    image_points: &[na::Point2<f64>],
) -> Result<na::Isometry3<f64>> {
    if object_points.len() != image_points.len() {
        return Err(Error::PointCountMismatch {
            view: 0,
            got: image_points.len(),
            expected: object_points.len(),
        });
    }
    let h = compute_h(image_points, &to_planar(object_points))?;
    let init = compute_tf(&h, &camera.intrinsics.matrix())?;

    let problem = PnpProblem {
        camera,
        object_points,
        image_points,
    };
    let solver: GaussNewton<f64> = GaussNewton::new();
    let init = na::DVector::from_row_slice(&pose_to_vectors(&init));
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(MAX_ITERS))
        .run()
        .map_err(|e| Error::Pose(e.to_string()))?;

    let state = res.state();
    debug!(
        "solve_pnp: {} iterations, cost {:e}",
        state.get_iter(),
        state.get_best_cost()
    );
    let best = state
        .get_best_param()
        .or(state.get_param())
        .ok_or_else(|| Error::Pose("solver returned no parameters".into()))?;
    Ok(pose_from_vectors(best.as_slice()))
}

/// Roll, pitch, yaw (degrees) of a rotation matrix, `None` when the matrix
/// is not orthonormal.
pub fn euler_degrees(r: &na::Matrix3<f64>) -> Option<[f64; 3]> {
    if !is_rotation_matrix(r) {
        return None;
    }
    let (roll, pitch, yaw) = na::Rotation3::from_matrix_unchecked(*r).euler_angles();
    Some([roll.to_degrees(), pitch.to_degrees(), yaw.to_degrees()])
}

/// `K · [r1 r2 t]`: maps board-plane coordinates to pixels, ignoring
/// distortion.
pub fn scene_homography(k: &na::Matrix3<f64>, pose: &na::Isometry3<f64>) -> na::Matrix3<f64> {
    let r = pose.rotation.to_rotation_matrix();
    let r = r.matrix();
    let mut rt = na::Matrix3::<f64>::zeros();
    rt.set_column(0, &r.column(0));
    rt.set_column(1, &r.column(1));
    rt.set_column(2, &pose.translation.vector);
    k * rt
}

/// Full per-frame estimate: pose, residual, Euler angles, axis overlay and
/// the homographies used for measurement.
pub fn estimate(
    camera: &CameraModel,
    object_points: &[na::Point3<f64>],
    image_points: &[na::Point2<f64>],
    square_size: f64,
) -> Result<PoseEstimate> {
    let pose = solve_pnp(camera, object_points, image_points)?;
    let projected = camera.project_points(&pose, object_points);
    let (rmse, _) = rms_error(image_points, &projected);
    debug!("back-projection rmse {rmse:.4}");

    let v = pose_to_vectors(&pose);
    let rotation = pose.rotation.to_rotation_matrix();
    let k = camera.intrinsics.matrix();
    let scene_to_image = scene_homography(&k, &pose);

    let len = 3.0 * square_size;
    let undistorted = CameraModel {
        intrinsics: camera.intrinsics,
        distortion: Distortion::none(false),
    };
    let ends = [
        na::Point3::origin(),
        na::Point3::new(len, 0.0, 0.0),
        na::Point3::new(0.0, len, 0.0),
        na::Point3::new(0.0, 0.0, len),
    ];
    let axes = ends.map(|p| undistorted.project(&(pose * p)));

    Ok(PoseEstimate {
        pose,
        rvec: [v[0], v[1], v[2]],
        tvec: [v[3], v[4], v[5]],
        rmse,
        euler_degrees: euler_degrees(rotation.matrix()),
        scene_to_image,
        image_to_scene: scene_to_image.try_inverse(),
        axes,
    })
}
