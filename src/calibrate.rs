use log::{debug, info};
use nalgebra as na;

use crate::board::to_planar;
use crate::camera::{rms_error, CameraModel, Distortion, Intrinsics};
use crate::error::{Error, Result};
use crate::homography::compute_h;
use crate::lm::{levenberg_marquardt, LmOptions};
use crate::refine::{ParamLayout, PlanarProblem};

type MatrixXx6<T> = na::Matrix<T, na::Dyn, na::U6, na::VecStorage<T, na::Dyn, na::U6>>;
type RowVector6<T> = na::Matrix<T, na::U1, na::U6, na::ArrayStorage<T, 1, 6>>;

/// Which parameters the solver may move.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationOptions {
    pub fisheye: bool,
    /// Hold `fx / fy` at this ratio.
    pub aspect_ratio: Option<f64>,
    /// Hold the principal point at the image center.
    pub fix_principal_point: bool,
    /// Hold `p1 = p2 = 0` (pinhole model only).
    pub zero_tangent_dist: bool,
    /// Hold `k1..k5` at zero. Fisheye uses the first four, pinhole uses
    /// `k1`, `k2`, `k3`.
    pub fix_k: [bool; 5],
}

/// Result of a planar calibration.
#[derive(Debug, Clone)]
pub struct Calibration {
    pub camera: CameraModel,
    /// Board → camera transform per view.
    pub poses: Vec<na::Isometry3<f64>>,
    pub per_view_errors: Vec<f64>,
    pub avg_error: f64,
}

fn v_ij(h: &na::Matrix3<f64>, i: usize, j: usize) -> RowVector6<f64> {
    let hi = h.column(i);
    let hj = h.column(j);
    RowVector6::<f64>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Solve for the image of the absolute conic `B = K^-T K^-1` from the view
/// homographies, assuming zero skew.
pub fn compute_b(homos: &[na::Matrix3<f64>]) -> Result<na::Matrix3<f64>> {
    if homos.len() < 2 {
        return Err(Error::NotEnoughViews {
            needed: 2,
            got: homos.len(),
        });
    }

    let rows = (homos.len() * 2 + 1).max(6);
    let mut a = MatrixXx6::<f64>::zeros(rows);
    for (idx, h) in homos.iter().enumerate() {
        // scale does not matter, conditioning does
        let h = h / h.norm();
        a.set_row(2 * idx, &v_ij(&h, 0, 1));
        a.set_row(2 * idx + 1, &(v_ij(&h, 0, 0) - v_ij(&h, 1, 1)));
    }
    // zero skew: B12 = 0
    a.set_row(
        homos.len() * 2,
        &RowVector6::<f64>::from_row_slice(&[0.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
    );

    let svd = a.svd(false, true);
    let null_idx = svd.singular_values.imin();
    let v_t = svd
        .v_t
        .ok_or_else(|| Error::Calibration("SVD did not produce V".into()))?;
    let b = v_t.row(null_idx);

    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);
    Ok(na::Matrix3::new(
        b11, b12, b13, //
        b12, b22, b23, //
        b13, b23, b33,
    ))
}

/// Closed-form intrinsics from `B`.
pub fn compute_k(b: &na::Matrix3<f64>) -> Result<na::Matrix3<f64>> {
    let b11 = b[(0, 0)];
    let b12 = b[(0, 1)];
    let b13 = b[(0, 2)];
    let b22 = b[(1, 1)];
    let b23 = b[(1, 2)];
    let b33 = b[(2, 2)];

    let denom = b11 * b22 - b12 * b12;
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k = na::Matrix3::new(
        alpha, gamma, u0, //
        0.0, beta, v0, //
        0.0, 0.0, 1.0,
    );
    if k.iter().all(|v| v.is_finite()) && alpha > 0.0 && beta > 0.0 {
        Ok(k)
    } else {
        Err(Error::Calibration(format!(
            "closed-form intrinsics are degenerate: {k}"
        )))
    }
}

/// Board → camera transform of one view from its homography.
pub fn compute_tf(h: &na::Matrix3<f64>, k: &na::Matrix3<f64>) -> Result<na::Isometry3<f64>> {
    let a = k
        .try_inverse()
        .ok_or_else(|| Error::Calibration("K is not invertible".into()))?
        * h;
    let mut scale = 1.0 / a.column(0).norm();
    // board must lie in front of the camera
    if a[(2, 2)] * scale < 0.0 {
        scale = -scale;
    }
    let r1 = a.column(0) * scale;
    let r2 = a.column(1) * scale;
    let r3 = r1.cross(&r2);
    let t = a.column(2) * scale;

    let mut r = na::Matrix3::<f64>::zeros();
    r.set_column(0, &r1);
    r.set_column(1, &r2);
    r.set_column(2, &r3);
    let r = na::Rotation3::<f64>::from_matrix_eps(&r, 1.0e-9, 100, na::Rotation3::identity());

    Ok(na::Isometry3::from_parts(
        na::Translation3::new(t[0], t[1], t[2]),
        na::UnitQuaternion::from_rotation_matrix(&r),
    ))
}

/// Per-view RMS reprojection error and the overall RMS over all points.
pub fn reprojection_errors(
    camera: &CameraModel,
    poses: &[na::Isometry3<f64>],
    object_points: &[na::Point3<f64>],
    views: &[Vec<na::Point2<f64>>],
) -> (Vec<f64>, f64) {
    let mut total_sq = 0.0;
    let mut total_points = 0;
    let per_view = poses
        .iter()
        .zip(views)
        .map(|(pose, observed)| {
            let projected = camera.project_points(pose, object_points);
            let (rms, sq) = rms_error(observed, &projected);
            total_sq += sq;
            total_points += observed.len();
            rms
        })
        .collect();
    (per_view, (total_sq / total_points.max(1) as f64).sqrt())
}

/// Calibrate from several views of a planar board.
///
/// Closed-form initialisation from the view homographies, then joint
/// refinement of intrinsics, distortion and poses.
pub fn calibrate(
    object_points: &[na::Point3<f64>],
    views: &[Vec<na::Point2<f64>>],
    image_size: (u32, u32),
    options: &CalibrationOptions,
) -> Result<Calibration> {
    if views.len() < 2 {
        return Err(Error::NotEnoughViews {
            needed: 2,
            got: views.len(),
        });
    }
    for (view, points) in views.iter().enumerate() {
        if points.len() != object_points.len() {
            return Err(Error::PointCountMismatch {
                view,
                got: points.len(),
                expected: object_points.len(),
            });
        }
    }

    let planar = to_planar(object_points);
    let hs = views
        .iter()
        .map(|view| compute_h(view, &planar))
        .collect::<Result<Vec<_>>>()?;

    let k = compute_k(&compute_b(&hs)?)?;
    debug!("closed-form K:{k}");

    let mut intrinsics = Intrinsics::from_matrix(&k);
    if options.fix_principal_point {
        intrinsics.cx = (image_size.0 as f64 - 1.0) * 0.5;
        intrinsics.cy = (image_size.1 as f64 - 1.0) * 0.5;
    }
    if let Some(ratio) = options.aspect_ratio {
        intrinsics.fx = ratio * intrinsics.fy;
    }
    let k = intrinsics.matrix();
    let poses = hs
        .iter()
        .map(|h| compute_tf(h, &k))
        .collect::<Result<Vec<_>>>()?;

    let initial = CameraModel {
        intrinsics,
        distortion: Distortion::none(options.fisheye),
    };
    let layout = ParamLayout::new(options);
    let problem = PlanarProblem::new(object_points, views, layout);
    let report = levenberg_marquardt(
        &problem,
        layout.encode(&initial, &poses),
        &LmOptions::default(),
    );
    debug!(
        "refinement: {} iterations, cost {:e}, converged {}",
        report.iterations, report.cost, report.converged
    );

    let camera = layout.decode_camera(&report.params);
    if !camera.is_valid() {
        return Err(Error::Calibration(format!(
            "parameters out of range: {camera:?}"
        )));
    }
    let poses = layout.decode_poses(&report.params, views.len());
    let (per_view_errors, avg_error) =
        reprojection_errors(&camera, &poses, object_points, views);
    for (i, err) in per_view_errors.iter().enumerate() {
        debug!("view {i}: reprojection error {err:.4}");
    }
    info!("re-projection error of the refined model: {avg_error:.5}");

    Ok(Calibration {
        camera,
        poses,
        per_view_errors,
        avg_error,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::board::{BoardSpec, Pattern};
    use crate::synthetic::{orbit_poses, project_views};
    use approx::assert_relative_eq;

    fn board() -> BoardSpec {
        BoardSpec {
            width: 9,
            height: 6,
            square_size: 25.0,
            pattern: Pattern::Chessboard,
        }
    }

    fn truth() -> CameraModel {
        CameraModel {
            intrinsics: Intrinsics {
                fx: 820.0,
                fy: 810.0,
                cx: 318.0,
                cy: 242.0,
            },
            distortion: Distortion::none(false),
        }
    }

    #[test]
    fn closed_form_matches_truth() {
        let board = board();
        let object = board.object_points();
        let poses = orbit_poses(&board, 10);
        let views = project_views(&truth(), &poses, &object);
        let planar = board.planar_points();
        let hs: Vec<_> = views.iter().map(|v| compute_h(v, &planar).unwrap()).collect();

        let k = compute_k(&compute_b(&hs).unwrap()).unwrap();
        assert_relative_eq!(k[(0, 0)], 820.0, epsilon = 1e-3);
        assert_relative_eq!(k[(1, 1)], 810.0, epsilon = 1e-3);
        assert_relative_eq!(k[(0, 2)], 318.0, epsilon = 1e-3);
        assert_relative_eq!(k[(1, 2)], 242.0, epsilon = 1e-3);

        let tf = compute_tf(&hs[3], &k).unwrap();
        assert_relative_eq!(
            tf.translation.vector,
            poses[3].translation.vector,
            epsilon = 1e-3
        );
    }

    #[test]
    fn recovers_radial_distortion() {
        let board = board();
        let object = board.object_points();
        let mut cam = truth();
        cam.distortion = Distortion::RadTan([-0.2, 0.05, 0.001, -0.0005, 0.0]);
        let poses = orbit_poses(&board, 12);
        let views = project_views(&cam, &poses, &object);

        let options = CalibrationOptions {
            fix_k: [false, false, true, false, false],
            ..Default::default()
        };
        let calib = calibrate(&object, &views, (640, 480), &options).unwrap();
        assert!(calib.avg_error < 1e-3, "error {}", calib.avg_error);
        assert_relative_eq!(calib.camera.intrinsics.fx, 820.0, epsilon = 0.1);
        let d = calib.camera.distortion.coefficients();
        assert_relative_eq!(d[0], -0.2, epsilon = 1e-3);
        assert_eq!(d[4], 0.0);
    }

    #[test]
    fn fixed_aspect_and_principal_point_are_held() {
        let board = board();
        let object = board.object_points();
        let mut cam = truth();
        cam.intrinsics = Intrinsics {
            fx: 800.0,
            fy: 800.0,
            cx: 319.5,
            cy: 239.5,
        };
        let poses = orbit_poses(&board, 8);
        let views = project_views(&cam, &poses, &object);

        let options = CalibrationOptions {
            aspect_ratio: Some(1.0),
            fix_principal_point: true,
            zero_tangent_dist: true,
            ..Default::default()
        };
        let calib = calibrate(&object, &views, (640, 480), &options).unwrap();
        let k = calib.camera.intrinsics;
        assert_eq!(k.cx, 319.5);
        assert_eq!(k.cy, 239.5);
        assert_relative_eq!(k.fx, k.fy, epsilon = 1e-9);
        let d = calib.camera.distortion.coefficients();
        assert_eq!((d[2], d[3]), (0.0, 0.0));
        assert!(calib.avg_error < 1e-3);
    }

    #[test]
    fn fisheye_model_fits_fisheye_data() {
        let board = board();
        let object = board.object_points();
        let mut cam = truth();
        cam.distortion = Distortion::Fisheye([0.05, -0.01, 0.0, 0.0]);
        let poses = orbit_poses(&board, 12);
        let views = project_views(&cam, &poses, &object);

        let options = CalibrationOptions {
            fisheye: true,
            fix_k: [false, false, true, true, false],
            ..Default::default()
        };
        let calib = calibrate(&object, &views, (640, 480), &options).unwrap();
        assert!(calib.camera.distortion.is_fisheye());
        assert!(calib.avg_error < 0.05, "error {}", calib.avg_error);
    }

    #[test]
    fn rejects_single_view() {
        let board = board();
        let object = board.object_points();
        let poses = orbit_poses(&board, 1);
        let views = project_views(&truth(), &poses, &object);
        assert!(matches!(
            calibrate(&object, &views, (640, 480), &CalibrationOptions::default()),
            Err(Error::NotEnoughViews { got: 1, .. })
        ));
    }

    #[test]
    fn rejects_short_view() {
        let board = board();
        let object = board.object_points();
        let poses = orbit_poses(&board, 3);
        let mut views = project_views(&truth(), &poses, &object);
        views[1].pop();
        assert!(matches!(
            calibrate(&object, &views, (640, 480), &CalibrationOptions::default()),
            Err(Error::PointCountMismatch { view: 1, .. })
        ));
    }
}
