use nalgebra as na;

use crate::calibrate::CalibrationOptions;
use crate::camera::{pose_from_vectors, pose_to_vectors, CameraModel, Distortion, Intrinsics};
use crate::lm;

type Matrix2x9<T> = na::Matrix<T, na::U2, na::U9, na::ArrayStorage<T, 2, 9>>;

const POSE_PARAMS: usize = 6;

/// How the camera model and per-view poses are packed into the flat
/// parameter vector.
///
/// The first `intrinsic_len()` entries are `fx, fy, cx, cy` followed by the
/// distortion coefficients; after those, each view contributes a rotation
/// vector and a translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamLayout {
    pub fisheye: bool,
    /// Per intrinsic parameter: may the solver move it.
    pub free: [bool; 9],
    pub aspect_ratio: Option<f64>,
}

impl ParamLayout {
    pub fn new(options: &CalibrationOptions) -> Self {
        let mut free = [true; 9];
        if options.fix_principal_point {
            free[2] = false;
            free[3] = false;
        }
        if options.aspect_ratio.is_some() {
            // fx follows fy
            free[0] = false;
        }
        if options.fisheye {
            for (i, fixed) in options.fix_k[..4].iter().enumerate() {
                free[4 + i] &= !fixed;
            }
            free[8] = false;
        } else {
            free[4] = !options.fix_k[0];
            free[5] = !options.fix_k[1];
            free[6] = !options.zero_tangent_dist;
            free[7] = !options.zero_tangent_dist;
            free[8] = !options.fix_k[2];
        }
        Self {
            fisheye: options.fisheye,
            free,
            aspect_ratio: options.aspect_ratio,
        }
    }

    pub fn intrinsic_len(&self) -> usize {
        if self.fisheye {
            8
        } else {
            9
        }
    }

    pub fn len(&self, num_views: usize) -> usize {
        self.intrinsic_len() + POSE_PARAMS * num_views
    }

    pub fn encode(&self, camera: &CameraModel, poses: &[na::Isometry3<f64>]) -> na::DVector<f64> {
        let mut param = na::DVector::<f64>::zeros(self.len(poses.len()));
        let k = &camera.intrinsics;
        param[0] = k.fx;
        param[1] = k.fy;
        param[2] = k.cx;
        param[3] = k.cy;
        for (i, c) in camera
            .distortion
            .coefficients()
            .iter()
            .take(self.intrinsic_len() - 4)
            .enumerate()
        {
            param[4 + i] = *c;
        }
        for (idx, pose) in poses.iter().enumerate() {
            param
                .fixed_view_mut::<6, 1>(self.intrinsic_len() + POSE_PARAMS * idx, 0)
                .copy_from_slice(&pose_to_vectors(pose));
        }
        param
    }

    pub fn decode_camera(&self, param: &na::DVector<f64>) -> CameraModel {
        let fy = param[1];
        let fx = match self.aspect_ratio {
            Some(ratio) => ratio * fy,
            None => param[0],
        };
        let intrinsics = Intrinsics {
            fx,
            fy,
            cx: param[2],
            cy: param[3],
        };
        let distortion = if self.fisheye {
            Distortion::Fisheye([param[4], param[5], param[6], param[7]])
        } else {
            Distortion::RadTan([param[4], param[5], param[6], param[7], param[8]])
        };
        CameraModel {
            intrinsics,
            distortion,
        }
    }

    pub fn decode_poses(&self, param: &na::DVector<f64>, num_views: usize) -> Vec<na::Isometry3<f64>> {
        (0..num_views)
            .map(|i| {
                let start = self.intrinsic_len() + POSE_PARAMS * i;
                pose_from_vectors(&param.as_slice()[start..start + POSE_PARAMS])
            })
            .collect()
    }
}

/// Jacobian of the radial-tangential projection with respect to
/// `fx, fy, cx, cy, k1, k2, p1, p2, k3`. `pt` is in camera coordinates.
fn radtan_jacobian_wrt_params(camera: &CameraModel, pt: &na::Point3<f64>) -> Matrix2x9<f64> {
    let fx = camera.intrinsics.fx;
    let fy = camera.intrinsics.fy;
    let x = pt.x / pt.z;
    let y = pt.y / pt.z;
    let (xd, yd) = camera.distortion.apply(x, y);
    let r2 = x * x + y * y;
    let r4 = r2 * r2;
    let r6 = r4 * r2;

    Matrix2x9::<f64>::from_row_slice(&[
        xd,
        0.0,
        1.0,
        0.0,
        fx * x * r2,
        fx * x * r4,
        fx * 2.0 * x * y,
        fx * (r2 + 2.0 * x * x),
        fx * x * r6,
        //
        0.0,
        yd,
        0.0,
        1.0,
        fy * y * r2,
        fy * y * r4,
        fy * (r2 + 2.0 * y * y),
        fy * 2.0 * x * y,
        fy * y * r6,
    ])
}

fn step_for(value: f64) -> f64 {
    1e-6 * (1.0 + value.abs())
}

/// Reprojection residuals of a planar board seen in several views.
pub struct PlanarProblem<'a> {
    model_pts: &'a [na::Point3<f64>],
    image_pts_set: &'a [Vec<na::Point2<f64>>],
    layout: ParamLayout,
}

impl<'a> PlanarProblem<'a> {
    pub fn new(
        model_pts: &'a [na::Point3<f64>],
        image_pts_set: &'a [Vec<na::Point2<f64>>],
        layout: ParamLayout,
    ) -> Self {
        Self {
            model_pts,
            image_pts_set,
            layout,
        }
    }

    fn num_residuals(&self) -> usize {
        2 * self.model_pts.len() * self.image_pts_set.len()
    }

    /// Central differences over the intrinsic block, for models without a
    /// closed-form Jacobian.
    fn numeric_intrinsics(
        &self,
        param: &na::DVector<f64>,
        pose: &na::Isometry3<f64>,
        target_pt: &na::Point3<f64>,
        out: &mut na::DMatrix<f64>,
        row: usize,
    ) {
        let transformed = pose * target_pt;
        let mut p = param.clone();
        for col in 0..self.layout.intrinsic_len() {
            let h = step_for(param[col]);
            p[col] = param[col] + h;
            let plus = self.layout.decode_camera(&p).project(&transformed);
            p[col] = param[col] - h;
            let minus = self.layout.decode_camera(&p).project(&transformed);
            p[col] = param[col];
            let d = (plus - minus) / (2.0 * h);
            out[(row, col)] = d.x;
            out[(row + 1, col)] = d.y;
        }
    }
}

impl lm::LMProblem for PlanarProblem<'_> {
    fn residual(&self, param: &na::DVector<f64>) -> na::DVector<f64> {
        let camera = self.layout.decode_camera(param);
        let transforms = self.layout.decode_poses(param, self.image_pts_set.len());

        let mut residual = na::DVector::<f64>::zeros(self.num_residuals());
        let mut residual_idx = 0;
        for (image_pts, transform) in self.image_pts_set.iter().zip(transforms.iter()) {
            for (observed, target_pt) in image_pts.iter().zip(self.model_pts.iter()) {
                let projected = camera.project(&(transform * target_pt));
                residual
                    .fixed_view_mut::<2, 1>(residual_idx, 0)
                    .copy_from(&(projected - observed));
                residual_idx += 2;
            }
        }
        residual
    }

    fn jacobian(&self, param: &na::DVector<f64>) -> na::DMatrix<f64> {
        let layout = &self.layout;
        let n_int = layout.intrinsic_len();
        let camera = layout.decode_camera(param);
        let transforms = layout.decode_poses(param, self.image_pts_set.len());

        let mut jacobian =
            na::DMatrix::<f64>::zeros(self.num_residuals(), layout.len(transforms.len()));

        let mut residual_idx = 0;
        for (tform_idx, transform) in transforms.iter().enumerate() {
            let col = n_int + POSE_PARAMS * tform_idx;
            let pose_vec = pose_to_vectors(transform);

            for target_pt in self.model_pts.iter() {
                let transformed = transform * target_pt;
                if layout.fisheye {
                    self.numeric_intrinsics(param, transform, target_pt, &mut jacobian, residual_idx);
                } else {
                    jacobian
                        .fixed_view_mut::<2, 9>(residual_idx, 0)
                        .copy_from(&radtan_jacobian_wrt_params(&camera, &transformed));
                }

                let mut v = pose_vec;
                for k in 0..POSE_PARAMS {
                    let h = step_for(pose_vec[k]);
                    v[k] = pose_vec[k] + h;
                    let plus = camera.project(&(pose_from_vectors(&v) * target_pt));
                    v[k] = pose_vec[k] - h;
                    let minus = camera.project(&(pose_from_vectors(&v) * target_pt));
                    v[k] = pose_vec[k];
                    let d = (plus - minus) / (2.0 * h);
                    jacobian[(residual_idx, col + k)] = d.x;
                    jacobian[(residual_idx + 1, col + k)] = d.y;
                }
                residual_idx += 2;
            }
        }

        if let Some(ratio) = layout.aspect_ratio {
            // d/dfy of (ratio * fy) flows through the fx column
            let col_fx = jacobian.column(0).clone_owned();
            let mut col_fy = jacobian.column_mut(1);
            col_fy += col_fx * ratio;
        }
        for (i, free) in layout.free.iter().take(n_int).enumerate() {
            if !free {
                jacobian.column_mut(i).fill(0.0);
            }
        }
        jacobian
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lm::LMProblem;
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

    fn pose() -> na::Isometry3<f64> {
        na::Isometry3::new(
            na::Vector3::new(-100.0, -60.0, 600.0),
            na::Vector3::new(0.2, -0.1, 0.05),
        )
    }

    fn model() -> Vec<na::Point3<f64>> {
        (0..12)
            .map(|i| na::Point3::new((i % 4) as f64 * 30.0, (i / 4) as f64 * 30.0, 0.0))
            .collect()
    }

    #[test]
    fn encode_decode_round_trip() {
        let layout = ParamLayout::new(&CalibrationOptions::default());
        let cam = camera(Distortion::RadTan([0.1, -0.02, 0.001, 0.002, 0.003]));
        let p = layout.encode(&cam, &[pose(), pose()]);
        assert_eq!(p.len(), 9 + 12);
        assert_eq!(layout.decode_camera(&p), cam);
        let poses = layout.decode_poses(&p, 2);
        assert_relative_eq!(
            poses[1].translation.vector,
            pose().translation.vector,
            epsilon = 1e-12
        );
    }

    #[test]
    fn analytic_jacobian_matches_numeric() {
        let options = CalibrationOptions::default();
        let layout = ParamLayout::new(&options);
        let cam = camera(Distortion::RadTan([0.1, -0.02, 0.001, 0.002, 0.003]));
        let model = model();
        let observed = vec![cam.project_points(&pose(), &model)];
        let problem = PlanarProblem::new(&model, &observed, layout);
        let p = layout.encode(&cam, &[pose()]);

        let analytic = problem.jacobian(&p);
        for col in 0..9 {
            let h = step_for(p[col]);
            let mut plus = p.clone();
            plus[col] += h;
            let mut minus = p.clone();
            minus[col] -= h;
            let numeric = (problem.residual(&plus) - problem.residual(&minus)) / (2.0 * h);
            for row in 0..numeric.len() {
                assert_relative_eq!(
                    analytic[(row, col)],
                    numeric[row],
                    epsilon = 1e-4,
                    max_relative = 1e-5
                );
            }
        }
    }

    #[test]
    fn fixed_parameters_have_zero_columns() {
        let options = CalibrationOptions {
            fix_principal_point: true,
            zero_tangent_dist: true,
            fix_k: [false, false, true, false, false],
            aspect_ratio: Some(1.0),
            ..Default::default()
        };
        let layout = ParamLayout::new(&options);
        let cam = camera(Distortion::none(false));
        let model = model();
        let observed = vec![cam.project_points(&pose(), &model)];
        let problem = PlanarProblem::new(&model, &observed, layout);
        let j = problem.jacobian(&layout.encode(&cam, &[pose()]));
        for col in [0, 2, 3, 6, 7, 8] {
            assert_eq!(j.column(col).norm(), 0.0, "column {col}");
        }
        assert!(j.column(1).norm() > 0.0);
    }

    #[test]
    fn fisheye_layout_is_shorter() {
        let options = CalibrationOptions {
            fisheye: true,
            ..Default::default()
        };
        let layout = ParamLayout::new(&options);
        assert_eq!(layout.intrinsic_len(), 8);
        let cam = camera(Distortion::Fisheye([0.01, 0.02, 0.0, 0.0]));
        let p = layout.encode(&cam, &[pose()]);
        assert_eq!(layout.decode_camera(&p), cam);
    }
}
