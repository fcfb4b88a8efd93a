//! Synthetic board views for exercising the calibration pipeline without
//! a camera.

use std::f64::consts::PI;

use nalgebra as na;

use crate::board::BoardSpec;
use crate::camera::{CameraModel, Distortion, Intrinsics};

/// The camera used by the bundled synthetic scenario.
pub fn reference_camera() -> CameraModel {
    CameraModel {
        intrinsics: Intrinsics {
            fx: 800.0,
            fy: 780.0,
            cx: 320.0,
            cy: 240.0,
        },
        distortion: Distortion::none(false),
    }
}

/// `count` board poses centered on the optical axis, tilted in turn
/// around both board axes so the views are never parallel.
pub fn orbit_poses(board: &BoardSpec, count: usize) -> Vec<na::Isometry3<f64>> {
    let points = board.object_points();
    let n = points.len().max(1) as f64;
    let center = points.iter().fold(na::Vector3::zeros(), |acc, p| acc + p.coords) / n;

    (0..count)
        .map(|i| {
            let phase = 2.0 * PI * i as f64 / count.max(1) as f64 + 0.3;
            let rotation = na::UnitQuaternion::from_scaled_axis(na::Vector3::new(
                0.35 * phase.sin(),
                0.35 * phase.cos(),
                0.1 * (i % 3) as f64 - 0.1,
            ));
            let distance = 550.0 + 15.0 * (i % 5) as f64;
            let t = na::Vector3::new(0.0, 0.0, distance) - rotation * center;
            na::Isometry3::from_parts(t.into(), rotation)
        })
        .collect()
}

/// Perfect detections of `object_points` for each pose.
pub fn project_views(
    camera: &CameraModel,
    poses: &[na::Isometry3<f64>],
    object_points: &[na::Point3<f64>],
) -> Vec<Vec<na::Point2<f64>>> {
    poses
        .iter()
        .map(|pose| camera.project_points(pose, object_points))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::board::Pattern;

    #[test]
    fn views_stay_inside_the_image() {
        let board = BoardSpec {
            width: 9,
            height: 6,
            square_size: 25.0,
            pattern: Pattern::Chessboard,
        };
        let poses = orbit_poses(&board, 15);
        let views = project_views(&reference_camera(), &poses, &board.object_points());
        assert_eq!(views.len(), 15);
        for p in views.iter().flatten() {
            assert!(p.x > 0.0 && p.x < 640.0 && p.y > 0.0 && p.y < 480.0, "{p}");
        }
    }
}
