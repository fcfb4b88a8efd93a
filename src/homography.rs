use nalgebra as na;

use crate::error::{Error, Result};

type MatrixXx9<T> = na::Matrix<T, na::Dyn, na::U9, na::VecStorage<T, na::Dyn, na::U9>>;
type RowVector9<T> = na::Matrix<T, na::U1, na::U9, na::ArrayStorage<T, 1, 9>>;

/// Shift points to zero mean and scale each axis by its mean absolute
/// deviation. Returns the normalized points and the transform applied.
fn normalize(points: &[na::Point2<f64>]) -> Result<(Vec<na::Point2<f64>>, na::Matrix3<f64>)> {
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.x).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.y).sum::<f64>() / n;
    let dev_x = points.iter().map(|p| (p.x - mean_x).abs()).sum::<f64>() / n;
    let dev_y = points.iter().map(|p| (p.y - mean_y).abs()).sum::<f64>() / n;
    if dev_x < f64::EPSILON || dev_y < f64::EPSILON {
        return Err(Error::Homography("points are collinear along an axis"));
    }
    let sx = 1.0 / dev_x;
    let sy = 1.0 / dev_y;

    let normed = points
        .iter()
        .map(|p| na::Point2::new(sx * (p.x - mean_x), sy * (p.y - mean_y)))
        .collect();

    let mut t = na::Matrix3::<f64>::identity();
    t[(0, 0)] = sx;
    t[(0, 2)] = -mean_x * sx;
    t[(1, 1)] = sy;
    t[(1, 2)] = -mean_y * sy;

    Ok((normed, t))
}

/// Estimate the homography mapping `world_points` onto `img_points` with the
/// normalized DLT.
pub fn compute_h(
    img_points: &[na::Point2<f64>],
    world_points: &[na::Point2<f64>],
) -> Result<na::Matrix3<f64>> {
    let num_points = img_points.len();
    if num_points != world_points.len() {
        return Err(Error::Homography("point sets differ in length"));
    }
    if num_points < 4 {
        return Err(Error::Homography("need at least 4 correspondences"));
    }

    let (norm_img, t_img) = normalize(img_points)?;
    let (norm_world, t_world) = normalize(world_points)?;

    // keep at least 9 rows so the SVD yields a full V
    let mut a = MatrixXx9::<f64>::zeros((num_points * 2).max(9));
    for (idx, (img, world)) in norm_img.iter().zip(norm_world.iter()).enumerate() {
        let (u, v) = (img.x, img.y);
        let (x_w, y_w) = (world.x, world.y);
        a.set_row(
            2 * idx,
            &RowVector9::<f64>::from_row_slice(&[
                x_w, y_w, 1.0, 0.0, 0.0, 0.0, -u * x_w, -u * y_w, -u,
            ]),
        );
        a.set_row(
            2 * idx + 1,
            &RowVector9::<f64>::from_row_slice(&[
                0.0, 0.0, 0.0, x_w, y_w, 1.0, -v * x_w, -v * y_w, -v,
            ]),
        );
    }

    let svd = a.svd(false, true);
    let null_idx = svd.singular_values.imin();
    let v_t = svd.v_t.ok_or(Error::Homography("SVD did not produce V"))?;
    let null_row = v_t.row(null_idx);
    let h_norm = na::Matrix3::<f64>::from_iterator(null_row.iter().cloned()).transpose();

    let t_img_inv = t_img
        .try_inverse()
        .ok_or(Error::Homography("image normalization is singular"))?;
    let h = t_img_inv * h_norm * t_world;
    if h[(2, 2)].abs() < f64::EPSILON {
        return Ok(h);
    }
    Ok(h / h[(2, 2)])
}

/// Apply a homography to one point. `None` when the point maps to infinity.
pub fn transform_point(h: &na::Matrix3<f64>, p: &na::Point2<f64>) -> Option<na::Point2<f64>> {
    let q = h * na::Vector3::new(p.x, p.y, 1.0);
    if q.z.abs() < f64::EPSILON {
        return None;
    }
    Some(na::Point2::new(q.x / q.z, q.y / q.z))
}

/// Perspective transform of a point set.
pub fn perspective_transform(
    h: &na::Matrix3<f64>,
    points: &[na::Point2<f64>],
) -> Option<Vec<na::Point2<f64>>> {
    points.iter().map(|p| transform_point(h, p)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn grid() -> Vec<na::Point2<f64>> {
        let mut points = Vec::new();
        for y in 0..5 {
            for x in 0..7 {
                points.push(na::Point2::new(x as f64 * 30.5, y as f64 * 30.5));
            }
        }
        points
    }

    #[test]
    fn recovers_known_homography() {
        let truth = na::Matrix3::new(1.2, 0.1, 320.0, -0.05, 0.9, 240.0, 1e-4, -2e-4, 1.0);
        let world = grid();
        let img: Vec<_> = world
            .iter()
            .map(|p| transform_point(&truth, p).unwrap())
            .collect();

        let h = compute_h(&img, &world).unwrap();
        assert_relative_eq!(h, truth, epsilon = 1e-6);
    }

    #[test]
    fn rejects_too_few_points() {
        let world = grid();
        assert!(compute_h(&world[..3], &world[..3]).is_err());
    }

    #[test]
    fn rejects_degenerate_points() {
        let line: Vec<_> = (0..6).map(|i| na::Point2::new(i as f64, 0.0)).collect();
        assert!(compute_h(&line, &line).is_err());
    }

    #[test]
    fn point_at_infinity_is_none() {
        let h = na::Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0);
        assert!(transform_point(&h, &na::Point2::new(0.0, 5.0)).is_none());
        assert!(perspective_transform(&h, &[na::Point2::new(1.0, 1.0), na::Point2::new(0.0, 1.0)])
            .is_none());
    }
}
