use nalgebra as na;
use opencv::{
    calib3d,
    core::{self, Size},
    features2d, imgproc,
    prelude::*,
};

use crate::board::{BoardSpec, Pattern};
use crate::error::Result;
use crate::vision::convert::{points_from_cv, points_to_cv, to_gray};

/// Find the board in `frame`. Chessboard corners are refined to sub-pixel
/// accuracy with a `win_size × win_size` half window.
///
/// `fisheye` drops the fast check, which rejects strongly distorted boards.
pub fn detect_pattern(
    frame: &Mat,
    board: &BoardSpec,
    fisheye: bool,
    win_size: i32,
) -> Result<Option<Vec<na::Point2<f64>>>> {
    let pattern_size = Size::new(board.width as i32, board.height as i32);
    let mut corners = core::Vector::<core::Point2f>::new();

    let found = match board.pattern {
        Pattern::Chessboard => {
            let mut flags = calib3d::CALIB_CB_ADAPTIVE_THRESH + calib3d::CALIB_CB_NORMALIZE_IMAGE;
            if !fisheye {
                flags += calib3d::CALIB_CB_FAST_CHECK;
            }
            calib3d::find_chessboard_corners(frame, pattern_size, &mut corners, flags)?
        }
        Pattern::CirclesGrid => {
            find_circles(frame, pattern_size, &mut corners, calib3d::CALIB_CB_SYMMETRIC_GRID)?
        }
        Pattern::AsymmetricCirclesGrid => {
            find_circles(frame, pattern_size, &mut corners, calib3d::CALIB_CB_ASYMMETRIC_GRID)?
        }
    };
    if !found {
        return Ok(None);
    }

    if board.pattern == Pattern::Chessboard {
        let gray = to_gray(frame)?;
        imgproc::corner_sub_pix(
            &gray,
            &mut corners,
            Size::new(win_size, win_size),
            Size::new(-1, -1),
            core::TermCriteria::new(
                core::TermCriteria_EPS + core::TermCriteria_COUNT,
                30,
                0.0001,
            )?,
        )?;
    }

    Ok(Some(points_from_cv(&corners)))
}

fn find_circles(
    frame: &Mat,
    pattern_size: Size,
    centers: &mut core::Vector<core::Point2f>,
    flags: i32,
) -> Result<bool> {
    let detector: core::Ptr<features2d::Feature2D> =
        features2d::SimpleBlobDetector::create(features2d::SimpleBlobDetector_Params::default()?)?
            .into();
    Ok(calib3d::find_circles_grid_1(frame, pattern_size, centers, flags, &detector)?)
}

/// Draw detected corners the way OpenCV does for a found board.
pub fn draw_pattern(frame: &mut Mat, board: &BoardSpec, corners: &[na::Point2<f64>]) -> Result<()> {
    calib3d::draw_chessboard_corners(
        frame,
        Size::new(board.width as i32, board.height as i32),
        &points_to_cv(corners),
        true,
    )?;
    Ok(())
}
