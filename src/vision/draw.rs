use nalgebra as na;
use opencv::{
    core::{self, Point, Scalar},
    imgproc,
    prelude::*,
};

use crate::error::Result;
use crate::overlay::Measurement;
use crate::pose::PoseEstimate;
use crate::tracker::Point as TrackPoint;
use crate::vision::convert::pixel;

fn bgr(b: f64, g: f64, r: f64) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

fn red() -> Scalar {
    bgr(0.0, 0.0, 255.0)
}

fn green() -> Scalar {
    bgr(0.0, 255.0, 0.0)
}

fn blue() -> Scalar {
    bgr(255.0, 0.0, 0.0)
}

fn text(frame: &mut Mat, s: &str, at: Point, scale: f64, color: Scalar, thickness: i32) -> Result<()> {
    imgproc::put_text(
        frame,
        s,
        at,
        imgproc::FONT_HERSHEY_SIMPLEX,
        scale,
        color,
        thickness,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Board axes with X blue, Y green and Z red.
pub fn draw_axes(frame: &mut Mat, axes: &[na::Point2<f64>; 4]) -> Result<()> {
    let origin = pixel(&axes[0]);
    for (end, (color, label)) in axes[1..]
        .iter()
        .zip([(blue(), "X"), (green(), "Y"), (red(), "Z")])
    {
        let end = pixel(end);
        imgproc::arrowed_line(frame, origin, end, color, 2, imgproc::LINE_AA, 0, 0.1)?;
        text(frame, label, end, 0.8, color, 2)?;
    }
    Ok(())
}

/// Axes, euler angles and camera distance for one pose.
pub fn draw_pose(frame: &mut Mat, estimate: &PoseEstimate) -> Result<()> {
    draw_axes(frame, &estimate.axes)?;

    let x = frame.cols() - 200;
    if let Some([roll, pitch, yaw]) = estimate.euler_degrees {
        for (i, (name, value)) in [("roll", roll), ("pitch", pitch), ("yaw", yaw)]
            .into_iter()
            .enumerate()
        {
            let y = 25 * (i as i32 + 1);
            text(frame, &format!("{name}: {value:.1}"), Point::new(x, y), 0.6, green(), 2)?;
        }
    }
    let distance = estimate.pose.translation.vector.norm();
    text(frame, &format!("dist: {distance:.1}"), Point::new(x, 100), 0.6, green(), 2)?;
    Ok(())
}

/// The measured segment and its length on the board.
pub fn draw_measurement(frame: &mut Mat, m: &Measurement) -> Result<()> {
    let (a, b) = (pixel(&m.image[0]), pixel(&m.image[1]));
    imgproc::line(frame, a, b, green(), 2, imgproc::LINE_AA, 0)?;
    let mid = Point::new((a.x + b.x) / 2 + 5, (a.y + b.y) / 2 - 5);
    text(frame, &format!("{:.2}", m.distance), mid, 0.7, green(), 2)
}

/// Capture status in the bottom right corner.
pub fn draw_status(frame: &mut Mat, msg: &str, calibrated: bool) -> Result<()> {
    let mut baseline = 0;
    let size = imgproc::get_text_size(msg, imgproc::FONT_HERSHEY_PLAIN, 1.0, 1, &mut baseline)?;
    let at = Point::new(
        frame.cols() - 2 * size.width - 10,
        frame.rows() - 2 * baseline - 10,
    );
    let color = if calibrated { green() } else { red() };
    imgproc::put_text(
        frame,
        msg,
        at,
        imgproc::FONT_HERSHEY_PLAIN,
        1.0,
        color,
        1,
        imgproc::LINE_8,
        false,
    )?;
    Ok(())
}

/// Motion arrows from a tracker step.
pub fn draw_arrows(frame: &mut Mat, arrows: &[(TrackPoint, TrackPoint)]) -> Result<()> {
    for (from, to) in arrows {
        let from = Point::new(from.x.round() as i32, from.y.round() as i32);
        let to = Point::new(to.x.round() as i32, to.y.round() as i32);
        imgproc::circle(frame, from, 2, red(), -1, imgproc::LINE_8, 0)?;
        imgproc::arrowed_line(frame, from, to, green(), 4, imgproc::LINE_8, 0, 0.1)?;
    }
    Ok(())
}

pub fn draw_points(frame: &mut Mat, points: &[TrackPoint]) -> Result<()> {
    for p in points {
        let at = Point::new(p.x.round() as i32, p.y.round() as i32);
        imgproc::circle(frame, at, 3, green(), -1, imgproc::LINE_8, 0)?;
    }
    Ok(())
}

pub fn draw_hud(frame: &mut Mat, tracked: usize, fps: f64) -> Result<()> {
    text(frame, &format!("Tracked features: {tracked}"), Point::new(40, 40), 1.0, green(), 2)?;
    text(frame, &format!("FPS: {}", fps.round() as i64), Point::new(40, 80), 1.0, green(), 2)?;
    Ok(())
}

/// Invert the frame, used as a capture blink.
pub fn blink(frame: &mut Mat) -> Result<()> {
    let mut inverted = Mat::default();
    core::bitwise_not(&*frame, &mut inverted, &core::no_array())?;
    *frame = inverted;
    Ok(())
}
