use opencv::{
    core::{self, Size},
    imgproc,
    prelude::*,
    video,
};

use crate::error::Result;
use crate::tracker::{FlowBackend, Point, TrackerConfig};

/// Shi-Tomasi corners and pyramidal LK from OpenCV.
pub struct CvFlow {
    config: TrackerConfig,
}

impl CvFlow {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    fn criteria(&self) -> Result<core::TermCriteria> {
        Ok(core::TermCriteria::new(
            core::TermCriteria_COUNT + core::TermCriteria_EPS,
            self.config.term_iters,
            self.config.term_eps,
        )?)
    }
}

fn to_cv(points: &[Point]) -> core::Vector<core::Point2f> {
    points.iter().map(|p| core::Point2f::new(p.x, p.y)).collect()
}

fn from_cv(points: &core::Vector<core::Point2f>) -> Vec<Point> {
    points.iter().map(|p| Point::new(p.x, p.y)).collect()
}

impl FlowBackend for CvFlow {
    type Image = Mat;

    fn good_features(
        &mut self,
        gray: &Mat,
        max: usize,
        quality: f64,
        min_distance: f64,
        exclude: &[(Point, f32)],
    ) -> Result<Vec<Point>> {
        let mut mask = Mat::default();
        if !exclude.is_empty() {
            mask = Mat::new_size_with_default(gray.size()?, core::CV_8UC1, core::Scalar::all(255.0))?;
            for (p, radius) in exclude {
                imgproc::circle(
                    &mut mask,
                    core::Point::new(p.x.round() as i32, p.y.round() as i32),
                    *radius as i32,
                    core::Scalar::all(0.0),
                    -1,
                    imgproc::LINE_8,
                    0,
                )?;
            }
        }
        let mut corners = core::Vector::<core::Point2f>::new();
        imgproc::good_features_to_track(
            gray,
            &mut corners,
            max as i32,
            quality,
            min_distance,
            &mask,
            3,
            false,
            0.04,
        )?;
        Ok(from_cv(&corners))
    }

    fn refine_corners(&mut self, gray: &Mat, points: &mut [Point], win: i32) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        let mut corners = to_cv(points);
        imgproc::corner_sub_pix(
            gray,
            &mut corners,
            Size::new(win, win),
            Size::new(-1, -1),
            self.criteria()?,
        )?;
        for (dst, src) in points.iter_mut().zip(from_cv(&corners)) {
            *dst = src;
        }
        Ok(())
    }

    fn track(&mut self, prev: &Mat, next: &Mat, points: &[Point]) -> Result<Vec<(Point, bool)>> {
        let prev_pts = to_cv(points);
        let mut next_pts = core::Vector::<core::Point2f>::new();
        let mut status = core::Vector::<u8>::new();
        let mut err = core::Vector::<f32>::new();
        let win = self.config.win_size;
        video::calc_optical_flow_pyr_lk(
            prev,
            next,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(win, win),
            self.config.max_level,
            self.criteria()?,
            0,
            0.001,
        )?;
        Ok(next_pts
            .iter()
            .zip(status.iter())
            .map(|(p, ok)| (Point::new(p.x, p.y), ok != 0))
            .collect())
    }
}
