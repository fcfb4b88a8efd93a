use log::debug;
use nalgebra as na;

use crate::error::Result;

pub type Point = na::Point2<f32>;

/// Fixed parameters of the point tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub max_count: usize,
    /// Minimum distance between detected corners.
    pub min_distance: f64,
    /// Corner quality used on (re)initialisation.
    pub init_quality: f64,
    /// Half-size of the corner refinement window on detected features.
    pub sub_pix_win: i32,
    /// LK window, also used to refine clicked points.
    pub win_size: i32,
    pub max_level: i32,
    pub term_iters: i32,
    pub term_eps: f64,
    /// A click this close to a tracked point removes it.
    pub click_radius: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_count: 500,
            min_distance: 10.0,
            init_quality: 0.01,
            sub_pix_win: 10,
            win_size: 31,
            max_level: 3,
            term_iters: 20,
            term_eps: 0.03,
            click_radius: 5.0,
        }
    }
}

/// Corner detection and pyramidal LK, supplied by the vision backend.
pub trait FlowBackend {
    type Image: Clone;

    /// Up to `max` strong corners, none of them inside an excluded disc
    /// `(center, radius)`.
    fn good_features(
        &mut self,
        gray: &Self::Image,
        max: usize,
        quality: f64,
        min_distance: f64,
        exclude: &[(Point, f32)],
    ) -> Result<Vec<Point>>;

    /// Sub-pixel refinement with a `win × win` half window.
    fn refine_corners(&mut self, gray: &Self::Image, points: &mut [Point], win: i32) -> Result<()>;

    /// Follow `points` from `prev` to `next`. Each entry is the new
    /// position and whether the point was found; lost points still carry
    /// the flow's last estimate.
    fn track(
        &mut self,
        prev: &Self::Image,
        next: &Self::Image,
        points: &[Point],
    ) -> Result<Vec<(Point, bool)>>;
}

/// What one tracker step produced, for drawing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepReport {
    /// Motion of each successfully tracked point.
    pub arrows: Vec<(Point, Point)>,
    /// Points the LK step followed successfully.
    pub tracked: usize,
    /// Corners found this step, either on initialisation or as top-up.
    pub seeded: usize,
    pub initialized: bool,
}

/// Keeps a set of corners alive across frames: seeds, tracks, tops up and
/// prunes them, and applies clicks.
pub struct PointTracker<B: FlowBackend> {
    config: TrackerConfig,
    points: Vec<Point>,
    prev: Option<B::Image>,
    need_init: bool,
    quality: f64,
    click: Option<Point>,
}

impl<B: FlowBackend> PointTracker<B> {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            quality: config.init_quality,
            config,
            points: Vec::new(),
            prev: None,
            need_init: true,
            click: None,
        }
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn quality(&self) -> f64 {
        self.quality
    }

    /// Trackbar value `0..=99` to corner quality; re-initialises tracking.
    pub fn set_quality_level(&mut self, value: i32) {
        self.quality = (value as f64 / 100.0).clamp(0.01, 0.99);
        self.need_init = true;
    }

    pub fn reinitialize(&mut self) {
        self.need_init = true;
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Click at `p`: removes a nearby point or adds a new one next step.
    pub fn click(&mut self, p: Point) {
        self.click = Some(p);
    }

    pub fn step(&mut self, backend: &mut B, gray: B::Image) -> Result<StepReport> {
        let cfg = self.config;
        let mut report = StepReport::default();

        if self.need_init {
            let mut points = backend.good_features(
                &gray,
                cfg.max_count,
                cfg.init_quality,
                cfg.min_distance,
                &[],
            )?;
            backend.refine_corners(&gray, &mut points, cfg.sub_pix_win)?;
            debug!("initialised with {} features", points.len());
            report.seeded = points.len();
            report.initialized = true;
            self.points = points;
            self.click = None;
        } else if !self.points.is_empty() {
            let prev = self.prev.as_ref().unwrap_or(&gray);
            let status = backend.track(prev, &gray, &self.points)?;
            for (from, (to, found)) in self.points.iter().zip(&status) {
                if *found {
                    report.arrows.push((*from, *to));
                }
            }
            report.tracked = report.arrows.len();

            let mut next = status;
            if next.len() < cfg.max_count {
                let exclude: Vec<(Point, f32)> = next
                    .iter()
                    .filter(|(_, found)| *found)
                    .map(|(p, _)| (*p, (cfg.min_distance / 2.0).floor() as f32))
                    .collect();
                let mut extra = backend.good_features(
                    &gray,
                    cfg.max_count - next.len(),
                    self.quality,
                    cfg.min_distance,
                    &exclude,
                )?;
                if !extra.is_empty() {
                    backend.refine_corners(&gray, &mut extra, cfg.sub_pix_win)?;
                }
                report.seeded = extra.len();
                next.extend(extra.into_iter().map(|p| (p, true)));
            }

            // a click near a point consumes it even if the point was lost
            self.points = next
                .into_iter()
                .filter_map(|(p, found)| match self.click {
                    Some(c) if (c - p).norm() <= cfg.click_radius => {
                        self.click = None;
                        None
                    }
                    _ => found.then_some(p),
                })
                .collect();
        }

        if let Some(c) = self.click.take() {
            if self.points.len() < cfg.max_count {
                let mut added = [c];
                backend.refine_corners(&gray, &mut added, cfg.win_size)?;
                self.points.push(added[0]);
            }
        }

        self.need_init = false;
        self.prev = Some(gray);
        Ok(report)
    }
}
