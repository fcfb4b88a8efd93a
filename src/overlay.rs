//! Clicked points, freehand mask strokes and two-point measurement on the
//! board plane.
//!
//! Mouse input arrives as [`InputEvent`]s which the frame loop drains once
//! per iteration and feeds to [`Overlay::handle`]; the same overlay is then
//! asked for a [`Measurement`] with the frame's image → board homography.

use std::sync::{Arc, Mutex};

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};
use log::debug;
use nalgebra as na;

use crate::homography::perspective_transform;

/// Marker color for clicked points.
pub const MARKER_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
/// Stroke color for drags.
pub const STROKE_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
/// Drags no longer than this (squared, in pixels) leave no stroke.
pub const MIN_DRAG_SQUARED: i64 = 9;

const STROKE_RADIUS: i32 = 2;

/// Mouse input, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Double click.
    PointClick(i32, i32),
    /// Button pressed.
    DragStart(i32, i32),
    /// Button released.
    DragEnd(i32, i32),
}

/// Events pushed by a window callback and drained by the frame loop.
#[derive(Debug, Clone, Default)]
pub struct EventQueue(Arc<Mutex<Vec<InputEvent>>>);

impl EventQueue {
    pub fn push(&self, event: InputEvent) {
        if let Ok(mut events) = self.0.lock() {
            events.push(event);
        }
    }

    pub fn drain(&self) -> Vec<InputEvent> {
        self.0
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

/// Distance between two clicked points, measured on the board plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub image: [na::Point2<f64>; 2],
    pub scene: [na::Point2<f64>; 2],
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct Overlay {
    mask: RgbImage,
    /// Clicks waiting to be measured.
    pending: Vec<na::Point2<f64>>,
    /// Every click, in order; what the save and pop commands work on.
    history: Vec<na::Point2<f64>>,
    drag_anchor: Option<(i32, i32)>,
}

impl Overlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            mask: RgbImage::new(width, height),
            pending: Vec::new(),
            history: Vec::new(),
            drag_anchor: None,
        }
    }

    pub fn mask(&self) -> &RgbImage {
        &self.mask
    }

    pub fn pending(&self) -> &[na::Point2<f64>] {
        &self.pending
    }

    pub fn history(&self) -> &[na::Point2<f64>] {
        &self.history
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointClick(x, y) => {
                let p = na::Point2::new(x as f64, y as f64);
                draw_marker(&mut self.mask, &p);
                self.pending.push(p);
                self.history.push(p);
            }
            InputEvent::DragStart(x, y) => {
                if self.drag_anchor.is_none() {
                    self.drag_anchor = Some((x, y));
                }
            }
            InputEvent::DragEnd(x, y) => {
                let Some((ax, ay)) = self.drag_anchor.take() else {
                    return;
                };
                let dx = (ax - x) as i64;
                let dy = (ay - y) as i64;
                if dx * dx + dy * dy > MIN_DRAG_SQUARED {
                    draw_stroke(&mut self.mask, (ax, ay), (x, y));
                }
            }
        }
    }

    /// Blank the mask. Clicked points are kept.
    pub fn reset_mask(&mut self) {
        let (w, h) = self.mask.dimensions();
        self.mask = RgbImage::new(w, h);
    }

    /// Drop the most recent click and redraw the mask from the remaining
    /// markers. Strokes do not survive the redraw.
    pub fn pop_point(&mut self) -> Option<na::Point2<f64>> {
        let popped = self.history.pop()?;
        if self.pending.last() == Some(&popped) {
            self.pending.pop();
        }
        self.reset_mask();
        for p in &self.history {
            draw_marker(&mut self.mask, p);
        }
        Some(popped)
    }

    /// Measure when exactly two clicks are pending; any other count leaves
    /// the queue alone. A measured pair is consumed even if it cannot be
    /// mapped onto the board.
    pub fn measure(&mut self, image_to_scene: &na::Matrix3<f64>) -> Option<Measurement> {
        if self.pending.len() != 2 {
            return None;
        }
        let image = [self.pending[0], self.pending[1]];
        self.pending.clear();
        let scene = perspective_transform(image_to_scene, &image)?;
        let distance = (scene[0] - scene[1]).norm();
        debug!("measured {distance:.3} between {} and {}", image[0], image[1]);
        Some(Measurement {
            image,
            scene: [scene[0], scene[1]],
            distance,
        })
    }
}

fn draw_marker(mask: &mut RgbImage, p: &na::Point2<f64>) {
    let center = (p.x.round() as i32, p.y.round() as i32);
    for radius in 1..=3 {
        draw_hollow_circle_mut(mask, center, radius, MARKER_COLOR);
    }
}

fn draw_stroke(mask: &mut RgbImage, from: (i32, i32), to: (i32, i32)) {
    let dx = (to.0 - from.0) as f32;
    let dy = (to.1 - from.1) as f32;
    let steps = dx.abs().max(dy.abs()).ceil() as i32;
    for i in 0..=steps {
        let t = i as f32 / steps.max(1) as f32;
        let center = (
            (from.0 as f32 + t * dx).round() as i32,
            (from.1 as f32 + t * dy).round() as i32,
        );
        draw_filled_circle_mut(mask, center, STROKE_RADIUS, STROKE_COLOR);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn stroked(overlay: &Overlay) -> bool {
        overlay.mask().pixels().any(|p| *p == STROKE_COLOR)
    }

    #[test]
    fn drag_threshold_boundary() {
        // 3² + 0² = 9: no stroke
        let mut overlay = Overlay::new(40, 40);
        overlay.handle(InputEvent::DragStart(10, 10));
        overlay.handle(InputEvent::DragEnd(13, 10));
        assert!(!stroked(&overlay));
        assert!(!overlay.is_dragging());

        // 3² + 1² = 10: stroke
        overlay.handle(InputEvent::DragStart(10, 10));
        overlay.handle(InputEvent::DragEnd(13, 11));
        assert!(stroked(&overlay));
    }

    #[test]
    fn nested_press_keeps_first_anchor() {
        let mut overlay = Overlay::new(40, 40);
        overlay.handle(InputEvent::DragStart(5, 5));
        overlay.handle(InputEvent::DragStart(30, 30));
        overlay.handle(InputEvent::DragEnd(31, 30));
        // measured from (5, 5), so the stroke is drawn
        assert!(stroked(&overlay));
        assert_eq!(*overlay.mask().get_pixel(5, 5), STROKE_COLOR);
    }

    #[test]
    fn release_without_press_is_ignored() {
        let mut overlay = Overlay::new(20, 20);
        overlay.handle(InputEvent::DragEnd(10, 10));
        assert!(overlay.mask().pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn measurement_needs_exactly_two_points() {
        let h = na::Matrix3::identity() * 0.5;
        let mut overlay = Overlay::new(100, 100);
        assert!(overlay.measure(&h).is_none());

        overlay.handle(InputEvent::PointClick(0, 0));
        assert!(overlay.measure(&h).is_none());
        assert_eq!(overlay.pending().len(), 1);

        overlay.handle(InputEvent::PointClick(30, 40));
        overlay.handle(InputEvent::PointClick(60, 80));
        assert!(overlay.measure(&h).is_none());
        assert_eq!(overlay.pending().len(), 3);
    }

    #[test]
    fn two_points_are_measured_and_consumed() {
        let mut h = na::Matrix3::identity();
        h[(0, 0)] = 0.5;
        h[(1, 1)] = 0.5;
        let mut overlay = Overlay::new(100, 100);
        overlay.handle(InputEvent::PointClick(0, 0));
        overlay.handle(InputEvent::PointClick(60, 80));

        let m = overlay.measure(&h).unwrap();
        assert_relative_eq!(m.distance, 50.0, epsilon = 1e-12);
        assert!(overlay.pending().is_empty());
        assert_eq!(overlay.history().len(), 2);
        assert!(overlay.measure(&h).is_none());
    }

    #[test]
    fn reset_matches_fresh_mask_and_keeps_points() {
        let mut overlay = Overlay::new(32, 24);
        overlay.handle(InputEvent::PointClick(5, 5));
        overlay.handle(InputEvent::DragStart(1, 1));
        overlay.handle(InputEvent::DragEnd(20, 20));
        overlay.reset_mask();
        assert_eq!(overlay.mask(), &RgbImage::new(32, 24));
        assert_eq!(overlay.pending().len(), 1);
        assert_eq!(overlay.history().len(), 1);
    }

    #[test]
    fn pop_redraws_markers_only() {
        let mut overlay = Overlay::new(40, 40);
        overlay.handle(InputEvent::PointClick(5, 5));
        overlay.handle(InputEvent::DragStart(20, 20));
        overlay.handle(InputEvent::DragEnd(30, 30));
        overlay.handle(InputEvent::PointClick(30, 5));

        assert_eq!(overlay.pop_point(), Some(na::Point2::new(30.0, 5.0)));
        assert_eq!(overlay.pending(), &[na::Point2::new(5.0, 5.0)]);
        assert!(!stroked(&overlay));
        assert_eq!(*overlay.mask().get_pixel(8, 5), MARKER_COLOR);
        assert_eq!(*overlay.mask().get_pixel(33, 5), Rgb([0, 0, 0]));

        assert!(overlay.pop_point().is_some());
        assert!(overlay.pop_point().is_none());
    }

    #[test]
    fn queue_drains_in_order() {
        let queue = EventQueue::default();
        let handle = queue.clone();
        handle.push(InputEvent::DragStart(1, 2));
        handle.push(InputEvent::DragEnd(3, 4));
        assert_eq!(
            queue.drain(),
            vec![InputEvent::DragStart(1, 2), InputEvent::DragEnd(3, 4)]
        );
        assert!(queue.drain().is_empty());
    }
}
