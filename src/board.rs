use nalgebra as na;
use serde::{Deserialize, Serialize};

/// Calibration target layouts understood by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pattern {
    Chessboard,
    CirclesGrid,
    AsymmetricCirclesGrid,
}

impl Pattern {
    /// Parse the configuration name (`CHESSBOARD`, `CIRCLES_GRID`,
    /// `ASYMMETRIC_CIRCLES_GRID`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "CHESSBOARD" => Some(Self::Chessboard),
            "CIRCLES_GRID" => Some(Self::CirclesGrid),
            "ASYMMETRIC_CIRCLES_GRID" => Some(Self::AsymmetricCirclesGrid),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chessboard => "CHESSBOARD",
            Self::CirclesGrid => "CIRCLES_GRID",
            Self::AsymmetricCirclesGrid => "ASYMMETRIC_CIRCLES_GRID",
        }
    }
}

/// Geometry of a planar calibration board.
///
/// `width` and `height` count inner corners (or circles) per row and
/// column, `square_size` is the spacing in user units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardSpec {
    pub width: u32,
    pub height: u32,
    pub square_size: f64,
    pub pattern: Pattern,
}

impl BoardSpec {
    pub fn corner_count(&self) -> usize {
        (self.width * self.height) as usize
    }

    /// Board points on the z = 0 plane, row by row, in detector order.
    pub fn object_points(&self) -> Vec<na::Point3<f64>> {
        let s = self.square_size;
        let mut points = Vec::with_capacity(self.corner_count());
        for i in 0..self.height {
            for j in 0..self.width {
                let x = match self.pattern {
                    Pattern::Chessboard | Pattern::CirclesGrid => j as f64 * s,
                    Pattern::AsymmetricCirclesGrid => (2 * j + i % 2) as f64 * s,
                };
                points.push(na::Point3::new(x, i as f64 * s, 0.0));
            }
        }
        points
    }

    /// Same as [`object_points`](Self::object_points) with z dropped.
    pub fn planar_points(&self) -> Vec<na::Point2<f64>> {
        self.object_points()
            .iter()
            .map(|p| na::Point2::new(p.x, p.y))
            .collect()
    }
}

/// Drop the z coordinate of board points.
pub fn to_planar(points: &[na::Point3<f64>]) -> Vec<na::Point2<f64>> {
    points.iter().map(|p| na::Point2::new(p.x, p.y)).collect()
}
