use crate::settings::SettingsIssue;

/// Errors produced by the toolkit.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("invalid settings: {}", join_issues(.0))]
    Settings(Vec<SettingsIssue>),
    #[error("need at least {needed} views, got {got}")]
    NotEnoughViews { needed: usize, got: usize },
    #[error("view {view} has {got} points, board has {expected}")]
    PointCountMismatch {
        view: usize,
        got: usize,
        expected: usize,
    },
    #[error("homography estimation failed: {0}")]
    Homography(&'static str),
    #[error("calibration failed: {0}")]
    Calibration(String),
    #[error("pose estimation failed: {0}")]
    Pose(String),
    #[error("could not open input source: {0}")]
    Source(String),
    #[cfg(feature = "opencv")]
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn join_issues(issues: &[SettingsIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
