use std::path::{Path, PathBuf};

use log::{debug, info};
use opencv::{core, imgcodecs, prelude::*, videoio};

use crate::error::{Error, Result};
use crate::source::{next_readable, FrameSource, SourceOpener};

/// Frames from OpenCV: a `VideoCapture` for cameras and videos, `imread`
/// for image lists.
pub enum CvSource {
    Capture(videoio::VideoCapture),
    Images { paths: Vec<PathBuf>, at: usize },
}

impl FrameSource for CvSource {
    type Frame = Mat;

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        match self {
            Self::Capture(cap) => {
                let mut frame = Mat::default();
                if !cap.read(&mut frame)? || frame.empty() {
                    return Ok(None);
                }
                Ok(Some(frame))
            }
            Self::Images { paths, at } => Ok(next_readable(paths, at, |path| {
                let frame = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
                if frame.empty() {
                    return Err(Error::Source(format!("could not read {}", path.display())));
                }
                Ok(frame)
            })),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Self::Capture(_))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CvOpener;

fn opened(cap: videoio::VideoCapture, what: &str) -> Result<CvSource> {
    if !cap.is_opened()? {
        return Err(Error::Source(what.to_string()));
    }
    info!("opened {what}");
    Ok(CvSource::Capture(cap))
}

impl SourceOpener for CvOpener {
    type Source = CvSource;

    fn open_camera(&self, index: i32) -> Result<CvSource> {
        opened(
            videoio::VideoCapture::new(index, videoio::CAP_ANY)?,
            &format!("camera {index}"),
        )
    }

    fn open_video(&self, path: &Path) -> Result<CvSource> {
        opened(
            videoio::VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?,
            &format!("video {}", path.display()),
        )
    }

    fn open_image_list(&self, paths: &[PathBuf]) -> Result<CvSource> {
        debug!("image list with {} entries", paths.len());
        Ok(CvSource::Images {
            paths: paths.to_vec(),
            at: 0,
        })
    }
}

/// Open the tracker input: a single digit is a camera index, anything else
/// a video path.
pub fn open_tracker_input(input: &str) -> Result<CvSource> {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() => CvOpener.open_camera(c as i32 - '0' as i32),
        _ => CvOpener.open_video(Path::new(input)),
    }
}

/// Flip in place around the axis given by OpenCV's flip code.
pub fn flip(frame: &mut Mat, code: i32) -> Result<()> {
    let mut flipped = Mat::default();
    core::flip(&*frame, &mut flipped, code)?;
    *frame = flipped;
    Ok(())
}

pub fn save_mat(path: &Path, frame: &Mat) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    if !imgcodecs::imwrite(&path.to_string_lossy(), frame, &core::Vector::new())? {
        return Err(std::io::Error::other(format!("could not write {}", path.display())).into());
    }
    info!("saved {}", path.display());
    Ok(())
}
