use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};

/// Sequential frames from a camera, a video file or a list of images.
pub trait FrameSource {
    type Frame;

    /// Next frame, `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;

    /// Camera and video inputs; these never restart and are paced by the
    /// key wait rather than `Input_Delay`.
    fn is_live(&self) -> bool;
}

/// Opens the backend for each kind of input. Validation calls it eagerly
/// so that an unopenable input is reported before the frame loop starts.
pub trait SourceOpener {
    type Source: FrameSource;

    fn open_camera(&self, index: i32) -> Result<Self::Source>;
    fn open_video(&self, path: &Path) -> Result<Self::Source>;
    fn open_image_list(&self, paths: &[PathBuf]) -> Result<Self::Source>;
}

/// Reads an image list file: either a JSON array of paths or an object
/// whose first array-valued entry is the list.
pub fn read_image_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    let list = match &value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(map) => map
            .values()
            .find_map(|v| v.as_array())
            .ok_or_else(|| Error::Source(format!("{} holds no list", path.display())))?,
        _ => {
            return Err(Error::Source(format!(
                "{} is not an image list",
                path.display()
            )))
        }
    };
    list.iter()
        .map(|item| {
            item.as_str()
                .map(PathBuf::from)
                .ok_or_else(|| Error::Source(format!("non-string entry {item} in image list")))
        })
        .collect()
}

/// Next decodable entry of an image list, starting at `*at`.
///
/// Entries `read` fails on are logged and skipped, so one bad file does not
/// end the list early. `None` once the list is used up.
pub fn next_readable<T>(
    paths: &[PathBuf],
    at: &mut usize,
    mut read: impl FnMut(&Path) -> Result<T>,
) -> Option<T> {
    while let Some(path) = paths.get(*at) {
        *at += 1;
        match read(path) {
            Ok(frame) => return Some(frame),
            Err(e) => warn!("skipping {}: {e}", path.display()),
        }
    }
    None
}

/// Decodes still images from disk in list order.
#[derive(Debug)]
pub struct ImageListSource {
    paths: Vec<PathBuf>,
    at: usize,
}

impl ImageListSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths, at: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.paths.len() - self.at
    }
}

impl FrameSource for ImageListSource {
    type Frame = image::RgbImage;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>> {
        Ok(next_readable(&self.paths, &mut self.at, |path| {
            debug!("reading {}", path.display());
            Ok(image::open(path)?.to_rgb8())
        }))
    }

    fn is_live(&self) -> bool {
        false
    }
}

/// Opener backed by the `image` crate. Only image lists are supported;
/// cameras and videos need the OpenCV backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageFileOpener;

impl SourceOpener for ImageFileOpener {
    type Source = ImageListSource;

    fn open_camera(&self, index: i32) -> Result<Self::Source> {
        warn!("camera {index} requested without a capture backend");
        Err(Error::Source(format!(
            "camera {index} needs the opencv feature"
        )))
    }

    fn open_video(&self, path: &Path) -> Result<Self::Source> {
        Err(Error::Source(format!(
            "video {} needs the opencv feature",
            path.display()
        )))
    }

    fn open_image_list(&self, paths: &[PathBuf]) -> Result<Self::Source> {
        Ok(ImageListSource::new(paths.to_vec()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_plain_and_wrapped_lists() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain.json");
        std::fs::write(&plain, r#"["a.png", "b.png"]"#).unwrap();
        assert_eq!(
            read_image_list(&plain).unwrap(),
            vec![PathBuf::from("a.png"), PathBuf::from("b.png")]
        );

        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, r#"{"name": "set", "images": ["c.png"]}"#).unwrap();
        assert_eq!(read_image_list(&wrapped).unwrap(), vec![PathBuf::from("c.png")]);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"[1, 2]"#).unwrap();
        assert!(read_image_list(&bad).is_err());
    }

    #[test]
    fn image_list_is_finite_and_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, shade) in [10u8, 200].iter().enumerate() {
            let path = dir.path().join(format!("{i}.png"));
            image::RgbImage::from_pixel(4, 3, image::Rgb([*shade; 3]))
                .save(&path)
                .unwrap();
            paths.push(path);
        }

        let mut source = ImageFileOpener.open_image_list(&paths).unwrap();
        assert!(!source.is_live());
        assert_eq!(source.remaining(), 2);
        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.dimensions(), (4, 3));
        assert_eq!(first.get_pixel(0, 0)[0], 10);
        assert_eq!(source.next_frame().unwrap().unwrap().get_pixel(0, 0)[0], 200);
        assert!(source.next_frame().unwrap().is_none());
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn unreadable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.png");
        image::RgbImage::from_pixel(4, 3, image::Rgb([7; 3]))
            .save(&good)
            .unwrap();
        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not a png").unwrap();
        let paths = vec![
            good.clone(),
            dir.path().join("missing.png"),
            garbage,
            good,
        ];

        let mut source = ImageFileOpener.open_image_list(&paths).unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert_eq!(source.remaining(), 0);
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn trailing_bad_entry_ends_the_list() {
        let paths = vec![PathBuf::from("a"), PathBuf::from("b")];
        let mut at = 0;
        let mut calls = 0;
        let got = next_readable(&paths, &mut at, |p| {
            calls += 1;
            if p == Path::new("a") {
                Ok(1)
            } else {
                Err(Error::Source("unreadable".into()))
            }
        });
        assert_eq!(got, Some(1));
        assert_eq!(next_readable(&paths, &mut at, |_| -> Result<i32> {
            Err(Error::Source("unreadable".into()))
        }), None);
        assert_eq!(at, 2);
        assert_eq!(calls, 1);
    }

    #[test]
    fn live_inputs_need_a_capture_backend() {
        assert!(ImageFileOpener.open_camera(0).is_err());
        assert!(ImageFileOpener.open_video(Path::new("clip.avi")).is_err());
    }
}
