use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;
use nalgebra as na;

use crate::error::Result;

const TIMESTAMP: &str = "%d-%m-%Y_%H-%M-%S";

/// Hands out numbered, timestamped file names for screenshots and point
/// dumps. Each kind keeps its own counter.
#[derive(Debug, Default)]
pub struct OutputNamer {
    screenshots: u32,
    point_files: u32,
}

fn file_name(root: &str, id: u32, extension: &str, now: DateTime<Local>) -> String {
    format!("{root}_{id:03}_{}.{extension}", now.format(TIMESTAMP))
}

impl OutputNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<dir>/<prefix>screenshot_NNN_<timestamp>.png`
    pub fn screenshot(&mut self, dir: &Path, prefix: &str) -> PathBuf {
        let id = self.screenshots;
        self.screenshots += 1;
        dir.join(file_name(
            &format!("{prefix}screenshot"),
            id,
            "png",
            Local::now(),
        ))
    }

    /// `<dir>/file_NNN_<timestamp>.txt`
    pub fn point_file(&mut self, dir: &Path) -> PathBuf {
        let id = self.point_files;
        self.point_files += 1;
        dir.join(file_name("file", id, "txt", Local::now()))
    }
}

/// One `[x,y]` line per point.
pub fn write_points(path: &Path, points: &[na::Point2<f64>]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut out = std::io::BufWriter::new(std::fs::File::create(path)?);
    for p in points {
        writeln!(out, "[{},{}]", p.x, p.y)?;
    }
    out.flush()?;
    info!("{} points written to {}", points.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn names_are_numbered_per_kind() {
        let mut namer = OutputNamer::new();
        let dir = Path::new("out");
        let a = namer.screenshot(dir, "view_");
        let b = namer.screenshot(dir, "raw_");
        let p = namer.point_file(dir);

        let a = a.file_name().unwrap().to_str().unwrap();
        let b = b.file_name().unwrap().to_str().unwrap();
        let p = p.file_name().unwrap().to_str().unwrap();
        assert!(a.starts_with("view_screenshot_000_"), "{a}");
        assert!(b.starts_with("raw_screenshot_001_"), "{b}");
        assert!(a.ends_with(".png"));
        assert!(p.starts_with("file_000_") && p.ends_with(".txt"), "{p}");
    }

    #[test]
    fn timestamp_format() {
        let now = Local.with_ymd_and_hms(2023, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(
            file_name("screenshot", 4, "png", now),
            "screenshot_004_07-03-2023_09-05-02.png"
        );
    }

    #[test]
    fn points_file_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pts").join("file.txt");
        write_points(&path, &[na::Point2::new(1.5, 2.0), na::Point2::new(-3.0, 4.25)]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[1.5,2]\n[-3,4.25]\n");
    }
}
