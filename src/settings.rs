use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::board::{BoardSpec, Pattern};
use crate::calibrate::CalibrationOptions;
use crate::error::{Error, Result};
use crate::source::{read_image_list, SourceOpener};

/// One reason a settings file was rejected.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SettingsIssue {
    #[error("invalid board size {width}x{height}")]
    BoardSize { width: i32, height: i32 },
    #[error("invalid square size {0}")]
    SquareSize(f32),
    #[error("invalid number of frames {0}")]
    FrameCount(i32),
    #[error("calibration pattern does not exist: {0:?}")]
    UnknownPattern(String),
    #[error("input does not exist: {0:?}")]
    Input(String),
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    // settings files written by other tools use 0/1
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(d)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

/// The `Settings` node of a configuration file, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawSettings {
    #[serde(rename = "BoardSize_Width")]
    pub board_width: i32,
    #[serde(rename = "BoardSize_Height")]
    pub board_height: i32,
    #[serde(rename = "Square_Size")]
    pub square_size: f32,
    #[serde(rename = "Calibrate_Pattern")]
    pub pattern: String,
    #[serde(rename = "Calibrate_NrOfFrameToUse")]
    pub nr_frames: i32,
    /// `fx / fy`, 0 leaves the ratio free.
    #[serde(rename = "Calibrate_FixAspectRatio")]
    pub aspect_ratio: f32,
    #[serde(rename = "Calibrate_AssumeZeroTangentialDistortion", deserialize_with = "flag")]
    pub zero_tangent_dist: bool,
    #[serde(rename = "Calibrate_FixPrincipalPointAtTheCenter", deserialize_with = "flag")]
    pub fix_principal_point: bool,
    #[serde(rename = "Calibrate_UseFisheyeModel", deserialize_with = "flag")]
    pub use_fisheye: bool,
    #[serde(rename = "Write_DetectedFeaturePoints", deserialize_with = "flag")]
    pub write_points: bool,
    #[serde(rename = "Write_extrinsicParameters", deserialize_with = "flag")]
    pub write_extrinsics: bool,
    #[serde(rename = "Write_gridPoints", deserialize_with = "flag")]
    pub write_grid: bool,
    #[serde(rename = "Write_outputFileName")]
    pub output_file_name: String,
    #[serde(rename = "Write_imgOutputFolder")]
    pub img_output_dir: String,
    #[serde(rename = "Write_xmlOutputFolder")]
    pub results_dir: String,
    #[serde(rename = "Show_UndistortedImage", deserialize_with = "flag")]
    pub show_undistorted: bool,
    #[serde(rename = "Input_FlipAroundHorizontalAxis", deserialize_with = "flag")]
    pub flip_vertical: bool,
    #[serde(rename = "Input_Delay")]
    pub delay: i32,
    #[serde(rename = "Input")]
    pub input: String,
    #[serde(rename = "Fix_K1", deserialize_with = "flag")]
    pub fix_k1: bool,
    #[serde(rename = "Fix_K2", deserialize_with = "flag")]
    pub fix_k2: bool,
    #[serde(rename = "Fix_K3", deserialize_with = "flag")]
    pub fix_k3: bool,
    #[serde(rename = "Fix_K4", deserialize_with = "flag")]
    pub fix_k4: bool,
    #[serde(rename = "Fix_K5", deserialize_with = "flag")]
    pub fix_k5: bool,
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            board_width: 0,
            board_height: 0,
            square_size: 0.0,
            pattern: String::new(),
            nr_frames: 0,
            aspect_ratio: 0.0,
            zero_tangent_dist: false,
            fix_principal_point: false,
            use_fisheye: false,
            write_points: false,
            write_extrinsics: false,
            write_grid: false,
            output_file_name: "out_camera_data.json".into(),
            img_output_dir: "img".into(),
            results_dir: "results".into(),
            show_undistorted: false,
            flip_vertical: false,
            delay: 100,
            input: String::new(),
            fix_k1: false,
            fix_k2: false,
            fix_k3: false,
            fix_k4: false,
            fix_k5: false,
        }
    }
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(rename = "Settings", default)]
    settings: RawSettings,
}

impl RawSettings {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: SettingsFile = serde_json::from_str(text)?;
        Ok(file.settings)
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("reading settings from {}", path.display());
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check every invariant, resolve the input and open it.
    ///
    /// All problems are reported together; the opened source is only handed
    /// back when there are none.
    pub fn validate<O: SourceOpener>(&self, opener: &O) -> Result<(Settings, O::Source)> {
        let mut issues = Vec::new();
        if self.board_width <= 0 || self.board_height <= 0 {
            issues.push(SettingsIssue::BoardSize {
                width: self.board_width,
                height: self.board_height,
            });
        }
        if self.square_size <= 10e-6 {
            issues.push(SettingsIssue::SquareSize(self.square_size));
        }
        if self.nr_frames <= 0 {
            issues.push(SettingsIssue::FrameCount(self.nr_frames));
        }
        let pattern = Pattern::from_name(&self.pattern);
        if pattern.is_none() {
            issues.push(SettingsIssue::UnknownPattern(self.pattern.clone()));
        }

        let input = InputSource::resolve(&self.input);
        let mut nr_frames = self.nr_frames.max(0) as usize;
        if let Some(InputSource::ImageList(paths)) = &input {
            nr_frames = nr_frames.min(paths.len());
        }
        let source = match &input {
            Some(InputSource::Camera(index)) => opener.open_camera(*index),
            Some(InputSource::VideoFile(path)) => opener.open_video(path),
            Some(InputSource::ImageList(paths)) => opener.open_image_list(paths),
            None => Err(Error::Source("empty input".into())),
        };
        let source = match source {
            Ok(source) => Some(source),
            Err(e) => {
                warn!("{e}");
                issues.push(SettingsIssue::Input(self.input.clone()));
                None
            }
        };

        match (pattern, input, source) {
            (Some(pattern), Some(input), Some(source)) if issues.is_empty() => {
                let settings = Settings {
                    board: BoardSpec {
                        width: self.board_width as u32,
                        height: self.board_height as u32,
                        square_size: self.square_size as f64,
                        pattern,
                    },
                    nr_frames,
                    aspect_ratio: self.aspect_ratio as f64,
                    zero_tangent_dist: self.zero_tangent_dist,
                    fix_principal_point: self.fix_principal_point,
                    use_fisheye: self.use_fisheye,
                    write_points: self.write_points,
                    write_extrinsics: self.write_extrinsics,
                    write_grid: self.write_grid,
                    output_file_name: self.output_file_name.clone(),
                    img_output_dir: PathBuf::from(&self.img_output_dir),
                    results_dir: PathBuf::from(&self.results_dir),
                    show_undistorted: self.show_undistorted,
                    flip_vertical: self.flip_vertical,
                    delay: self.delay,
                    input,
                    fix_k: [
                        self.fix_k1,
                        self.fix_k2,
                        self.fix_k3,
                        self.fix_k4,
                        self.fix_k5,
                    ],
                };
                Ok((settings, source))
            }
            _ => Err(Error::Settings(issues)),
        }
    }
}

/// Where frames come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Camera(i32),
    VideoFile(PathBuf),
    ImageList(Vec<PathBuf>),
}

impl InputSource {
    /// A leading digit selects a camera, a readable `.json` list selects an
    /// image list, anything else is treated as a video file. `None` for an
    /// empty descriptor.
    pub fn resolve(input: &str) -> Option<Self> {
        let first = input.chars().next()?;
        if first.is_ascii_digit() {
            let digits: String = input.chars().take_while(char::is_ascii_digit).collect();
            return digits.parse().ok().map(Self::Camera);
        }
        let path = Path::new(input);
        let is_list = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_list {
            match read_image_list(path) {
                Ok(paths) => return Some(Self::ImageList(paths)),
                Err(e) => warn!("{input} is not an image list ({e}), trying it as a video"),
            }
        }
        Some(Self::VideoFile(path.to_path_buf()))
    }
}

/// Validated configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub board: BoardSpec,
    /// Samples to collect before calibrating.
    pub nr_frames: usize,
    pub aspect_ratio: f64,
    pub zero_tangent_dist: bool,
    pub fix_principal_point: bool,
    pub use_fisheye: bool,
    pub write_points: bool,
    pub write_extrinsics: bool,
    pub write_grid: bool,
    pub output_file_name: String,
    pub img_output_dir: PathBuf,
    pub results_dir: PathBuf,
    pub show_undistorted: bool,
    pub flip_vertical: bool,
    /// Key wait in ms between still images.
    pub delay: i32,
    pub input: InputSource,
    pub fix_k: [bool; 5],
}

impl Settings {
    pub fn results_path(&self) -> PathBuf {
        self.results_dir.join(&self.output_file_name)
    }

    pub fn is_image_list(&self) -> bool {
        matches!(self.input, InputSource::ImageList(_))
    }

    pub fn flags(&self) -> CalibrationFlags {
        CalibrationFlags::from_settings(self)
    }

    pub fn calibration_options(&self) -> CalibrationOptions {
        let [k1, k2, k3, k4, k5] = self.fix_k;
        if self.use_fisheye {
            CalibrationOptions {
                fisheye: true,
                aspect_ratio: None,
                fix_principal_point: self.fix_principal_point,
                zero_tangent_dist: false,
                fix_k: [k1, k2, k3, k4, false],
            }
        } else {
            CalibrationOptions {
                fisheye: false,
                aspect_ratio: (self.aspect_ratio != 0.0).then_some(self.aspect_ratio),
                fix_principal_point: self.fix_principal_point,
                zero_tangent_dist: self.zero_tangent_dist,
                fix_k: [k1, k2, k3, k4, k5],
            }
        }
    }
}

mod bits {
    pub const FIX_ASPECT_RATIO: i32 = 0x0002;
    pub const FIX_PRINCIPAL_POINT: i32 = 0x0004;
    pub const ZERO_TANGENT_DIST: i32 = 0x0008;
    pub const FIX_K1: i32 = 0x0020;
    pub const FIX_K2: i32 = 0x0040;
    pub const FIX_K3: i32 = 0x0080;
    pub const FIX_K4: i32 = 0x0800;
    pub const FIX_K5: i32 = 0x1000;

    pub mod fisheye {
        pub const RECOMPUTE_EXTRINSIC: i32 = 1 << 1;
        pub const FIX_SKEW: i32 = 1 << 3;
        pub const FIX_K1: i32 = 1 << 4;
        pub const FIX_K2: i32 = 1 << 5;
        pub const FIX_K3: i32 = 1 << 6;
        pub const FIX_K4: i32 = 1 << 7;
        pub const FIX_PRINCIPAL_POINT: i32 = 1 << 9;
    }
}

/// Calibration flags in OpenCV's bit layout, stored in results files so
/// they stay readable by OpenCV tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationFlags {
    bits: i32,
    fisheye: bool,
}

impl CalibrationFlags {
    pub fn from_settings(s: &Settings) -> Self {
        let mut bits = 0;
        let [k1, k2, k3, k4, k5] = s.fix_k;
        if s.use_fisheye {
            use self::bits::fisheye::*;
            bits = FIX_SKEW | RECOMPUTE_EXTRINSIC;
            for (set, bit) in [(k1, FIX_K1), (k2, FIX_K2), (k3, FIX_K3), (k4, FIX_K4)] {
                if set {
                    bits |= bit;
                }
            }
            if s.fix_principal_point {
                bits |= FIX_PRINCIPAL_POINT;
            }
        } else {
            use self::bits::*;
            for (set, bit) in [
                (s.fix_principal_point, FIX_PRINCIPAL_POINT),
                (s.zero_tangent_dist, ZERO_TANGENT_DIST),
                (s.aspect_ratio != 0.0, FIX_ASPECT_RATIO),
                (k1, FIX_K1),
                (k2, FIX_K2),
                (k3, FIX_K3),
                (k4, FIX_K4),
                (k5, FIX_K5),
            ] {
                if set {
                    bits |= bit;
                }
            }
        }
        Self {
            bits,
            fisheye: s.use_fisheye,
        }
    }

    pub fn bits(&self) -> i32 {
        self.bits
    }

    pub fn names(&self) -> Vec<&'static str> {
        let table: &[(i32, &str)] = if self.fisheye {
            use self::bits::fisheye::*;
            &[
                (FIX_SKEW, "fix_skew"),
                (FIX_K1, "fix_k1"),
                (FIX_K2, "fix_k2"),
                (FIX_K3, "fix_k3"),
                (FIX_K4, "fix_k4"),
                (FIX_PRINCIPAL_POINT, "fix_principal_point"),
                (RECOMPUTE_EXTRINSIC, "recompute_extrinsic"),
            ]
        } else {
            use self::bits::*;
            &[
                (FIX_ASPECT_RATIO, "fix_aspect_ratio"),
                (FIX_PRINCIPAL_POINT, "fix_principal_point"),
                (ZERO_TANGENT_DIST, "zero_tangent_dist"),
                (FIX_K1, "fix_k1"),
                (FIX_K2, "fix_k2"),
                (FIX_K3, "fix_k3"),
                (FIX_K4, "fix_k4"),
                (FIX_K5, "fix_k5"),
            ]
        };
        table
            .iter()
            .filter(|(bit, _)| self.bits & bit != 0)
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Display for CalibrationFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flags:")?;
        for name in self.names() {
            write!(f, " +{name}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::source::ImageFileOpener;

    fn raw(input: &str) -> RawSettings {
        RawSettings {
            board_width: 9,
            board_height: 6,
            square_size: 25.0,
            pattern: "CHESSBOARD".into(),
            nr_frames: 25,
            input: input.into(),
            ..Default::default()
        }
    }

    fn image_list(dir: &Path, count: usize) -> PathBuf {
        let names: Vec<String> = (0..count).map(|i| format!("img_{i}.png")).collect();
        let path = dir.join("images.json");
        std::fs::write(&path, serde_json::to_string(&names).unwrap()).unwrap();
        path
    }

    #[test]
    fn parses_original_key_names_and_int_flags() {
        let text = r#"{"Settings": {
            "BoardSize_Width": 9, "BoardSize_Height": 6, "Square_Size": 50.0,
            "Calibrate_Pattern": "ASYMMETRIC_CIRCLES_GRID",
            "Calibrate_NrOfFrameToUse": 10,
            "Calibrate_AssumeZeroTangentialDistortion": 1,
            "Calibrate_UseFisheyeModel": false,
            "Fix_K3": 1,
            "Input": "0"
        }}"#;
        let raw = RawSettings::from_json_str(text).unwrap();
        assert_eq!(raw.board_width, 9);
        assert_eq!(raw.pattern, "ASYMMETRIC_CIRCLES_GRID");
        assert!(raw.zero_tangent_dist);
        assert!(raw.fix_k3);
        assert!(!raw.fix_k1);
        assert_eq!(raw.delay, 100);
    }

    #[test]
    fn rejects_non_positive_board_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let list = image_list(dir.path(), 3);
        for (w, h) in [(0, 6), (9, 0), (-1, 6), (9, -4)] {
            let mut s = raw(list.to_str().unwrap());
            s.board_width = w;
            s.board_height = h;
            match s.validate(&ImageFileOpener) {
                Err(Error::Settings(issues)) => assert_eq!(
                    issues,
                    vec![SettingsIssue::BoardSize {
                        width: w,
                        height: h
                    }]
                ),
                other => panic!("expected settings error, got {other:?}"),
            }
        }
    }

    #[test]
    fn collects_every_issue() {
        let mut s = raw("");
        s.square_size = 1e-6;
        s.nr_frames = 0;
        s.pattern = "CHARUCO".into();
        let Err(Error::Settings(issues)) = s.validate(&ImageFileOpener) else {
            panic!("expected settings error");
        };
        assert_eq!(issues.len(), 4);
        assert!(issues.contains(&SettingsIssue::UnknownPattern("CHARUCO".into())));
        assert!(issues.contains(&SettingsIssue::Input(String::new())));
    }

    #[test]
    fn image_list_clamps_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        let list = image_list(dir.path(), 3);
        let (settings, source) = raw(list.to_str().unwrap())
            .validate(&ImageFileOpener)
            .unwrap();
        assert_eq!(settings.nr_frames, 3);
        assert!(settings.is_image_list());
        assert_eq!(source.remaining(), 3);
    }

    #[test]
    fn unopenable_camera_is_an_input_issue() {
        let Err(Error::Settings(issues)) = raw("1").validate(&ImageFileOpener) else {
            panic!("expected settings error");
        };
        assert_eq!(issues, vec![SettingsIssue::Input("1".into())]);
    }

    #[test]
    fn input_resolution() {
        assert_eq!(InputSource::resolve("2"), Some(InputSource::Camera(2)));
        assert_eq!(InputSource::resolve("0abc"), Some(InputSource::Camera(0)));
        assert_eq!(
            InputSource::resolve("clip.avi"),
            Some(InputSource::VideoFile("clip.avi".into()))
        );
        assert_eq!(
            InputSource::resolve("missing.json"),
            Some(InputSource::VideoFile("missing.json".into()))
        );
        assert_eq!(InputSource::resolve(""), None);
    }

    #[test]
    fn pinhole_flags() {
        let dir = tempfile::tempdir().unwrap();
        let list = image_list(dir.path(), 3);
        let mut s = raw(list.to_str().unwrap());
        s.aspect_ratio = 1.0;
        s.zero_tangent_dist = true;
        s.fix_k3 = true;
        let (settings, _) = s.validate(&ImageFileOpener).unwrap();
        let flags = settings.flags();
        assert_eq!(flags.bits(), 2 | 8 | 128);
        assert_eq!(
            flags.names(),
            vec!["fix_aspect_ratio", "zero_tangent_dist", "fix_k3"]
        );
        assert_eq!(flags.to_string(), "flags: +fix_aspect_ratio +zero_tangent_dist +fix_k3");

        let options = settings.calibration_options();
        assert_eq!(options.aspect_ratio, Some(1.0));
        assert!(options.zero_tangent_dist);
        assert_eq!(options.fix_k, [false, false, true, false, false]);
    }

    #[test]
    fn fisheye_flags_are_remapped() {
        let dir = tempfile::tempdir().unwrap();
        let list = image_list(dir.path(), 3);
        let mut s = raw(list.to_str().unwrap());
        s.use_fisheye = true;
        s.zero_tangent_dist = true;
        s.aspect_ratio = 1.0;
        s.fix_k1 = true;
        s.fix_principal_point = true;
        let (settings, _) = s.validate(&ImageFileOpener).unwrap();
        assert_eq!(settings.flags().bits(), 8 | 2 | 16 | 512);

        let options = settings.calibration_options();
        assert!(options.fisheye);
        assert_eq!(options.aspect_ratio, None);
        assert!(!options.zero_tangent_dist);
        assert!(options.fix_principal_point);
    }
}
