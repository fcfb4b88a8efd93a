use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, error, info, warn};
use opencv::{imgcodecs, prelude::*};

use pinhole_toolkit::calibrate::Calibration;
use pinhole_toolkit::keys::{is_stop_key, CalibrationCommand};
use pinhole_toolkit::output::{write_points, OutputNamer};
use pinhole_toolkit::overlay::{EventQueue, Measurement, Overlay};
use pinhole_toolkit::pose;
use pinhole_toolkit::report::CalibrationReport;
use pinhole_toolkit::session::{CaptureSession, Mode};
use pinhole_toolkit::settings::{InputSource, RawSettings, Settings};
use pinhole_toolkit::source::FrameSource;
use pinhole_toolkit::vision::capture::{flip, save_mat, CvOpener, CvSource};
use pinhole_toolkit::vision::convert::composite_mask;
use pinhole_toolkit::vision::detect::{detect_pattern, draw_pattern};
use pinhole_toolkit::vision::display::Window;
use pinhole_toolkit::vision::draw::{blink, draw_measurement, draw_pose, draw_status};
use pinhole_toolkit::vision::undistort::Undistorter;
use pinhole_toolkit::Result;

const WINDOW: &str = "Image View";
const LIVE_DELAY_MS: i32 = 50;

/// Calibrate a camera from a chessboard or circle grid, or, with `--pose`,
/// track the board with a saved calibration and measure on it.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON settings file.
    #[arg(default_value = "default.json")]
    settings: PathBuf,

    /// Half size of the sub-pixel corner search window.
    #[arg(long, default_value_t = 11)]
    win_size: i32,

    /// Saved calibration results; switches to the pose view.
    #[arg(long)]
    pose: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let raw = RawSettings::load_json(&args.settings)?;
    let (settings, source) = raw.validate(&CvOpener)?;
    info!("{}", settings.flags());

    match &args.pose {
        Some(results) => pose_view(args, &settings, source, results),
        None => calibration_view(args, &settings, source),
    }
}

/// Overlay sized to the current frame; rebuilt when the size changes.
fn overlay_for<'a>(slot: &'a mut Option<Overlay>, frame: &Mat) -> &'a mut Overlay {
    let (w, h) = (frame.cols() as u32, frame.rows() as u32);
    if slot.as_ref().map(|o| o.mask().dimensions()) != Some((w, h)) {
        *slot = Some(Overlay::new(w, h));
    }
    slot.get_or_insert_with(|| Overlay::new(w, h))
}

fn log_failure(what: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("could not {what}: {e}");
    }
}

/// Keys shared by both views.
fn handle_common(
    command: CalibrationCommand,
    settings: &Settings,
    namer: &mut OutputNamer,
    overlay: &mut Overlay,
    frame: &Mat,
) {
    match command {
        CalibrationCommand::SaveScreenshot => {
            let path = namer.screenshot(&settings.img_output_dir, "");
            log_failure("save screenshot", save_mat(&path, frame));
        }
        CalibrationCommand::SavePoints => {
            let path = namer.point_file(&settings.img_output_dir);
            log_failure("save points", write_points(&path, overlay.history()));
        }
        CalibrationCommand::ClearMask => overlay.reset_mask(),
        CalibrationCommand::PopPoint => {
            if let Some(p) = overlay.pop_point() {
                debug!("removed point {p}");
            }
        }
        _ => {}
    }
}

fn calibration_view(args: &Args, settings: &Settings, mut source: CvSource) -> Result<()> {
    let window = Window::new(WINDOW)?;
    let events = EventQueue::default();
    window.forward_mouse(events.clone())?;

    let live = source.is_live();
    let delay = if live { LIVE_DELAY_MS } else { settings.delay };
    let mut session = CaptureSession::new(settings.nr_frames, live);
    let mut namer = OutputNamer::new();
    let mut overlay_slot = None;
    let mut calibration: Option<Calibration> = None;
    let mut undistorter: Option<(Undistorter, (u32, u32))> = None;
    session.set_show_undistorted(settings.show_undistorted);

    loop {
        if session.ready() {
            calibration = session.run_calibration(settings);
            undistorter = None;
        }

        let Some(mut frame) = source.next_frame()? else {
            if session.needs_final_calibration() {
                calibration = session.run_calibration(settings);
            }
            break;
        };
        if settings.flip_vertical {
            flip(&mut frame, 0)?;
        }
        let size = (frame.cols() as u32, frame.rows() as u32);
        session.observe_frame(size.0, size.1);

        let corners = match detect_pattern(&frame, &settings.board, settings.use_fisheye, args.win_size)
        {
            Ok(corners) => corners,
            Err(e) => {
                warn!("detection failed: {e}");
                None
            }
        };
        if let Some(corners) = &corners {
            let raw = if live { Some(frame.try_clone()?) } else { None };
            let taken = session.offer(corners);
            draw_pattern(&mut frame, &settings.board, corners)?;
            if taken {
                info!("sample {} captured", session.samples().len());
                if let Some(raw) = raw {
                    let path = namer.screenshot(&settings.img_output_dir, "raw_");
                    log_failure("save raw frame", save_mat(&path, &raw));
                    let path = namer.screenshot(&settings.img_output_dir, "corners_");
                    log_failure("save annotated frame", save_mat(&path, &frame));
                    blink(&mut frame)?;
                }
            }
        }
        session.end_frame();

        let calibrated = session.mode() == Mode::Calibrated;
        draw_status(&mut frame, &session.status_text(), calibrated)?;

        if let (true, Some(calibration)) = (session.undistort_view(), &calibration) {
            if undistorter.as_ref().map(|(_, s)| *s) != Some(size) {
                undistorter = Some((Undistorter::new(&calibration.camera, size)?, size));
            }
            if let Some((u, _)) = &undistorter {
                frame = u.apply(&frame)?;
            }
        }

        let overlay = overlay_for(&mut overlay_slot, &frame);
        for event in events.drain() {
            overlay.handle(event);
        }
        composite_mask(overlay.mask(), &mut frame)?;
        window.show(&frame)?;

        let Some(command) = CalibrationCommand::from_key(window.wait_key(delay)?) else {
            continue;
        };
        match command {
            CalibrationCommand::Quit => break,
            CalibrationCommand::CaptureSample => session.request_capture(),
            CalibrationCommand::StartCapturing => {
                if session.start_capturing() {
                    info!("capturing, previous samples dropped");
                }
            }
            CalibrationCommand::ToggleUndistort => {
                if !session.toggle_undistorted() {
                    debug!("undistorted view needs a calibration");
                }
            }
            other => handle_common(other, settings, &mut namer, overlay, &frame),
        }
    }

    if let (InputSource::ImageList(paths), true, Some(calibration)) =
        (&settings.input, settings.show_undistorted, &calibration)
    {
        replay_undistorted(&window, paths, calibration)?;
    }
    Ok(())
}

/// Show every image of the list undistorted, one key press each.
fn replay_undistorted(window: &Window, paths: &[PathBuf], calibration: &Calibration) -> Result<()> {
    let mut undistorter: Option<(Undistorter, (u32, u32))> = None;
    for path in paths {
        let frame = imgcodecs::imread(&path.to_string_lossy(), imgcodecs::IMREAD_COLOR)?;
        if frame.empty() {
            warn!("could not read {}", path.display());
            continue;
        }
        let size = (frame.cols() as u32, frame.rows() as u32);
        if undistorter.as_ref().map(|(_, s)| *s) != Some(size) {
            undistorter = Some((Undistorter::new(&calibration.camera, size)?, size));
        }
        if let Some((u, _)) = &undistorter {
            window.show(&u.apply(&frame)?)?;
        }
        if is_stop_key(window.wait_key(0)?) {
            break;
        }
    }
    Ok(())
}

fn pose_view(args: &Args, settings: &Settings, mut source: CvSource, results: &Path) -> Result<()> {
    let report = CalibrationReport::load(results)?;
    let camera = report.camera_model()?;
    info!(
        "loaded calibration from {} (avg error {:.5})",
        results.display(),
        report.avg_reprojection_error
    );

    let window = Window::new(WINDOW)?;
    let events = EventQueue::default();
    window.forward_mouse(events.clone())?;

    let delay = if source.is_live() { LIVE_DELAY_MS } else { settings.delay };
    let object = settings.board.object_points();
    let mut namer = OutputNamer::new();
    let mut overlay_slot = None;
    let mut undistorter: Option<(Undistorter, (u32, u32))> = None;
    let mut measurement: Option<Measurement> = None;

    while let Some(mut frame) = source.next_frame()? {
        if settings.flip_vertical {
            flip(&mut frame, 0)?;
        }
        let size = (frame.cols() as u32, frame.rows() as u32);

        let corners = match detect_pattern(&frame, &settings.board, settings.use_fisheye, args.win_size)
        {
            Ok(corners) => corners,
            Err(e) => {
                warn!("detection failed: {e}");
                None
            }
        };
        // no board, no pose
        let estimate = corners.as_ref().and_then(|corners| {
            match pose::estimate(&camera, &object, corners, settings.board.square_size) {
                Ok(e) => {
                    debug!("rvec {:?} tvec {:?} rmse {:.4}", e.rvec, e.tvec, e.rmse);
                    Some(e)
                }
                Err(e) => {
                    warn!("pose estimation failed: {e}");
                    None
                }
            }
        });

        // axes, clicks and the measurement homography all live in the
        // undistorted image
        if undistorter.as_ref().map(|(_, s)| *s) != Some(size) {
            undistorter = Some((Undistorter::same_camera(&camera, size)?, size));
        }
        if let Some((u, _)) = &undistorter {
            frame = u.apply(&frame)?;
        }

        let overlay = overlay_for(&mut overlay_slot, &frame);
        for event in events.drain() {
            overlay.handle(event);
        }
        if let Some(h) = estimate.as_ref().and_then(|e| e.image_to_scene) {
            if let Some(m) = overlay.measure(&h) {
                info!("distance {:.3}", m.distance);
                measurement = Some(m);
            }
        }
        if let Some(e) = &estimate {
            draw_pose(&mut frame, e)?;
        }
        if let Some(m) = &measurement {
            draw_measurement(&mut frame, m)?;
        }
        composite_mask(overlay.mask(), &mut frame)?;
        window.show(&frame)?;

        match CalibrationCommand::from_key(window.wait_key(delay)?) {
            Some(CalibrationCommand::Quit) => break,
            Some(CalibrationCommand::ClearMask) => {
                overlay.reset_mask();
                measurement = None;
            }
            Some(command) => handle_common(command, settings, &mut namer, overlay, &frame),
            None => {}
        }
    }
    Ok(())
}
