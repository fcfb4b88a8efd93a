use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{error, info};
use opencv::{core, prelude::*};

use pinhole_toolkit::keys::TrackerCommand;
use pinhole_toolkit::overlay::{EventQueue, InputEvent};
use pinhole_toolkit::source::FrameSource;
use pinhole_toolkit::tracker::{Point, PointTracker, TrackerConfig};
use pinhole_toolkit::vision::capture::{flip, open_tracker_input};
use pinhole_toolkit::vision::convert::to_gray;
use pinhole_toolkit::vision::display::Window;
use pinhole_toolkit::vision::draw::{draw_arrows, draw_hud, draw_points};
use pinhole_toolkit::vision::flow::CvFlow;
use pinhole_toolkit::Result;

const WINDOW: &str = "LK Demo";
const QUALITY: &str = "Quality";

/// Track corners with pyramidal Lucas-Kanade. Click to add or remove a point.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Camera index (single digit) or video file.
    #[arg(default_value = "0")]
    input: String,
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
    let mut source = open_tracker_input(&args.input)?;
    info!("Hot keys: ESC quit, r re-initialise, c clear points, n night mode");

    let config = TrackerConfig::default();
    let mut flow = CvFlow::new(config);
    let mut tracker = PointTracker::<CvFlow>::new(config);

    let window = Window::new(WINDOW)?;
    let clicks = EventQueue::default();
    window.forward_clicks(clicks.clone())?;
    let mut quality_pos = (tracker.quality() * 100.0).round() as i32;
    window.add_trackbar(QUALITY, quality_pos, 99)?;

    let mut night_mode = false;
    let mut last = Instant::now();

    while let Some(mut frame) = source.next_frame()? {
        flip(&mut frame, 1)?;
        let gray = to_gray(&frame)?;

        let pos = window.trackbar(QUALITY)?;
        if pos != quality_pos {
            quality_pos = pos;
            tracker.set_quality_level(pos);
            info!("quality level {:.2}", tracker.quality());
        }
        for event in clicks.drain() {
            if let InputEvent::PointClick(x, y) = event {
                tracker.click(Point::new(x as f32, y as f32));
            }
        }

        if night_mode {
            frame.set_to(&core::Scalar::all(0.0), &core::no_array())?;
        }

        let report = tracker.step(&mut flow, gray)?;
        draw_arrows(&mut frame, &report.arrows)?;
        draw_points(&mut frame, tracker.points())?;

        let now = Instant::now();
        let fps = 1.0 / now.duration_since(last).as_secs_f64().max(1e-6);
        last = now;
        draw_hud(&mut frame, tracker.points().len(), fps)?;
        window.show(&frame)?;

        match TrackerCommand::from_key(window.wait_key(10)?) {
            Some(TrackerCommand::Quit) => break,
            Some(TrackerCommand::Reinitialize) => tracker.reinitialize(),
            Some(TrackerCommand::ClearPoints) => tracker.clear(),
            Some(TrackerCommand::ToggleNightMode) => night_mode = !night_mode,
            None => {}
        }
    }
    Ok(())
}
