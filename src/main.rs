//! roi-scanner - Real-time region-of-interest text scanner
//!
//! Samples frames from a video source, crops and enhances the region under an
//! overlay rectangle, and merges OCR results from a pool of workers into an
//! append-only text stream.

mod capture;
mod commands;
mod config;
mod error;
mod overlay;
mod scanner;
mod shared;
mod storage;
mod vision;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::capture::{CaptureSource, ImageSequenceSource, Resolution, COMMON_RESOLUTIONS};
use crate::config::{detect_worker_cap, AppConfig};
use crate::overlay::{DisplayRect, Indicator};
use crate::scanner::{DisplayRefresh, Session, SessionOptions};
use crate::shared::{NoticeLevel, SessionEvent, SessionState};
use crate::storage::ExportFormat;
use crate::vision::{DispatchOutcome, RoiFilter, TesseractFactory};

/// roi-scanner - Real-time ROI text scanner
#[derive(Parser, Debug)]
#[command(name = "roi-scanner")]
#[command(about = "Scan text inside a region of a live video source")]
struct Args {
    /// Directory of still images acting as the camera
    #[arg(long, value_name = "DIR")]
    frames: Option<PathBuf>,

    /// Playback rate of the image sequence in frames per second
    #[arg(long)]
    source_fps: Option<f64>,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Capture device id, as printed by --list-cameras
    #[arg(long)]
    camera: Option<String>,

    /// Capture resolution as WIDTHxHEIGHT
    #[arg(long)]
    resolution: Option<Resolution>,

    /// Filter applied before cropping: none, grayscale, contrast, brightness
    #[arg(long)]
    filter: Option<RoiFilter>,

    /// Process every Nth display frame
    #[arg(long)]
    frame_skip: Option<u32>,

    /// Maximum recognition passes per second
    #[arg(long)]
    frequency: Option<f64>,

    /// Minimum confidence (1-100) for text to be accepted
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<i64>,

    /// Number of recognition workers
    #[arg(long)]
    workers: Option<usize>,

    /// Recognition language, e.g. eng or eng+deu
    #[arg(long)]
    language: Option<String>,

    /// ROI overlay rectangle in display coordinates as LEFT,TOP,WIDTH,HEIGHT
    #[arg(long, allow_hyphen_values = true)]
    overlay: Option<DisplayRect>,

    /// Displayed video rectangle in display coordinates as LEFT,TOP,WIDTH,HEIGHT
    #[arg(long, allow_hyphen_values = true)]
    video: Option<DisplayRect>,

    /// Seconds to scan before stopping (default: until Ctrl-C)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Read commands (pause, resume, set ..., status, quit) from stdin while scanning
    #[arg(short, long)]
    interactive: bool,

    /// Pause after scanning and run one more pass on the current frame
    #[arg(long)]
    capture_once: bool,

    /// Write the output to a file (default: the data directory)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    export: Option<Option<PathBuf>>,

    /// Format of the exported output
    #[arg(long, value_enum, default_value_t = ExportFormat::Text)]
    export_format: ExportFormat,

    /// Save the last preprocessed ROI image as PNG
    #[arg(long, value_name = "FILE")]
    dump_roi: Option<PathBuf>,

    /// Persist the effective configuration before scanning
    #[arg(long)]
    save_config: bool,

    /// List capture devices and exit
    #[arg(long)]
    list_cameras: bool,

    /// List common capture resolutions and exit
    #[arg(long)]
    list_resolutions: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.list_resolutions {
        println!("Common resolutions:");
        for resolution in COMMON_RESOLUTIONS {
            println!("  {}", resolution);
        }
        return Ok(());
    }

    let (mut config, config_path) = load_or_create_config(args.config.clone());
    apply_overrides(&mut config, &args);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(run(args, config, config_path))
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(explicit: Option<PathBuf>) -> (AppConfig, Option<PathBuf>) {
    let path = explicit.or_else(|| {
        storage::get_config_dir()
            .map(|dir| dir.join("config.toml"))
            .map_err(|e| warn!("{}", e))
            .ok()
    });

    if let Some(path) = &path {
        if path.exists() {
            match config::load_config(path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    return (config, Some(path.clone()));
                }
                Err(e) => warn!("Could not read {:?}: {}", path, e),
            }
        }
    }
    info!("Using default configuration");
    (AppConfig::default(), path)
}

/// Apply command-line values on top of the loaded configuration
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    let scan = &mut config.scan;
    if let Some(camera) = &args.camera {
        scan.camera_id = Some(camera.clone());
    }
    if let Some(resolution) = args.resolution {
        scan.resolution = Some(resolution);
    }
    if let Some(filter) = args.filter {
        scan.filter = filter;
    }
    if let Some(frame_skip) = args.frame_skip {
        scan.frame_skip = frame_skip;
    }
    if let Some(frequency) = args.frequency {
        scan.frequency_hz = frequency;
    }
    if let Some(threshold) = args.threshold {
        scan.set_confidence_threshold(threshold);
    }
    if let Some(workers) = args.workers {
        scan.worker_count = workers;
    }
    if let Some(language) = &args.language {
        config.engine.language = language.clone();
    }
    if let Some(overlay) = args.overlay {
        config.display.overlay = overlay;
    }
    if let Some(video) = args.video {
        config.display.video = video;
    }
}

async fn run(args: Args, config: AppConfig, config_path: Option<PathBuf>) -> Result<()> {
    let frames = args
        .frames
        .clone()
        .context("--frames DIR is required to scan or list cameras")?;
    let mut source = ImageSequenceSource::new(frames);
    if let Some(fps) = args.source_fps {
        source = source.with_frame_rate(fps);
    }
    let capture = Arc::new(source);

    if args.list_cameras {
        println!("Available cameras:");
        let devices = capture.list_devices().await?;
        if devices.is_empty() {
            println!("  No image sequences found");
        }
        for device in devices {
            let id = if device.id.is_empty() { "(default)" } else { device.id.as_str() };
            println!("  {} - {}", id, device.label);
        }
        return Ok(());
    }

    if args.save_config {
        match &config_path {
            Some(path) => config::save_config(&config, path)?,
            None => warn!("No configuration path available, not saving"),
        }
    }

    info!("roi-scanner starting...");

    let session = Session::new(
        config.scan.clone(),
        config.display.layout(),
        capture,
        Arc::new(TesseractFactory::new(config.engine.tesseract_path.clone())),
        Arc::new(DisplayRefresh::new(config.display.refresh_rate_hz)?),
        SessionOptions {
            language: config.engine.language.clone(),
            worker_cap: detect_worker_cap(),
        },
    )?;
    spawn_event_printer(session.events());

    session.start().await.context("Failed to start scanning")?;
    if args.interactive {
        println!("{}", commands::HELP);
    }

    let deadline = async {
        match args.duration {
            Some(secs) if secs.is_finite() && secs > 0.0 => {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await
            }
            _ => {
                info!("Scanning... (Press Ctrl-C to stop)");
                std::future::pending::<()>().await
            }
        }
    };
    tokio::pin!(deadline);

    let mut input = args.interactive.then(commands::spawn_stdin_reader);
    let mut state = session.subscribe_state();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("[state] {}", current);
                if current == SessionState::Stopped {
                    warn!("Session stopped on its own, finishing");
                    break;
                }
            }
            line = next_line(&mut input) => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match commands::parse_command(&line) {
                    Ok(command) => {
                        if !commands::execute(&session, command).await {
                            break;
                        }
                    }
                    Err(e) => eprintln!("[error] {}", e),
                },
                None => input = None,
            },
        }
    }

    if args.capture_once {
        match session.capture_once().await {
            Ok(outcome) => info!("Single capture finished: {:?}", outcome),
            Err(e) => error!("Single capture failed: {}", e),
        }
    }

    // The preview is cleared on stop
    if let Some(path) = &args.dump_roi {
        match session.preview() {
            Some(preview) => storage::save_preview(&preview, path)?,
            None => warn!("No ROI preview to save"),
        }
    }

    session.stop().await;

    let entries = session.output();
    println!("--- {} line(s) scanned ---", entries.len());
    print!("{}", session.export_output());

    if let Some(target) = &args.export {
        let path = match target {
            Some(path) => path.clone(),
            None => storage::default_export_path(&storage::get_data_dir()?, args.export_format),
        };
        storage::export_output(&entries, args.export_format, &path)?;
    }

    info!("roi-scanner shutdown complete");
    Ok(())
}

/// Next stdin line, or never when input is disabled or closed
async fn next_line(input: &mut Option<UnboundedReceiver<String>>) -> Option<String> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Print accepted text and notices as they arrive
fn spawn_event_printer(events: Receiver<SessionEvent>) {
    std::thread::spawn(move || {
        for event in events.iter() {
            match event {
                SessionEvent::Notice(notice) => match notice.level {
                    NoticeLevel::Error => eprintln!("[error] {}", notice.message),
                    NoticeLevel::Info => eprintln!("[info] {}", notice.message),
                },
                SessionEvent::DispatchCompleted(outcome) => {
                    let indicator = match &outcome {
                        DispatchOutcome::Accepted { .. } => Indicator::Accepted,
                        DispatchOutcome::Rejected { .. } | DispatchOutcome::Failed { .. } => {
                            Indicator::Rejected
                        }
                        _ => continue,
                    };
                    match outcome {
                        DispatchOutcome::Accepted {
                            text,
                            confidence,
                            appended: true,
                        } => println!("{} {} ({:.0}%)", swatch(indicator), text, confidence),
                        _ => eprintln!("{} {}", swatch(indicator), indicator),
                    }
                }
                SessionEvent::StateChanged { .. } => {}
            }
        }
    });
}

/// Indicator colour as a truecolor terminal block
fn swatch(indicator: Indicator) -> String {
    let [r, g, b] = indicator.color_rgb();
    format!("\x1b[38;2;{};{};{}m\u{25a0}\x1b[0m", r, g, b)
}
