//! Interactive commands read from stdin while scanning

use anyhow::{anyhow, bail, Result};
use std::io::BufRead;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::capture::Resolution;
use crate::scanner::{Reconfigure, Session};
use crate::vision::RoiFilter;

/// Help text printed for `help`
pub const HELP: &str = "\
Commands:
  pause                 halt scanning, keep camera and workers
  resume                continue scanning
  capture               pause and scan the current frame once
  set workers N         recognition worker count
  set filter NAME       none, grayscale, contrast, brightness
  set frame-skip N      process every Nth display frame
  set frequency HZ      maximum recognition passes per second
  set threshold N       minimum confidence, 1-100
  set resolution WxH    capture resolution, or 'default'
  set camera ID         capture device, or 'default'
  status                print session status
  quit                  stop scanning and exit";

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Capture,
    Set(Reconfigure),
    Status,
    Help,
    Quit,
}

/// Parse one line such as "pause" or "set workers 2"
pub fn parse_command(line: &str) -> Result<Command> {
    let mut parts = line.split_whitespace();
    let verb = parts
        .next()
        .ok_or_else(|| anyhow!("empty command"))?
        .to_lowercase();

    let command = match verb.as_str() {
        "pause" | "p" => Command::Pause,
        "resume" | "start" | "r" => Command::Resume,
        "capture" | "c" => Command::Capture,
        "status" | "s" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        "set" => {
            let field = parts.next().ok_or_else(|| anyhow!("set needs a field"))?;
            let value = parts
                .next()
                .ok_or_else(|| anyhow!("set {} needs a value", field))?;
            Command::Set(parse_setting(field, value)?)
        }
        other => bail!("unknown command '{}', try 'help'", other),
    };

    if let Some(extra) = parts.next() {
        bail!("unexpected argument '{}'", extra);
    }
    Ok(command)
}

fn parse_setting(field: &str, value: &str) -> Result<Reconfigure> {
    let change = match field.to_lowercase().replace('_', "-").as_str() {
        "workers" | "worker-count" => Reconfigure::WorkerCount(value.parse()?),
        "filter" => Reconfigure::Filter(value.parse::<RoiFilter>()?),
        "frame-skip" | "skip" => Reconfigure::FrameSkip(value.parse()?),
        "frequency" | "freq" => Reconfigure::FrequencyHz(value.parse()?),
        "threshold" => Reconfigure::ConfidenceThreshold(value.parse()?),
        "resolution" => Reconfigure::Resolution(match value {
            "default" => None,
            _ => Some(value.parse::<Resolution>()?),
        }),
        "camera" => Reconfigure::Camera(match value {
            "default" => None,
            _ => Some(value.to_string()),
        }),
        other => bail!("unknown setting '{}'", other),
    };
    Ok(change)
}

/// Forward stdin lines on a channel; the channel closes at end of input
pub fn spawn_stdin_reader() -> UnboundedReceiver<String> {
    let (tx, rx) = unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
        debug!("Command input closed");
    });
    rx
}

/// Run a command against the session. Returns false when the user asked to quit.
pub async fn execute(session: &Session, command: Command) -> bool {
    let result = match command {
        Command::Quit => return false,
        Command::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Command::Status => {
            print_status(session);
            Ok(())
        }
        Command::Pause => session.pause().await,
        Command::Resume => session.start().await,
        Command::Capture => session
            .capture_once()
            .await
            .map(|outcome| info!("Single capture finished: {:?}", outcome)),
        Command::Set(change) => session.reconfigure(change).await,
    };

    if let Err(e) = result {
        warn!("Command failed: {}", e);
    }
    true
}

fn print_status(session: &Session) {
    let settings = session.settings();
    let indicator = session.indicator();
    println!("state:      {}", session.state());
    println!(
        "workers:    {} running, {} configured, cap {}",
        session.worker_count(),
        settings.worker_count,
        session.worker_cap()
    );
    println!(
        "rate:       {:.2} scans/s (frame skip {}, frequency {} Hz)",
        session.effective_frequency_hz(),
        settings.frame_skip,
        settings.frequency_hz
    );
    println!("filter:     {}", settings.filter);
    println!("threshold:  {}", settings.confidence_threshold);
    println!("indicator:  {} {}", indicator, indicator.color_hex());
    println!("lines:      {}", session.output().len());
}
