//! Scan scheduler
//!
//! A task woken once per display frame. Each cycle applies the frame-skip and
//! frequency throttles, grabs a frame, maps the ROI, preprocesses it and hands
//! it to the aggregator without waiting for recognition to finish.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::refresh::RefreshSource;
use crate::capture::StreamHandle;
use crate::config::ScanSettings;
use crate::error::ScanError;
use crate::overlay::{map_overlay_to_frame, ViewportLayout};
use crate::shared::SessionState;
use crate::vision::{preprocess_frame, Aggregator, EncodedImage, WorkerPool};

/// Callback for errors that end the session
pub type FaultHandler = Box<dyn FnOnce(ScanError) + Send>;

/// Verdict of the two throttles for one display frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Frame counter has not reached the frame skip yet
    SkipFrame,
    /// Too little time since the last dispatch
    TooSoon,
    Admit,
}

/// Frame-skip and frequency throttles, carried across cycles
#[derive(Debug, Default)]
pub struct FrameThrottle {
    frame_counter: u32,
    last_dispatch: Option<Instant>,
}

impl FrameThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one display frame and decide whether it may be processed
    pub fn admit(&mut self, frame_skip: u32, frequency_hz: f64, now: Instant) -> ThrottleDecision {
        self.frame_counter += 1;
        if self.frame_counter < frame_skip.max(1) {
            return ThrottleDecision::SkipFrame;
        }
        self.frame_counter = 0;

        if let Some(last) = self.last_dispatch {
            if now.saturating_duration_since(last) < min_interval(frequency_hz) {
                return ThrottleDecision::TooSoon;
            }
        }
        ThrottleDecision::Admit
    }

    pub fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }
}

/// Shortest allowed gap between dispatches at a given frequency
fn min_interval(frequency_hz: f64) -> Duration {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        // Tiny frequencies overflow Duration; treat them as "never again"
        Duration::try_from_secs_f64(1.0 / frequency_hz).unwrap_or(Duration::MAX)
    } else {
        Duration::MAX
    }
}

/// What one cycle did
#[derive(Debug)]
pub enum CycleOutcome {
    /// Session is no longer scanning; stop rescheduling
    Halt,
    SkipFrame,
    TooSoon,
    /// Stream has no frame yet
    NotReady,
    /// Recognition pass issued
    Dispatched,
    /// A pass was still in flight
    Dropped,
    /// This cycle failed but scanning continues
    Error(ScanError),
    /// The session must stop
    Fault(ScanError),
}

/// Everything a cycle reads, shared with the session
#[derive(Clone)]
pub struct ScanContext {
    pub stream: Arc<dyn StreamHandle>,
    pub settings: Arc<RwLock<ScanSettings>>,
    pub layout: Arc<RwLock<ViewportLayout>>,
    pub pool: Arc<WorkerPool>,
    pub aggregator: Arc<Aggregator>,
    pub preview: Arc<RwLock<Option<EncodedImage>>>,
    pub state: watch::Receiver<SessionState>,
}

/// Per-run scheduler state
pub struct Scheduler {
    ctx: ScanContext,
    throttle: FrameThrottle,
}

impl Scheduler {
    pub fn new(ctx: ScanContext) -> Self {
        Self {
            ctx,
            throttle: FrameThrottle::new(),
        }
    }

    /// Run one display-frame cycle. Recognition is spawned, not awaited.
    pub fn run_cycle(&mut self, now: Instant) -> CycleOutcome {
        if *self.ctx.state.borrow() != SessionState::Scanning {
            return CycleOutcome::Halt;
        }

        let settings = self.ctx.settings.read().clone();

        match self
            .throttle
            .admit(settings.frame_skip, settings.frequency_hz, now)
        {
            ThrottleDecision::SkipFrame => return CycleOutcome::SkipFrame,
            ThrottleDecision::TooSoon => return CycleOutcome::TooSoon,
            ThrottleDecision::Admit => {}
        }

        if !self.ctx.stream.is_frame_ready() {
            trace!("Video not ready");
            return CycleOutcome::NotReady;
        }
        self.throttle.record_dispatch(now);

        let frame = match self.ctx.stream.grab_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to grab frame: {}", e);
                return CycleOutcome::Error(e);
            }
        };

        let (frame_width, frame_height) = frame.dimensions();
        let layout = *self.ctx.layout.read();
        let roi = match map_overlay_to_frame(&layout, frame_width, frame_height) {
            Ok(roi) => roi,
            Err(e) => return CycleOutcome::Fault(e),
        };
        trace!(
            "ROI coordinates: ({:.2}, {:.2}, {:.2}, {:.2})",
            roi.x,
            roi.y,
            roi.width,
            roi.height
        );

        let task = match preprocess_frame(&frame, roi, settings.filter) {
            Ok(task) => task,
            Err(e) => {
                warn!("Failed to preprocess frame: {}", e);
                return CycleOutcome::Error(e);
            }
        };
        trace!(elapsed_ms = frame.age().as_millis() as u64, "Frame preprocessed");
        *self.ctx.preview.write() = Some(task.image.clone());

        let Some(guard) = self.ctx.aggregator.try_begin() else {
            self.ctx.aggregator.drop_request();
            return CycleOutcome::Dropped;
        };

        let workers = self.ctx.pool.workers();
        let aggregator = self.ctx.aggregator.clone();
        let state = self.ctx.state.clone();
        let threshold = settings.confidence_threshold;
        tokio::spawn(async move {
            aggregator
                .dispatch(guard, workers, task.image, threshold, state)
                .await;
        });

        CycleOutcome::Dispatched
    }
}

/// Running scheduler task
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop rescheduling and wait for the current cycle to end.
    /// In-flight recognition is left to finish on its own.
    pub async fn halt(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Scan scheduler task failed: {}", e);
        }
    }
}

/// Start the scheduler loop on the current runtime
pub fn spawn(
    ctx: ScanContext,
    refresh: Arc<dyn RefreshSource>,
    on_fault: FaultHandler,
) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(scan_loop(Scheduler::new(ctx), refresh, cancel.clone(), on_fault));
    SchedulerHandle { cancel, task }
}

async fn scan_loop(
    mut scheduler: Scheduler,
    refresh: Arc<dyn RefreshSource>,
    cancel: CancellationToken,
    on_fault: FaultHandler,
) {
    let mut signal = refresh.subscribe();
    info!(stream = scheduler.ctx.stream.id(), "Scan scheduler started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Scan scheduler cancelled");
                break;
            }
            _ = signal.next_frame() => {}
        }

        match scheduler.run_cycle(Instant::now()) {
            CycleOutcome::Halt => {
                debug!("Session left scanning, scheduler halting");
                break;
            }
            CycleOutcome::Fault(e) => {
                warn!("Scan scheduler stopping: {}", e);
                on_fault(e);
                break;
            }
            CycleOutcome::Dispatched => debug!("Processing a new frame for OCR"),
            _ => {}
        }
    }

    info!("Scan scheduler stopped");
}
