//! Scan session state machine
//!
//! Owns the capture stream, the worker pool and the scheduler, and moves them
//! through Idle, Starting, Scanning, Paused and Stopped. Every transition holds
//! one async mutex, so transitions and reconfigurations never interleave.

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::refresh::RefreshSource;
use super::scheduler::{self, ScanContext, SchedulerHandle};
use crate::capture::{CaptureRequest, CaptureSource, DeviceInfo, Resolution, StreamHandle};
use crate::config::{detect_worker_cap, ScanSettings};
use crate::error::{Result, ScanError};
use crate::overlay::{map_overlay_to_frame, Indicator, ViewportLayout};
use crate::shared::{Notice, Notifier, SessionEvent, SessionState};
use crate::vision::{
    preprocess_frame, Aggregator, DispatchOutcome, EncodedImage, EngineFactory, RoiFilter,
    WorkerPool,
};

/// Notice shown while a worker-count change restarts the scan
pub const UPDATING_WORKERS_NOTICE: &str = "Updating workers...";

/// Construction options that are not scan tunables
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Recognition language handed to every engine
    pub language: String,
    /// Upper bound on the worker count
    pub worker_cap: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            worker_cap: detect_worker_cap(),
        }
    }
}

/// A single change to the scan configuration
#[derive(Debug, Clone, PartialEq)]
pub enum Reconfigure {
    Resolution(Option<Resolution>),
    Camera(Option<String>),
    WorkerCount(usize),
    Filter(RoiFilter),
    FrameSkip(u32),
    FrequencyHz(f64),
    /// Clamped into 1-100 rather than rejected
    ConfidenceThreshold(i64),
}

impl Reconfigure {
    /// Whether applying this while scanning needs a full stop and start
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            Reconfigure::Resolution(_) | Reconfigure::Camera(_) | Reconfigure::WorkerCount(_)
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Reconfigure::Resolution(_) => "resolution",
            Reconfigure::Camera(_) => "camera",
            Reconfigure::WorkerCount(_) => "worker count",
            Reconfigure::Filter(_) => "filter",
            Reconfigure::FrameSkip(_) => "frame skip",
            Reconfigure::FrequencyHz(_) => "frequency",
            Reconfigure::ConfidenceThreshold(_) => "confidence threshold",
        }
    }
}

struct ActiveStream {
    handle: Arc<dyn StreamHandle>,
    request: CaptureRequest,
}

/// Resources only touched while holding the transition lock
#[derive(Default)]
struct Resources {
    stream: Option<ActiveStream>,
    scheduler: Option<SchedulerHandle>,
    /// Bumped for every scheduler spawned; faults carry the run they came from
    run: u64,
}

/// The scanning session
pub struct Session {
    transition: Mutex<Resources>,
    state_tx: watch::Sender<SessionState>,
    settings: Arc<RwLock<ScanSettings>>,
    layout: Arc<RwLock<ViewportLayout>>,
    capture: Arc<dyn CaptureSource>,
    refresh: Arc<dyn RefreshSource>,
    pool: Arc<WorkerPool>,
    aggregator: Arc<Aggregator>,
    preview: Arc<RwLock<Option<EncodedImage>>>,
    notifier: Notifier,
    events: Receiver<SessionEvent>,
    worker_cap: usize,
    me: Weak<Session>,
}

impl Session {
    /// Create an idle session. Fails if `settings` do not validate against the worker cap.
    pub fn new(
        settings: ScanSettings,
        layout: ViewportLayout,
        capture: Arc<dyn CaptureSource>,
        engines: Arc<dyn EngineFactory>,
        refresh: Arc<dyn RefreshSource>,
        options: SessionOptions,
    ) -> Result<Arc<Self>> {
        let worker_cap = options.worker_cap.max(1);
        let settings = settings.validated(worker_cap)?;
        let (notifier, events) = Notifier::channel();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        info!(
            worker_cap,
            worker_count = settings.worker_count,
            "Session created"
        );

        Ok(Arc::new_cyclic(|me| Self {
            transition: Mutex::new(Resources::default()),
            state_tx,
            settings: Arc::new(RwLock::new(settings)),
            layout: Arc::new(RwLock::new(layout)),
            capture,
            refresh,
            pool: Arc::new(WorkerPool::new(engines, options.language)),
            aggregator: Arc::new(Aggregator::new(notifier.clone())),
            preview: Arc::new(RwLock::new(None)),
            notifier,
            events,
            worker_cap,
            me: me.clone(),
        }))
    }

    /// Acquire capture and workers and begin scanning.
    ///
    /// From Paused this resumes with the retained stream and pool when they
    /// still match the configuration; otherwise everything is reacquired.
    pub async fn start(&self) -> Result<()> {
        let mut resources = self.transition.lock().await;
        self.start_locked(&mut resources).await
    }

    /// Halt scanning and release capture and workers. No-op when already idle or stopped.
    pub async fn stop(&self) {
        let mut resources = self.transition.lock().await;
        self.stop_locked(&mut resources).await;
    }

    /// Halt the scheduler but keep capture and workers
    pub async fn pause(&self) -> Result<()> {
        let mut resources = self.transition.lock().await;
        self.pause_locked(&mut resources).await
    }

    /// Pause, then run one recognition pass on the current frame.
    ///
    /// The session is left Paused whatever the pass produced.
    pub async fn capture_once(&self) -> Result<DispatchOutcome> {
        let mut resources = self.transition.lock().await;
        self.pause_locked(&mut resources).await?;

        let stream = resources
            .stream
            .as_ref()
            .map(|active| active.handle.clone())
            .ok_or_else(|| ScanError::capture("no active stream"))?;

        let settings = self.settings.read().clone();
        let layout = *self.layout.read();

        let task = match stream.grab_frame().and_then(|frame| {
            let (width, height) = frame.dimensions();
            let roi = map_overlay_to_frame(&layout, width, height)?;
            preprocess_frame(&frame, roi, settings.filter)
        }) {
            Ok(task) => task,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };
        *self.preview.write() = Some(task.image.clone());

        let Some(guard) = self.aggregator.try_begin() else {
            return Ok(self.aggregator.drop_request());
        };
        let workers = self.pool.workers();
        drop(resources);

        info!("Capturing single frame");
        Ok(self
            .aggregator
            .dispatch(
                guard,
                workers,
                task.image,
                settings.confidence_threshold,
                self.state_tx.subscribe(),
            )
            .await)
    }

    /// Apply one configuration change.
    ///
    /// Camera, resolution and worker-count changes restart a running scan;
    /// everything else takes effect on the next cycle. Invalid values are
    /// rejected and the previous value kept.
    pub async fn reconfigure(&self, change: Reconfigure) -> Result<()> {
        let mut resources = self.transition.lock().await;

        if let Err(e) = self.apply(&change) {
            self.report(&e);
            return Err(e);
        }

        match change {
            Reconfigure::FrameSkip(_) | Reconfigure::FrequencyHz(_) => {
                info!(
                    scans_per_second = self.effective_frequency_hz(),
                    "Effective scan rate updated"
                );
            }
            _ => debug!("Updated {}", change.name()),
        }

        if change.requires_restart() && self.state() == SessionState::Scanning {
            if matches!(change, Reconfigure::WorkerCount(_)) {
                self.notifier.notice(Notice::info(UPDATING_WORKERS_NOTICE));
            }
            info!("Restarting scan to apply new {}", change.name());
            self.stop_locked(&mut resources).await;
            self.start_locked(&mut resources).await?;
        }

        Ok(())
    }

    /// Replace the on-screen overlay and video rectangles
    pub fn set_layout(&self, layout: ViewportLayout) {
        *self.layout.write() = layout;
    }

    pub fn layout(&self) -> ViewportLayout {
        *self.layout.read()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Current scan settings
    pub fn settings(&self) -> ScanSettings {
        self.settings.read().clone()
    }

    pub fn worker_cap(&self) -> usize {
        self.worker_cap
    }

    /// Live recognition workers
    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Scans per second achievable with the current settings and refresh rate
    pub fn effective_frequency_hz(&self) -> f64 {
        self.settings
            .read()
            .effective_frequency_hz(self.refresh.rate_hz())
    }

    /// Accepted text entries, oldest first
    pub fn output(&self) -> Vec<String> {
        self.aggregator.output_entries()
    }

    /// Accepted text as newline-terminated lines
    pub fn export_output(&self) -> String {
        self.aggregator.export_output()
    }

    pub fn indicator(&self) -> Indicator {
        self.aggregator.indicator()
    }

    /// Last preprocessed ROI image
    pub fn preview(&self) -> Option<EncodedImage> {
        self.preview.read().clone()
    }

    /// Receiver for state changes, notices and dispatch results
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events.clone()
    }

    /// Watch the lifecycle state
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        self.capture.list_devices().await
    }

    async fn start_locked(&self, resources: &mut Resources) -> Result<()> {
        let state = self.state();
        if state == SessionState::Scanning {
            debug!("Start requested while already scanning");
            return Ok(());
        }
        if !state.can_start() {
            return Err(ScanError::InvalidTransition {
                operation: "start",
                state,
            });
        }

        let settings = self.settings.read().clone();
        let request = CaptureRequest::from(&settings);

        if state == SessionState::Paused && self.can_resume(resources, &request, settings.worker_count) {
            info!("Resuming scan");
            self.set_state(SessionState::Scanning);
            self.spawn_scheduler(resources);
            return Ok(());
        }

        self.release_resources(resources).await;
        self.set_state(SessionState::Starting);

        match self.acquire_resources(resources, request, settings.worker_count).await {
            Ok(()) => {
                info!(
                    worker_count = settings.worker_count,
                    scans_per_second = self.effective_frequency_hz(),
                    "Scanning started"
                );
                self.set_state(SessionState::Scanning);
                self.spawn_scheduler(resources);
                Ok(())
            }
            Err(e) => {
                self.release_resources(resources).await;
                self.set_state(SessionState::Stopped);
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn stop_locked(&self, resources: &mut Resources) {
        let state = self.state();
        if matches!(state, SessionState::Idle | SessionState::Stopped) {
            debug!("Stop requested while {}", state);
            return;
        }

        // Published first so the scheduler and late results see it
        self.set_state(SessionState::Stopped);
        self.release_resources(resources).await;
        self.aggregator.reset_indicator();
        *self.preview.write() = None;
        info!("Scanning stopped");
    }

    async fn pause_locked(&self, resources: &mut Resources) -> Result<()> {
        let state = self.state();
        if state != SessionState::Scanning {
            return Err(ScanError::InvalidTransition {
                operation: "pause",
                state,
            });
        }

        self.set_state(SessionState::Paused);
        if let Some(scheduler) = resources.scheduler.take() {
            scheduler.halt().await;
        }
        self.aggregator.reset_indicator();
        info!("Scanning paused");
        Ok(())
    }

    fn can_resume(&self, resources: &Resources, request: &CaptureRequest, worker_count: usize) -> bool {
        let stream_matches = resources
            .stream
            .as_ref()
            .map(|active| &active.request == request)
            .unwrap_or(false);
        stream_matches && self.pool.size() == worker_count
    }

    async fn acquire_resources(
        &self,
        resources: &mut Resources,
        request: CaptureRequest,
        worker_count: usize,
    ) -> Result<()> {
        info!(
            resolution = ?request.resolution,
            camera = ?request.device_id,
            "Initializing camera"
        );
        let handle = self.capture.acquire(&request).await?;
        resources.stream = Some(ActiveStream { handle, request });

        self.pool.initialize(worker_count).await
    }

    async fn release_resources(&self, resources: &mut Resources) {
        if let Some(scheduler) = resources.scheduler.take() {
            scheduler.halt().await;
        }
        if let Some(active) = resources.stream.take() {
            self.capture.release(active.handle).await;
        }
        self.pool.terminate().await;
    }

    fn spawn_scheduler(&self, resources: &mut Resources) {
        let Some(active) = resources.stream.as_ref() else {
            warn!("No active stream, scheduler not started");
            return;
        };

        let ctx = ScanContext {
            stream: active.handle.clone(),
            settings: self.settings.clone(),
            layout: self.layout.clone(),
            pool: self.pool.clone(),
            aggregator: self.aggregator.clone(),
            preview: self.preview.clone(),
            state: self.state_tx.subscribe(),
        };

        resources.run += 1;
        let run = resources.run;
        let me = self.me.clone();
        let on_fault: scheduler::FaultHandler = Box::new(move |err| {
            if let Some(session) = me.upgrade() {
                // The scheduler task cannot await its own shutdown
                tokio::spawn(async move { session.handle_fault(run, err).await });
            }
        });

        resources.scheduler = Some(scheduler::spawn(ctx, self.refresh.clone(), on_fault));
    }

    async fn handle_fault(&self, run: u64, err: ScanError) {
        let mut resources = self.transition.lock().await;
        if resources.run != run || self.state() != SessionState::Scanning {
            debug!(
                run,
                current = resources.run,
                "Ignoring fault from a finished scheduler run: {}",
                err
            );
            return;
        }

        self.report(&err);
        if err.is_fatal_to_session() {
            self.stop_locked(&mut resources).await;
        }
    }

    fn apply(&self, change: &Reconfigure) -> Result<()> {
        let mut settings = self.settings.write();
        match change {
            Reconfigure::Resolution(resolution) => settings.resolution = *resolution,
            Reconfigure::Camera(camera) => settings.camera_id = camera.clone(),
            Reconfigure::WorkerCount(count) => settings.set_worker_count(*count, self.worker_cap)?,
            Reconfigure::Filter(filter) => settings.filter = *filter,
            Reconfigure::FrameSkip(frame_skip) => settings.set_frame_skip(*frame_skip)?,
            Reconfigure::FrequencyHz(frequency) => settings.set_frequency_hz(*frequency)?,
            Reconfigure::ConfidenceThreshold(threshold) => {
                settings.set_confidence_threshold(*threshold);
            }
        }
        Ok(())
    }

    fn set_state(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        if from != to {
            debug!(%from, %to, "Session state changed");
            self.notifier.emit(SessionEvent::StateChanged { from, to });
        }
    }

    /// Log an error and show it to the user
    fn report(&self, err: &ScanError) {
        error!("{}", err);
        self.notifier.notice(Notice::error(err.to_string()));
    }
}
