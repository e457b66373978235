//! Test doubles for the capture and recognition collaborators

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureRequest, CaptureSource, CapturedFrame, DeviceInfo, StreamHandle};
use crate::error::{Result, ScanError};
use crate::vision::{EncodedImage, EngineFactory, RecognitionEngine, RecognitionResult};

/// Engine that always answers with the same result
pub struct ScriptedEngine {
    result: Mutex<RecognitionResult>,
    fail: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    terminated: AtomicBool,
}

impl ScriptedEngine {
    pub fn new(result: RecognitionResult) -> Self {
        Self {
            result: Mutex::new(result),
            fail: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn recognize(&self, _image: &EncodedImage) -> Result<RecognitionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_terminated() {
            return Err(ScanError::recognition("terminated"));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ScanError::recognition("scripted failure"));
        }
        Ok(self.result.lock().clone())
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out `ScriptedEngine`s and remembering each one
pub struct ScriptedEngineFactory {
    result: RecognitionResult,
    delay: Option<Duration>,
    fail_at: Mutex<Option<usize>>,
    fail_recognition: AtomicBool,
    attempts: AtomicUsize,
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
}

impl ScriptedEngineFactory {
    pub fn new(result: RecognitionResult) -> Self {
        Self {
            result,
            delay: None,
            fail_at: Mutex::new(None),
            fail_recognition: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            engines: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make the creation attempt with this zero-based index fail
    pub fn fail_creation_at(&self, index: usize) {
        *self.fail_at.lock() = Some(index);
    }

    /// Make engines created from now on fail every recognition
    pub fn fail_recognition(&self, fail: bool) {
        self.fail_recognition.store(fail, Ordering::SeqCst);
    }

    /// Engines successfully created so far, oldest first
    pub fn engines(&self) -> Vec<Arc<ScriptedEngine>> {
        self.engines.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.engines.lock().len()
    }

    /// Engines created and not yet terminated
    pub fn live_count(&self) -> usize {
        self.engines
            .lock()
            .iter()
            .filter(|engine| !engine.is_terminated())
            .count()
    }

    /// Recognitions performed across every engine
    pub fn total_calls(&self) -> usize {
        self.engines.lock().iter().map(|engine| engine.calls()).sum()
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn create(&self, _language: &str) -> Result<Arc<dyn RecognitionEngine>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if *self.fail_at.lock() == Some(attempt) {
            return Err(ScanError::pool_init(format!("scripted failure on worker {}", attempt)));
        }

        let mut engine = ScriptedEngine::new(self.result.clone());
        if let Some(delay) = self.delay {
            engine = engine.with_delay(delay);
        }
        engine
            .fail
            .store(self.fail_recognition.load(Ordering::SeqCst), Ordering::SeqCst);

        let engine = Arc::new(engine);
        self.engines.lock().push(engine.clone());
        Ok(engine as Arc<dyn RecognitionEngine>)
    }
}

/// In-memory camera showing one still frame
pub struct StaticCapture {
    frame: RgbaImage,
    deny: AtomicBool,
    acquired: AtomicUsize,
    released: AtomicUsize,
    streams: Mutex<Vec<Arc<StaticStream>>>,
}

impl StaticCapture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbaImage::from_pixel(width, height, Rgba([240, 240, 240, 255])),
            deny: AtomicBool::new(false),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            streams: Mutex::new(Vec::new()),
        }
    }

    /// Refuse every later `acquire`, as a denied camera permission would
    pub fn deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Most recently opened stream
    pub fn last_stream(&self) -> Option<Arc<StaticStream>> {
        self.streams.lock().last().cloned()
    }
}

#[async_trait]
impl CaptureSource for StaticCapture {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            id: "static".to_string(),
            label: "Static test camera".to_string(),
        }])
    }

    async fn acquire(&self, request: &CaptureRequest) -> Result<Arc<dyn StreamHandle>> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(ScanError::capture("permission denied"));
        }

        let frame = match request.resolution {
            Some(r) => image::imageops::resize(
                &self.frame,
                r.width,
                r.height,
                image::imageops::FilterType::Nearest,
            ),
            None => self.frame.clone(),
        };

        let count = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let stream = Arc::new(StaticStream {
            id: format!("static-{}", count),
            frame,
            ready: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        });
        self.streams.lock().push(stream.clone());
        Ok(stream as Arc<dyn StreamHandle>)
    }

    async fn release(&self, stream: Arc<dyn StreamHandle>) {
        stream.stop();
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Stream returned by `StaticCapture`
pub struct StaticStream {
    id: String,
    frame: RgbaImage,
    ready: AtomicBool,
    stopped: AtomicBool,
}

impl StaticStream {
    /// Simulate a stream that has not buffered enough data yet
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl StreamHandle for StaticStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn is_frame_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst) && !self.is_stopped()
    }

    fn grab_frame(&self) -> Result<CapturedFrame> {
        if self.is_stopped() {
            return Err(ScanError::capture("stream stopped"));
        }
        Ok(CapturedFrame::new(self.frame.clone()))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
