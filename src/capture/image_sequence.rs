//! Capture source backed by directories of still images
//!
//! The root directory (or each of its sub-directories) acts as a camera. Frames
//! advance at a nominal rate and loop forever; a requested resolution resizes
//! every frame to exactly that size.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CaptureRequest, CaptureSource, CapturedFrame, DeviceInfo, Resolution, StreamHandle};
use crate::error::{Result, ScanError};

/// Default playback rate of a sequence
const DEFAULT_FRAME_RATE: f64 = 30.0;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Capture source reading frames from image files
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    root: PathBuf,
    frame_rate: f64,
}

impl ImageSequenceSource {
    /// Create a source rooted at a directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    /// Set the playback rate in frames per second
    pub fn with_frame_rate(mut self, frame_rate: f64) -> Self {
        if frame_rate.is_finite() && frame_rate > 0.0 {
            self.frame_rate = frame_rate;
        } else {
            warn!("Ignoring invalid frame rate {}", frame_rate);
        }
        self
    }

    fn device_dir(&self, device_id: Option<&str>) -> Result<PathBuf> {
        let dir = match device_id {
            Some(id) if !id.is_empty() => {
                // Only plain names, so the device stays under the root
                if !Path::new(id)
                    .components()
                    .all(|c| matches!(c, std::path::Component::Normal(_)))
                {
                    return Err(ScanError::capture(format!("invalid device id '{}'", id)));
                }
                self.root.join(id)
            }
            _ => self.root.clone(),
        };
        if !dir.is_dir() {
            return Err(ScanError::capture(format!(
                "device {:?} not found",
                device_id.unwrap_or_default()
            )));
        }
        Ok(dir)
    }
}

#[async_trait]
impl CaptureSource for ImageSequenceSource {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || list_devices_blocking(&root))
            .await
            .map_err(|e| ScanError::capture(format!("device enumeration failed: {}", e)))?
    }

    async fn acquire(&self, request: &CaptureRequest) -> Result<Arc<dyn StreamHandle>> {
        let dir = self.device_dir(request.device_id.as_deref())?;
        let resolution = request.resolution;

        let frames = tokio::task::spawn_blocking(move || load_frames(&dir, resolution))
            .await
            .map_err(|e| ScanError::capture(format!("frame loading failed: {}", e)))??;

        let stream = ImageSequenceStream::new(frames, self.frame_rate);
        let (width, height) = stream.frame_dimensions();
        info!(
            "Opened image sequence stream {} ({} frames, {}x{})",
            stream.id,
            stream.frames.len(),
            width,
            height
        );
        Ok(Arc::new(stream))
    }

    async fn release(&self, stream: Arc<dyn StreamHandle>) {
        stream.stop();
        info!("Released stream {}", stream.id());
    }
}

/// An open, looping image sequence
pub struct ImageSequenceStream {
    id: String,
    frames: Vec<RgbaImage>,
    started: Instant,
    frame_interval: Duration,
    stopped: AtomicBool,
}

impl ImageSequenceStream {
    fn new(frames: Vec<RgbaImage>, frame_rate: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            frames,
            started: Instant::now(),
            frame_interval: Duration::from_secs_f64(1.0 / frame_rate),
            stopped: AtomicBool::new(false),
        }
    }

    fn current_index(&self) -> usize {
        let elapsed = self.started.elapsed().as_secs_f64();
        let step = (elapsed / self.frame_interval.as_secs_f64()) as usize;
        step % self.frames.len()
    }
}

impl StreamHandle for ImageSequenceStream {
    fn id(&self) -> &str {
        &self.id
    }

    fn frame_dimensions(&self) -> (u32, u32) {
        self.frames[0].dimensions()
    }

    fn is_frame_ready(&self) -> bool {
        !self.stopped.load(Ordering::Acquire)
    }

    fn grab_frame(&self) -> Result<CapturedFrame> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ScanError::capture(format!("stream {} is stopped", self.id)));
        }
        let index = self.current_index();
        Ok(CapturedFrame::new(self.frames[index].clone()))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn image_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

fn list_devices_blocking(root: &Path) -> Result<Vec<DeviceInfo>> {
    let mut devices = Vec::new();

    if !image_files(root)?.is_empty() {
        devices.push(DeviceInfo {
            id: String::new(),
            label: "Default".to_string(),
        });
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    subdirs.sort();

    for dir in subdirs {
        if image_files(&dir)?.is_empty() {
            continue;
        }
        if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
            devices.push(DeviceInfo {
                id: name.to_string(),
                label: name.to_string(),
            });
        }
    }

    debug!("Found {} capture devices under {:?}", devices.len(), root);
    Ok(devices)
}

fn load_frames(dir: &Path, resolution: Option<Resolution>) -> Result<Vec<RgbaImage>> {
    let files = image_files(dir)?;
    if files.is_empty() {
        return Err(ScanError::capture(format!("no frames found in {:?}", dir)));
    }

    let mut frames: Vec<RgbaImage> = Vec::with_capacity(files.len());
    for path in &files {
        let decoded = image::open(path)
            .map_err(|e| ScanError::capture(format!("failed to read frame {:?}: {}", path, e)))?
            .to_rgba8();

        // Every frame of a stream has the same size: the requested one, else the first frame's
        let target = resolution
            .map(|r| (r.width, r.height))
            .or_else(|| frames.first().map(|f| f.dimensions()));

        let frame = match target {
            Some((w, h)) if decoded.dimensions() != (w, h) => {
                image::imageops::resize(&decoded, w, h, FilterType::Triangle)
            }
            _ => decoded,
        };
        frames.push(frame);
    }

    Ok(frames)
}
