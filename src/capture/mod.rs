//! Capture Layer
//!
//! Video sources the scanner samples frames from. A source hands out stream
//! handles; the session owns the handle for as long as it is scanning or paused.

pub mod frame;
pub mod image_sequence;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ScanSettings;
use crate::error::{Result, ScanError};

pub use frame::CapturedFrame;
pub use image_sequence::ImageSequenceSource;

/// Capture resolutions offered to the user
pub const COMMON_RESOLUTIONS: [Resolution; 12] = [
    Resolution::new(320, 240),
    Resolution::new(640, 480),
    Resolution::new(800, 600),
    Resolution::new(1024, 768),
    Resolution::new(1280, 720),
    Resolution::new(1280, 800),
    Resolution::new(1366, 768),
    Resolution::new(1440, 900),
    Resolution::new(1600, 900),
    Resolution::new(1920, 1080),
    Resolution::new(2560, 1440),
    Resolution::new(3840, 2160),
];

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ScanError;

    /// Parse `WIDTHxHEIGHT`, e.g. `1280x720`
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| ScanError::config(format!("resolution '{}' is not WIDTHxHEIGHT", s)))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ScanError::config(format!("invalid resolution width '{}'", w)))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ScanError::config(format!("invalid resolution height '{}'", h)))?;
        if width == 0 || height == 0 {
            return Err(ScanError::config(format!("resolution '{}' has a zero dimension", s)));
        }
        Ok(Self { width, height })
    }
}

/// What the session asks a capture source for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Exact resolution, or the device default
    pub resolution: Option<Resolution>,
    /// Device to open, or the default device
    pub device_id: Option<String>,
}

impl From<&ScanSettings> for CaptureRequest {
    fn from(settings: &ScanSettings) -> Self {
        Self {
            resolution: settings.resolution,
            device_id: settings.camera_id.clone(),
        }
    }
}

/// A selectable capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Opaque identifier passed back in `CaptureRequest::device_id`
    pub id: String,
    /// Human readable label
    pub label: String,
}

/// An open video stream
pub trait StreamHandle: Send + Sync {
    /// Unique identifier of this stream
    fn id(&self) -> &str;

    /// Native pixel dimensions of the frames this stream produces
    fn frame_dimensions(&self) -> (u32, u32);

    /// Whether enough data is buffered to grab a frame
    fn is_frame_ready(&self) -> bool;

    /// Grab the current frame
    fn grab_frame(&self) -> Result<CapturedFrame>;

    /// Stop producing frames; later grabs fail
    fn stop(&self);
}

/// A provider of video streams
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Enumerate the devices this source can open
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Open a stream; fails with `ScanError::Capture` if the device is unavailable or denied
    async fn acquire(&self, request: &CaptureRequest) -> Result<Arc<dyn StreamHandle>>;

    /// Stop a stream previously returned by `acquire`
    async fn release(&self, stream: Arc<dyn StreamHandle>);
}
