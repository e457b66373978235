//! Frames grabbed from a video stream

use image::RgbaImage;
use std::time::{Duration, Instant};

/// One still taken from a stream at its native resolution
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: RgbaImage,
    /// When the frame was grabbed
    pub grabbed_at: Instant,
}

impl CapturedFrame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            grabbed_at: Instant::now(),
        }
    }

    /// (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Time elapsed since the grab
    pub fn age(&self) -> Duration {
        self.grabbed_at.elapsed()
    }
}
