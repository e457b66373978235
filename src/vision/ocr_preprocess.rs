//! Frame preprocessing for OCR
//!
//! Turns a captured frame into the buffer handed to every recognition worker:
//! filter the full frame, crop to the ROI, upscale for small text, encode as PNG.
//! Every step works on copies; the source frame is never modified.

use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::capture::CapturedFrame;
use crate::error::{Result, ScanError};
use crate::overlay::RoiRect;

/// Upscale factor applied to the cropped ROI
pub const UPSCALE_FACTOR: f64 = 1.5;

const CONTRAST_FACTOR: f32 = 1.3;
const BRIGHTNESS_FACTOR: f32 = 1.2;

/// Visual filter applied to the frame before cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiFilter {
    #[default]
    None,
    Grayscale,
    Contrast,
    Brightness,
}

impl RoiFilter {
    pub const ALL: [RoiFilter; 4] = [
        RoiFilter::None,
        RoiFilter::Grayscale,
        RoiFilter::Contrast,
        RoiFilter::Brightness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RoiFilter::None => "none",
            RoiFilter::Grayscale => "grayscale",
            RoiFilter::Contrast => "contrast",
            RoiFilter::Brightness => "brightness",
        }
    }

    /// Apply the filter to RGBA pixel data in place
    pub fn apply(&self, data: &mut [u8]) {
        match self {
            RoiFilter::None => {}
            RoiFilter::Grayscale => apply_grayscale(data),
            RoiFilter::Contrast => apply_contrast(data, CONTRAST_FACTOR),
            RoiFilter::Brightness => apply_brightness(data, BRIGHTNESS_FACTOR),
        }
    }
}

impl fmt::Display for RoiFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoiFilter {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        RoiFilter::ALL
            .into_iter()
            .find(|f| f.name() == wanted)
            .ok_or_else(|| {
                ScanError::config(format!(
                    "unknown filter '{}', expected one of none, grayscale, contrast, brightness",
                    s
                ))
            })
    }
}

/// PNG-encoded image ready for recognition, cheap to share between workers
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
}

/// Everything one scheduler cycle produces for dispatch
#[derive(Debug, Clone)]
pub struct FrameTask {
    /// Native size of the frame the ROI was cut from
    pub frame_width: u32,
    pub frame_height: u32,
    /// ROI in frame pixels
    pub roi: RoiRect,
    /// Filtered, cropped, upscaled and encoded ROI
    pub image: EncodedImage,
}

/// Filter, crop, upscale and encode the ROI of a frame.
///
/// `roi` must already lie inside the frame.
pub fn preprocess_frame(frame: &CapturedFrame, roi: RoiRect, filter: RoiFilter) -> Result<FrameTask> {
    let (frame_width, frame_height) = frame.dimensions();

    let mut filtered = frame.image.clone();
    filter.apply(&mut filtered);

    let bounds = roi.pixel_bounds(frame_width, frame_height);
    let cropped = imageops::crop_imm(&filtered, bounds.x, bounds.y, bounds.width, bounds.height).to_image();

    let upscaled = upscale(&cropped, UPSCALE_FACTOR);
    let image = encode_png(&upscaled)?;

    debug!(
        "Preprocessed ROI {}x{} at ({}, {}) with filter {} -> {}x{} ({} bytes)",
        bounds.width,
        bounds.height,
        bounds.x,
        bounds.y,
        filter,
        image.width,
        image.height,
        image.bytes.len()
    );

    Ok(FrameTask {
        frame_width,
        frame_height,
        roi,
        image,
    })
}

/// Resize by a fractional factor using Catmull-Rom interpolation
pub fn upscale(image: &RgbaImage, factor: f64) -> RgbaImage {
    let new_width = ((image.width() as f64 * factor).floor() as u32).max(1);
    let new_height = ((image.height() as f64 * factor).floor() as u32).max(1);
    imageops::resize(image, new_width, new_height, FilterType::CatmullRom)
}

/// Encode RGBA pixels as PNG
pub fn encode_png(image: &RgbaImage) -> Result<EncodedImage> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgba8,
    )?;

    Ok(EncodedImage {
        bytes: bytes.into(),
        width: image.width(),
        height: image.height(),
    })
}

/// Apply contrast enhancement to RGBA data
/// Factor > 1.0 increases contrast, < 1.0 decreases
fn apply_contrast(data: &mut [u8], factor: f32) {
    for chunk in data.chunks_exact_mut(4) {
        for channel in chunk.iter_mut().take(3) {
            // Contrast around midpoint (128)
            let adjusted = ((*channel as f32 - 128.0) * factor + 128.0).clamp(0.0, 255.0);
            *channel = adjusted as u8;
        }
        // Alpha channel unchanged
    }
}

/// Scale RGB channels by a factor, saturating at white
fn apply_brightness(data: &mut [u8], factor: f32) {
    for chunk in data.chunks_exact_mut(4) {
        for channel in chunk.iter_mut().take(3) {
            *channel = (*channel as f32 * factor).clamp(0.0, 255.0) as u8;
        }
    }
}

/// Convert RGBA to grayscale (keeping RGBA format)
fn apply_grayscale(data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(4) {
        // Standard luminance weights
        let gray = (0.299 * chunk[0] as f32 + 0.587 * chunk[1] as f32 + 0.114 * chunk[2] as f32) as u8;
        chunk[0] = gray;
        chunk[1] = gray;
        chunk[2] = gray;
    }
}
