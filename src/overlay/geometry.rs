//! ROI geometry
//!
//! Converts the overlay rectangle, given in display coordinates, into a
//! rectangle in the native pixel space of the captured frame. The video may be
//! drawn scaled, so horizontal and vertical factors are computed separately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ScanError};

/// Slack for rounding error when an ROI touches the frame edge
const EDGE_TOLERANCE: f64 = 1e-6;

/// Rectangle in display coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl DisplayRect {
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Whether the rectangle covers a finite, positive area
    pub fn has_area(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl fmt::Display for DisplayRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.left, self.top, self.width, self.height)
    }
}

impl FromStr for DisplayRect {
    type Err = ScanError;

    /// Parse `LEFT,TOP,WIDTH,HEIGHT`
    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<f64> = s
            .split(',')
            .map(|part| part.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| ScanError::config(format!("rectangle '{}' is not LEFT,TOP,WIDTH,HEIGHT", s)))?;

        match values.as_slice() {
            [left, top, width, height] => Ok(Self::new(*left, *top, *width, *height)),
            _ => Err(ScanError::config(format!(
                "rectangle '{}' needs exactly four values",
                s
            ))),
        }
    }
}

/// Where the overlay and the video are drawn on the display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportLayout {
    pub overlay: DisplayRect,
    pub video: DisplayRect,
}

/// ROI in source frame pixels, still fractional
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Integer crop bounds derived from an `RoiRect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RoiRect {
    /// Whether the rectangle has area and lies within `[0, frame_width] x [0, frame_height]`
    pub fn fits_within(&self, frame_width: u32, frame_height: u32) -> bool {
        // Written positively so NaN fails every comparison
        self.x >= -EDGE_TOLERANCE
            && self.y >= -EDGE_TOLERANCE
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= frame_width as f64 + EDGE_TOLERANCE
            && self.y + self.height <= frame_height as f64 + EDGE_TOLERANCE
    }

    /// Smallest whole-pixel rectangle covering this ROI, clipped to the frame
    pub fn pixel_bounds(&self, frame_width: u32, frame_height: u32) -> PixelBounds {
        let x0 = (self.x.floor().max(0.0) as u32).min(frame_width.saturating_sub(1));
        let y0 = (self.y.floor().max(0.0) as u32).min(frame_height.saturating_sub(1));
        let x1 = ((self.x + self.width).ceil() as u32).min(frame_width);
        let y1 = ((self.y + self.height).ceil() as u32).min(frame_height);

        PixelBounds {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0).max(1),
            height: y1.saturating_sub(y0).max(1),
        }
    }
}

/// Map the overlay rectangle into frame pixel space.
///
/// Fails with `ScanError::RoiBounds` when the result does not lie fully inside
/// the frame. The rectangle is never clamped.
pub fn map_overlay_to_frame(
    layout: &ViewportLayout,
    frame_width: u32,
    frame_height: u32,
) -> Result<RoiRect> {
    let video = layout.video;
    let overlay = layout.overlay;

    let roi = if video.has_area() {
        let scale_x = frame_width as f64 / video.width;
        let scale_y = frame_height as f64 / video.height;
        RoiRect {
            x: (overlay.left - video.left) * scale_x,
            y: (overlay.top - video.top) * scale_y,
            width: overlay.width * scale_x,
            height: overlay.height * scale_y,
        }
    } else {
        // Nothing drawn yet: no meaningful mapping exists
        RoiRect {
            x: f64::NAN,
            y: f64::NAN,
            width: f64::NAN,
            height: f64::NAN,
        }
    };

    if !roi.fits_within(frame_width, frame_height) {
        return Err(ScanError::RoiBounds {
            x: roi.x,
            y: roi.y,
            width: roi.width,
            height: roi.height,
            frame_width,
            frame_height,
        });
    }

    Ok(roi)
}
