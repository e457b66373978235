//! Overlay Layer
//!
//! The ROI overlay drawn over the live video: where it sits on the display,
//! how that maps into source frame pixels, and the status indicator colouring
//! its border.

pub mod geometry;
pub mod indicator;

pub use geometry::{map_overlay_to_frame, DisplayRect, PixelBounds, RoiRect, ViewportLayout};
pub use indicator::Indicator;
