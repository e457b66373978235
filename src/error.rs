//! Error types for the scanning pipeline

use thiserror::Error;

use crate::shared::SessionState;

/// Result type alias for the scanning pipeline
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors that can occur while acquiring, scanning or recognizing
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Capture unavailable: {0}")]
    Capture(String),

    #[error("Failed to initialize recognition workers: {0}")]
    PoolInit(String),

    #[error(
        "ROI ({x:.2}, {y:.2}, {width:.2}x{height:.2}) is out of video frame bounds {frame_width}x{frame_height}"
    )]
    RoiBounds {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        frame_width: u32,
        frame_height: u32,
    },

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Cannot {operation} while session is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("OCR workers are not initialized")]
    PoolNotReady,

    #[error("Image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::Capture(msg.into())
    }

    pub fn pool_init<S: Into<String>>(msg: S) -> Self {
        Self::PoolInit(msg.into())
    }

    pub fn recognition<S: Into<String>>(msg: S) -> Self {
        Self::Recognition(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Whether this error ends the whole session rather than one cycle
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::RoiBounds { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_bounds_message() {
        let err = ScanError::RoiBounds {
            x: -1.5,
            y: 2.0,
            width: 100.0,
            height: 50.25,
            frame_width: 640,
            frame_height: 480,
        };
        assert_eq!(
            err.to_string(),
            "ROI (-1.50, 2.00, 100.00x50.25) is out of video frame bounds 640x480"
        );
        assert!(err.is_fatal_to_session());
    }

    #[test]
    fn test_recognition_error_is_not_fatal() {
        assert!(!ScanError::recognition("engine crashed").is_fatal_to_session());
        assert!(!ScanError::capture("denied").is_fatal_to_session());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = ScanError::InvalidTransition {
            operation: "pause",
            state: SessionState::Stopped,
        };
        assert_eq!(err.to_string(), "Cannot pause while session is stopped");
    }
}
