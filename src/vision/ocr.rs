//! OCR (Optical Character Recognition) engine abstraction
//!
//! Recognition engines are external collaborators. The pool only sees these
//! traits, so any backend that can turn an encoded image into text plus a
//! confidence score can be plugged in.

use async_trait::async_trait;
use std::sync::Arc;

use super::ocr_preprocess::EncodedImage;
use crate::error::Result;

/// Output of one engine on one image
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionResult {
    /// Recognized text, possibly multi-line
    pub text: String,
    /// Confidence score (0.0 - 100.0)
    pub confidence: f32,
}

impl RecognitionResult {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// A single, initialized recognition engine instance
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    /// Recognize text in an encoded image
    async fn recognize(&self, image: &EncodedImage) -> Result<RecognitionResult>;

    /// Release the engine; recognitions after this fail
    async fn terminate(&self);
}

/// Creates engine instances for the worker pool
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Create an engine for `language`, returning only once it has finished loading
    async fn create(&self, language: &str) -> Result<Arc<dyn RecognitionEngine>>;
}
