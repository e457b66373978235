//! Vision/OCR Layer
//!
//! Prepares ROI images for recognition, runs them through a pool of
//! recognition engines and merges the results.
//! Supported engine backends:
//! - tesseract command-line program

pub mod aggregate;
pub mod ocr;
pub mod ocr_preprocess;
pub mod pool;
pub mod tesseract;

pub use aggregate::{AggregateDecision, Aggregator, DispatchOutcome, FlightGuard, OutputStream};
pub use ocr::{EngineFactory, RecognitionEngine, RecognitionResult};
pub use ocr_preprocess::{preprocess_frame, EncodedImage, FrameTask, RoiFilter};
pub use pool::WorkerPool;
pub use tesseract::TesseractFactory;
