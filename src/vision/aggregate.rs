//! Recognition dispatch and result aggregation
//!
//! One dispatch sends the same encoded ROI to every worker, waits for all of
//! them, and merges their answers into a single accept or reject decision. At
//! most one dispatch is in flight process-wide; requests arriving meanwhile are
//! dropped rather than queued.

use futures_util::future::try_join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::ocr::{RecognitionEngine, RecognitionResult};
use super::ocr_preprocess::EncodedImage;
use crate::error::ScanError;
use crate::overlay::Indicator;
use crate::shared::{Notice, Notifier, SessionEvent, SessionState};

/// Notice shown when a dispatch finds no workers
pub const POOL_NOT_READY_NOTICE: &str = "OCR workers are not initialized.";
/// Notice shown when a worker fails mid-recognition
pub const RECOGNITION_FAILED_NOTICE: &str = "An error occurred while processing the image.";

/// Merged verdict over every worker's result for one image
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDecision {
    /// Worker texts joined by newlines, trimmed
    pub text: String,
    /// Mean of the worker confidences
    pub confidence: f32,
    pub accepted: bool,
}

impl AggregateDecision {
    /// Merge worker results against a confidence threshold (1-100)
    pub fn merge(results: &[RecognitionResult], threshold: u8) -> Self {
        let joined = results
            .iter()
            .map(|r| r.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let text = joined.trim().to_string();

        let confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f32>() / results.len() as f32
        };

        let accepted = confidence >= threshold as f32 && !text.is_empty();

        Self {
            text,
            confidence,
            accepted,
        }
    }
}

/// Accepted text, oldest first
#[derive(Debug, Clone, Default)]
pub struct OutputStream {
    entries: Vec<String>,
}

impl OutputStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append trimmed text unless it is empty or equal to the latest entry.
    /// Returns whether anything was appended.
    pub fn append(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() || self.entries.last().map(String::as_str) == Some(trimmed) {
            return false;
        }
        self.entries.push(trimmed.to_string());
        true
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whole stream as newline-terminated text
    pub fn export(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}

/// What became of one dispatch request
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Another dispatch was still running
    Dropped,
    /// Confidence and text passed; `appended` is false for an adjacent duplicate
    Accepted {
        text: String,
        confidence: f32,
        appended: bool,
    },
    /// Below threshold or no text
    Rejected { text: String, confidence: f32 },
    /// No workers, or a worker failed
    Failed { reason: String },
    /// Finished after the session stopped; nothing was written
    Discarded,
}

/// Proof of holding the single in-flight slot; dropping it frees the slot
#[derive(Debug)]
pub struct FlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Owns the output stream and the indicator; the only writer of either
pub struct Aggregator {
    in_flight: Arc<AtomicBool>,
    output: RwLock<OutputStream>,
    indicator: RwLock<Indicator>,
    notifier: Notifier,
}

impl Aggregator {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            output: RwLock::new(OutputStream::new()),
            indicator: RwLock::new(Indicator::Idle),
            notifier,
        }
    }

    /// Claim the in-flight slot, or `None` if a dispatch is already running
    pub fn try_begin(&self) -> Option<FlightGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flag: self.in_flight.clone(),
            })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Record and announce a request that found the slot taken
    pub fn drop_request(&self) -> DispatchOutcome {
        warn!("OCR is already in progress, dropping frame");
        let outcome = DispatchOutcome::Dropped;
        self.notifier
            .emit(SessionEvent::DispatchCompleted(outcome.clone()));
        outcome
    }

    /// Fan `image` out to every worker and apply the merged decision.
    ///
    /// The guard is released before the completion event goes out, whatever
    /// the outcome. Results landing after the session left Scanning/Paused
    /// are discarded.
    pub async fn dispatch(
        &self,
        guard: FlightGuard,
        workers: Vec<Arc<dyn RecognitionEngine>>,
        image: EncodedImage,
        threshold: u8,
        state: watch::Receiver<SessionState>,
    ) -> DispatchOutcome {
        let outcome = self.run(workers, &image, threshold, &state).await;
        drop(guard);

        self.notifier
            .emit(SessionEvent::DispatchCompleted(outcome.clone()));
        outcome
    }

    async fn run(
        &self,
        workers: Vec<Arc<dyn RecognitionEngine>>,
        image: &EncodedImage,
        threshold: u8,
        state: &watch::Receiver<SessionState>,
    ) -> DispatchOutcome {
        if workers.is_empty() {
            let err = ScanError::PoolNotReady;
            warn!("{}", err);
            self.notifier.notice(Notice::error(POOL_NOT_READY_NOTICE));
            return DispatchOutcome::Failed {
                reason: err.to_string(),
            };
        }

        debug!(worker_count = workers.len(), "Starting OCR dispatch");
        let results = try_join_all(workers.iter().map(|worker| worker.recognize(image))).await;

        let live = state.borrow().accepts_results();

        let results = match results {
            Ok(results) => results,
            Err(e) => {
                error!("OCR dispatch failed: {}", e);
                if !live {
                    return DispatchOutcome::Discarded;
                }
                self.set_indicator(Indicator::Rejected);
                self.notifier.notice(Notice::error(RECOGNITION_FAILED_NOTICE));
                return DispatchOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let decision = AggregateDecision::merge(&results, threshold);
        debug!(
            confidence = decision.confidence,
            accepted = decision.accepted,
            "OCR average confidence"
        );

        if !live {
            debug!("Session no longer scanning, discarding OCR result");
            return DispatchOutcome::Discarded;
        }

        if decision.accepted {
            self.set_indicator(Indicator::Accepted);
            let appended = self.output.write().append(&decision.text);
            if appended {
                info!("Text appended to output: {:?}", decision.text);
            }
            DispatchOutcome::Accepted {
                text: decision.text,
                confidence: decision.confidence,
                appended,
            }
        } else {
            self.set_indicator(Indicator::Rejected);
            debug!("OCR confidence too low or no text detected");
            DispatchOutcome::Rejected {
                text: decision.text,
                confidence: decision.confidence,
            }
        }
    }

    fn set_indicator(&self, indicator: Indicator) {
        *self.indicator.write() = indicator;
    }

    pub fn indicator(&self) -> Indicator {
        *self.indicator.read()
    }

    /// Back to idle, as on pause and stop
    pub fn reset_indicator(&self) {
        self.set_indicator(Indicator::Idle);
    }

    /// Snapshot of the accepted entries
    pub fn output_entries(&self) -> Vec<String> {
        self.output.read().entries().to_vec()
    }

    pub fn export_output(&self) -> String {
        self.output.read().export()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedEngineFactory};
    use crate::vision::EngineFactory;
    use std::time::Duration;

    fn image() -> EncodedImage {
        EncodedImage {
            bytes: Arc::from(vec![0u8; 4]),
            width: 1,
            height: 1,
        }
    }

    fn scanning() -> watch::Receiver<SessionState> {
        let (_tx, rx) = watch::channel(SessionState::Scanning);
        rx
    }

    fn workers(results: &[(&str, f32)]) -> Vec<Arc<dyn RecognitionEngine>> {
        results
            .iter()
            .map(|(text, conf)| {
                Arc::new(ScriptedEngine::new(RecognitionResult::new(*text, *conf)))
                    as Arc<dyn RecognitionEngine>
            })
            .collect()
    }

    #[test]
    fn test_merge_accepts_average_above_threshold() {
        let decision = AggregateDecision::merge(
            &[RecognitionResult::new("A", 70.0), RecognitionResult::new("B", 90.0)],
            60,
        );
        assert_eq!(decision.text, "A\nB");
        assert!((decision.confidence - 80.0).abs() < f32::EPSILON);
        assert!(decision.accepted);
    }

    #[test]
    fn test_merge_rejects_empty_low_confidence() {
        let decision = AggregateDecision::merge(&[RecognitionResult::new("", 40.0)], 60);
        assert!(!decision.accepted);
        assert_eq!(decision.text, "");
    }

    #[test]
    fn test_merge_rejects_blank_text_even_when_confident() {
        let decision = AggregateDecision::merge(&[RecognitionResult::new("  \n ", 99.0)], 60);
        assert!(!decision.accepted);
    }

    #[test]
    fn test_merge_threshold_is_inclusive() {
        let decision = AggregateDecision::merge(&[RecognitionResult::new("ok", 60.0)], 60);
        assert!(decision.accepted);
    }

    #[test]
    fn test_adjacent_duplicates_suppressed() {
        let mut output = OutputStream::new();
        assert!(output.append("hello"));
        assert!(!output.append("  hello "));
        assert_eq!(output.entries(), &["hello".to_string()]);

        assert!(output.append("world"));
        assert!(output.append("hello"));
        assert_eq!(output.len(), 3);
        assert_eq!(output.export(), "hello\nworld\nhello\n");
    }

    #[test]
    fn test_flight_guard_releases_on_drop() {
        let (notifier, _rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);

        let guard = aggregator.try_begin().unwrap();
        assert!(aggregator.try_begin().is_none());
        assert!(aggregator.is_in_flight());

        drop(guard);
        assert!(!aggregator.is_in_flight());
        assert!(aggregator.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_dispatch_accepts_and_appends() {
        let (notifier, rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);

        let guard = aggregator.try_begin().unwrap();
        let outcome = aggregator
            .dispatch(guard, workers(&[("A", 70.0), ("B", 90.0)]), image(), 60, scanning())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Accepted { appended: true, .. }));
        assert_eq!(aggregator.output_entries(), vec!["A\nB".to_string()]);
        assert_eq!(aggregator.indicator(), Indicator::Accepted);
        assert!(!aggregator.is_in_flight());
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::DispatchCompleted(DispatchOutcome::Accepted { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispatch_rejects_below_threshold() {
        let (notifier, _rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);

        let guard = aggregator.try_begin().unwrap();
        let outcome = aggregator
            .dispatch(guard, workers(&[("", 40.0)]), image(), 60, scanning())
            .await;

        assert!(matches!(outcome, DispatchOutcome::Rejected { .. }));
        assert!(aggregator.output_entries().is_empty());
        assert_eq!(aggregator.indicator(), Indicator::Rejected);
    }

    #[tokio::test]
    async fn test_worker_failure_rejects_and_releases_guard() {
        let (notifier, rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);

        let failing = ScriptedEngineFactory::new(RecognitionResult::new("x", 90.0));
        failing.fail_recognition(true);
        let broken = failing.create("eng").await.unwrap();
        let mut pool = workers(&[("fine", 90.0)]);
        pool.push(broken);

        let guard = aggregator.try_begin().unwrap();
        let outcome = aggregator.dispatch(guard, pool, image(), 60, scanning()).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(aggregator.indicator(), Indicator::Rejected);
        assert!(aggregator.output_entries().is_empty());
        assert!(!aggregator.is_in_flight());

        let notice = rx.try_iter().find_map(|event| match event {
            SessionEvent::Notice(notice) => Some(notice),
            _ => None,
        });
        assert_eq!(notice.unwrap().message, RECOGNITION_FAILED_NOTICE);
    }

    #[tokio::test]
    async fn test_dispatch_without_workers_fails_without_indicator_change() {
        let (notifier, _rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);

        let guard = aggregator.try_begin().unwrap();
        let outcome = aggregator.dispatch(guard, Vec::new(), image(), 60, scanning()).await;

        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(aggregator.indicator(), Indicator::Idle);
        assert!(!aggregator.is_in_flight());
    }

    #[tokio::test]
    async fn test_late_result_after_stop_is_discarded() {
        let (notifier, _rx) = Notifier::channel();
        let aggregator = Arc::new(Aggregator::new(notifier));
        let (state_tx, state_rx) = watch::channel(SessionState::Scanning);

        let slow = Arc::new(
            ScriptedEngine::new(RecognitionResult::new("late", 95.0))
                .with_delay(Duration::from_millis(50)),
        ) as Arc<dyn RecognitionEngine>;

        let guard = aggregator.try_begin().unwrap();
        let task = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                aggregator
                    .dispatch(guard, vec![slow], image(), 60, state_rx)
                    .await
            })
        };

        state_tx.send_replace(SessionState::Stopped);
        let outcome = task.await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Discarded);
        assert!(aggregator.output_entries().is_empty());
        assert_eq!(aggregator.indicator(), Indicator::Idle);
        assert!(!aggregator.is_in_flight());
    }

    #[test]
    fn test_drop_request_leaves_state_alone() {
        let (notifier, _rx) = Notifier::channel();
        let aggregator = Aggregator::new(notifier);
        let _guard = aggregator.try_begin().unwrap();

        assert_eq!(aggregator.drop_request(), DispatchOutcome::Dropped);
        assert!(aggregator.output_entries().is_empty());
        assert_eq!(aggregator.indicator(), Indicator::Idle);
        assert!(aggregator.is_in_flight());
    }
}
