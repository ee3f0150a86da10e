//! Stage workers. Each runs on its own thread and returns its owned
//! component when it exits so the pipeline can be restarted.

use crate::handoff::{CloseOnDrop, FrameGate, LatestSlot};
use crate::orientation::OrientationReader;
use crate::stats::StatsCounters;
use crate::subscribers::Subscribers;
use framewise_core::{
    extract, CompositionScore, CompositionScorer, DetectionBackend, FeatureVector, LumaFrame,
};
use framewise_hw::{FrameBuffer, FrameSensor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Pause after a failed sensor read so a broken device does not spin.
const CAPTURE_ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Pull frames from the sensor and hand each one to detection without
/// waiting: if detection still holds a pending frame the new one is dropped.
pub(crate) fn run_capture(
    mut sensor: Box<dyn FrameSensor>,
    tx: mpsc::Sender<FrameBuffer>,
    stop: Arc<AtomicBool>,
    counters: Arc<StatsCounters>,
) -> Box<dyn FrameSensor> {
    tracing::info!(sensor = sensor.name(), "capture stage started");
    let mut consecutive_errors = 0u64;

    while !stop.load(Ordering::Acquire) {
        let frame = match sensor.next_frame() {
            Ok(frame) => {
                consecutive_errors = 0;
                frame
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors == 1 {
                    tracing::warn!(error = %e, "frame capture failed");
                } else {
                    tracing::debug!(error = %e, consecutive_errors, "frame capture failed");
                }
                std::thread::sleep(CAPTURE_ERROR_BACKOFF);
                continue;
            }
        };
        StatsCounters::bump(&counters.frames_captured);

        match tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_late)) => StatsCounters::bump(&counters.frames_dropped),
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("detection stage gone; capture exiting");
                break;
            }
        }
    }

    sensor.stop();
    tracing::info!("capture stage stopped");
    sensor
}

/// Detection stage: gates frames, runs the backend, and extracts features
/// synchronously against the latest orientation sample.
pub(crate) struct DetectionStage {
    pub backend: Box<dyn DetectionBackend>,
    pub gate: FrameGate,
    pub orientation: OrientationReader,
    pub slot: Arc<LatestSlot<FeatureVector>>,
    pub counters: Arc<StatsCounters>,
}

impl DetectionStage {
    /// Process one delivered frame. The frame is released before returning.
    pub fn handle(&mut self, frame: FrameBuffer) {
        if !self.gate.admit() {
            return;
        }

        let result = {
            let luma = LumaFrame::new(&frame.data, frame.width, frame.height, frame.sequence);
            self.backend.detect(&luma)
        };
        drop(frame);

        match result {
            Ok(detection) => {
                let features = extract(&detection, self.orientation.latest());
                if self.slot.publish(features).is_some() {
                    StatsCounters::bump(&self.counters.features_superseded);
                }
            }
            Err(e) => {
                StatsCounters::bump(&self.counters.detection_failures);
                tracing::debug!(
                    error = %e,
                    backend = self.backend.name(),
                    "detection failed; frame skipped"
                );
            }
        }
    }

    /// Drain frames until capture hangs up, then close the scoring slot.
    pub fn run(mut self, mut rx: mpsc::Receiver<FrameBuffer>) -> Box<dyn DetectionBackend> {
        tracing::info!(backend = self.backend.name(), "detection stage started");
        let _close = CloseOnDrop(Arc::clone(&self.slot));

        while let Some(frame) = rx.blocking_recv() {
            self.handle(frame);
        }

        tracing::info!(frames = self.gate.frames_seen(), "detection stage stopped");
        self.backend
    }
}

/// Score the most recent feature vector each time one is available.
///
/// Scores go to a single-slot edge, so a busy delivery thread costs
/// superseded scores rather than a backlog. The delivery slot is closed on
/// exit.
pub(crate) fn run_scoring(
    mut scorer: CompositionScorer,
    features: Arc<LatestSlot<FeatureVector>>,
    scores: Arc<LatestSlot<CompositionScore>>,
    counters: Arc<StatsCounters>,
) -> CompositionScorer {
    tracing::info!(learned = scorer.has_learned(), "scoring stage started");
    let _close = CloseOnDrop(Arc::clone(&scores));

    while let Some(features) = features.take() {
        let score = scorer.score(&features);
        StatsCounters::bump(&counters.scores_emitted);
        if scores.publish(score).is_some() {
            StatsCounters::bump(&counters.scores_superseded);
        }
    }

    tracing::info!("scoring stage stopped");
    scorer
}

/// Fan scores out to subscribers off the scoring thread.
pub(crate) fn run_delivery(
    scores: Arc<LatestSlot<CompositionScore>>,
    subscribers: Arc<Subscribers>,
) {
    while let Some(score) = scores.take() {
        subscribers.dispatch(score);
    }
    tracing::debug!("delivery stage stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orientation::OrientationTracker;
    use framewise_core::{DetectionResult, DetectorError};
    use std::sync::atomic::AtomicU64;

    /// Backend counting invocations and returning an empty result.
    struct CountingBackend {
        calls: Arc<AtomicU64>,
        fail: bool,
    }

    impl DetectionBackend for CountingBackend {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn detect(&mut self, frame: &LumaFrame<'_>) -> Result<DetectionResult, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DetectorError::Backend {
                    detector: "counting",
                    reason: "boom".into(),
                });
            }
            Ok(DetectionResult {
                frame_sequence: frame.sequence,
                ..Default::default()
            })
        }
    }

    fn stage(fail: bool) -> (DetectionStage, Arc<AtomicU64>, OrientationTracker) {
        let calls = Arc::new(AtomicU64::new(0));
        let tracker = OrientationTracker::inert(0.0);
        let stage = DetectionStage {
            backend: Box::new(CountingBackend {
                calls: Arc::clone(&calls),
                fail,
            }),
            gate: FrameGate::new(2),
            orientation: tracker.reader(),
            slot: Arc::new(LatestSlot::new()),
            counters: Arc::new(StatsCounters::default()),
        };
        (stage, calls, tracker)
    }

    fn frame(sequence: u64) -> FrameBuffer {
        FrameBuffer::new(vec![0u8; 4], 2, 2, sequence)
    }

    #[test]
    fn test_gate_skips_odd_frames_without_side_effects() {
        let (mut stage, calls, _tracker) = stage(false);

        stage.handle(frame(1));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(stage.slot.try_take().is_none());

        stage.handle(frame(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(stage.slot.try_take().is_some());

        for seq in 3..=10 {
            stage.handle(frame(seq));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // Skipped frames leave no trace in the counters either.
        assert_eq!(stage.counters.snapshot(), Default::default());
    }

    #[test]
    fn test_backend_failure_publishes_nothing() {
        let (mut stage, calls, _tracker) = stage(true);
        for seq in 1..=6 {
            stage.handle(frame(seq));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(stage.slot.try_take().is_none());
        assert_eq!(stage.counters.snapshot().detection_failures, 3);
    }

    #[test]
    fn test_detection_run_closes_slot_when_capture_hangs_up() {
        let (stage, _calls, _tracker) = stage(false);
        let slot = Arc::clone(&stage.slot);
        let (tx, rx) = mpsc::channel(1);
        let worker = std::thread::spawn(move || stage.run(rx));
        tx.blocking_send(frame(1)).unwrap();
        tx.blocking_send(frame(2)).unwrap();
        drop(tx);
        worker.join().unwrap();
        assert!(slot.is_closed());
        // The admitted frame's features are still there to drain.
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_scoring_sees_only_newest_of_backlog() {
        let slot = Arc::new(LatestSlot::new());
        for weight in [0.1, 0.5, 0.9] {
            slot.publish(FeatureVector {
                subject_weight: weight,
                ..FeatureVector::uniform(0.0)
            });
        }
        slot.close();

        let scores = Arc::new(LatestSlot::new());
        let counters = Arc::new(StatsCounters::default());
        run_scoring(
            CompositionScorer::heuristic(),
            slot,
            Arc::clone(&scores),
            Arc::clone(&counters),
        );

        assert!(scores.is_closed());
        assert_eq!(scores.take().map(|s| s.subject_weight), Some(90));
        assert!(scores.take().is_none());
        assert_eq!(counters.snapshot().scores_emitted, 1);
        assert_eq!(counters.snapshot().scores_superseded, 0);
    }

    #[test]
    fn test_busy_delivery_supersedes_scores_without_blocking_scoring() {
        let features = Arc::new(LatestSlot::new());
        let scores = Arc::new(LatestSlot::new());
        let counters = Arc::new(StatsCounters::default());
        let scoring = {
            let (features, scores, counters) =
                (Arc::clone(&features), Arc::clone(&scores), Arc::clone(&counters));
            std::thread::spawn(move || {
                run_scoring(CompositionScorer::heuristic(), features, scores, counters)
            })
        };

        // Nobody drains the delivery slot; scoring must keep up regardless.
        for step in 0..50 {
            features.publish(FeatureVector::uniform(step as f64 / 50.0));
            while features.is_pending() {
                std::thread::yield_now();
            }
        }
        features.close();
        scoring.join().unwrap();

        let stats = counters.snapshot();
        assert_eq!(stats.scores_emitted, 50);
        assert_eq!(stats.scores_superseded, 49);
        assert!(scores.take().is_some());
        assert!(scores.take().is_none());
    }

    #[test]
    fn test_delivery_drains_only_the_newest_pending_score() {
        let scores = Arc::new(LatestSlot::new());
        for weight in [0.1, 0.5, 0.9] {
            scores.publish(CompositionScorer::heuristic().score(&FeatureVector {
                subject_weight: weight,
                ..FeatureVector::uniform(0.0)
            }));
        }
        scores.close();

        let subscribers = Arc::new(Subscribers::default());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            subscribers.add(Arc::new(move |score: CompositionScore| {
                seen.lock().push(score.subject_weight)
            }));
        }
        run_delivery(scores, subscribers);

        assert_eq!(*seen.lock(), vec![90]);
    }
}
