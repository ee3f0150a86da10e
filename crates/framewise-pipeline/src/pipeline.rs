//! Pipeline lifecycle: wires the stages together, starts them on dedicated
//! threads and drains them in order on stop.

use crate::handoff::{FrameGate, LatestSlot};
use crate::orientation::{OrientationReader, OrientationTracker};
use crate::stages::{self, DetectionStage};
use crate::stats::{PipelineStats, StatsCounters};
use crate::subscribers::{SubscriptionId, Subscribers};
use crate::{join_stage, spawn_stage, PipelineError};
use framewise_core::{CompositionScore, CompositionScorer, DetectionBackend};
use framewise_hw::{FrameRate, FrameSensor, OrientationSensor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Tunables for a [`Pipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Requested capture rate.
    pub target_fps: u32,
    /// Detection runs on every `detection_stride`-th frame.
    pub detection_stride: u32,
    /// Orientation sampling rate.
    pub orientation_hz: u32,
    /// Roll reported until the orientation sensor produces a sample, and for
    /// good when there is no sensor.
    pub default_roll: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            detection_stride: 2,
            orientation_hz: 60,
            default_roll: 0.0,
        }
    }
}

impl PipelineConfig {
    /// Zero rates and strides become one.
    pub fn normalized(mut self) -> Self {
        self.target_fps = self.target_fps.max(1);
        self.detection_stride = self.detection_stride.max(1);
        self.orientation_hz = self.orientation_hz.max(1);
        if !self.default_roll.is_finite() {
            self.default_roll = 0.0;
        }
        self
    }
}

/// Everything the pipeline drives.
pub struct PipelineComponents {
    pub sensor: Box<dyn FrameSensor>,
    pub backend: Box<dyn DetectionBackend>,
    pub scorer: CompositionScorer,
    /// Roll source, sampled at `orientation_hz`. Without one the pipeline
    /// reports `default_roll`.
    pub orientation: Option<Box<dyn OrientationSensor>>,
}

/// Stage threads of a running pipeline. Each returns its component, or
/// `None` if it was released before receiving one.
struct Running {
    stop_capture: Arc<AtomicBool>,
    capture: JoinHandle<Option<Box<dyn FrameSensor>>>,
    detection: JoinHandle<Option<Box<dyn DetectionBackend>>>,
    scoring: JoinHandle<Option<CompositionScorer>>,
    delivery: JoinHandle<()>,
}

/// Senders the parked stage threads wait on. Dropping them releases the
/// threads without running their stage.
struct Handover {
    capture: oneshot::Sender<Box<dyn FrameSensor>>,
    detection: oneshot::Sender<Box<dyn DetectionBackend>>,
    scoring: oneshot::Sender<CompositionScorer>,
    delivery: oneshot::Sender<()>,
}

impl Handover {
    fn release(
        self,
        sensor: Box<dyn FrameSensor>,
        backend: Box<dyn DetectionBackend>,
        scorer: CompositionScorer,
    ) {
        // Downstream first so every producer has a live consumer.
        let delivered = [
            self.delivery.send(()).is_ok(),
            self.scoring.send(scorer).is_ok(),
            self.detection.send(backend).is_ok(),
            self.capture.send(sensor).is_ok(),
        ];
        if delivered.contains(&false) {
            tracing::error!("a stage exited before receiving its component");
        }
    }
}

/// The composition scoring pipeline.
///
/// Capture, detection and scoring each run on their own thread, and
/// subscribers are called from a fourth delivery thread so slow handlers
/// never hold up scoring.
pub struct Pipeline {
    config: PipelineConfig,
    sensor: Option<Box<dyn FrameSensor>>,
    backend: Option<Box<dyn DetectionBackend>>,
    scorer: Option<CompositionScorer>,
    tracker: OrientationTracker,
    subscribers: Arc<Subscribers>,
    counters: Arc<StatsCounters>,
    frame_rate: Option<FrameRate>,
    running: Option<Running>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, components: PipelineComponents) -> Self {
        let config = config.normalized();
        let tracker = OrientationTracker::new(
            components.orientation,
            config.orientation_hz,
            config.default_roll,
        );
        Self {
            config,
            sensor: Some(components.sensor),
            backend: Some(components.backend),
            scorer: Some(components.scorer),
            tracker,
            subscribers: Arc::new(Subscribers::default()),
            counters: Arc::new(StatsCounters::default()),
            frame_rate: None,
            running: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Rate granted by the sensor on the most recent start.
    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.frame_rate
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn orientation(&self) -> OrientationReader {
        self.tracker.reader()
    }

    /// Register `handler` to receive emitted scores. A handler still busy
    /// with one score misses those superseded in the meantime.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(CompositionScore) + Send + Sync + 'static,
    {
        self.subscribers.add(Arc::new(handler))
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    /// Open the sensor, start the orientation tracker and launch the stages.
    ///
    /// On failure every component is kept, so `start` may be retried.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }
        let (mut sensor, backend, scorer) =
            match (self.sensor.take(), self.backend.take(), self.scorer.take()) {
                (Some(sensor), Some(backend), Some(scorer)) => (sensor, backend, scorer),
                (sensor, backend, scorer) => {
                    self.sensor = sensor;
                    self.backend = backend;
                    self.scorer = scorer;
                    return Err(PipelineError::ComponentsLost);
                }
            };

        let rate = match sensor.start(self.config.target_fps) {
            Ok(rate) => rate,
            Err(e) => {
                tracing::error!(sensor = sensor.name(), error = %e, "failed to open frame sensor");
                self.restore(sensor, backend, scorer);
                return Err(e.into());
            }
        };
        if rate.honored() {
            tracing::info!(sensor = sensor.name(), fps = rate.actual, "capture rate negotiated");
        } else {
            tracing::warn!(
                sensor = sensor.name(),
                requested = rate.requested,
                actual = rate.actual,
                "requested capture rate unavailable; continuing at best available"
            );
        }
        self.frame_rate = Some(rate);

        if let Err(e) = self.tracker.start() {
            sensor.stop();
            self.restore(sensor, backend, scorer);
            return Err(e);
        }

        let (running, handover) = match self.launch() {
            Ok(launched) => launched,
            Err(e) => {
                tracing::error!(error = %e, "failed to launch pipeline stages");
                sensor.stop();
                self.tracker.stop();
                self.restore(sensor, backend, scorer);
                return Err(e);
            }
        };
        handover.release(sensor, backend, scorer);

        self.running = Some(running);
        tracing::info!(
            fps = rate.actual,
            detection_stride = self.config.detection_stride,
            subscribers = self.subscribers.len(),
            "pipeline started"
        );
        Ok(())
    }

    fn restore(
        &mut self,
        sensor: Box<dyn FrameSensor>,
        backend: Box<dyn DetectionBackend>,
        scorer: CompositionScorer,
    ) {
        self.sensor = Some(sensor);
        self.backend = Some(backend);
        self.scorer = Some(scorer);
    }

    /// Spawn every stage thread parked on its [`Handover`] receiver. If a
    /// spawn fails, the threads already running are released and joined.
    fn launch(&self) -> Result<(Running, Handover), PipelineError> {
        let (capture_tx, capture_rx) = oneshot::channel::<Box<dyn FrameSensor>>();
        let (detection_tx, detection_rx) = oneshot::channel::<Box<dyn DetectionBackend>>();
        let (scoring_tx, scoring_rx) = oneshot::channel::<CompositionScorer>();
        let (delivery_tx, delivery_rx) = oneshot::channel::<()>();
        let handover = Handover {
            capture: capture_tx,
            detection: detection_tx,
            scoring: scoring_tx,
            delivery: delivery_tx,
        };

        let (frame_tx, frame_rx) = mpsc::channel(1);
        let features = Arc::new(LatestSlot::new());
        let scores = Arc::new(LatestSlot::new());
        let stop_capture = Arc::new(AtomicBool::new(false));

        let delivery = {
            let scores = Arc::clone(&scores);
            let subscribers = Arc::clone(&self.subscribers);
            spawn_stage("delivery", move || {
                if delivery_rx.blocking_recv().is_ok() {
                    stages::run_delivery(scores, subscribers);
                }
            })?
        };

        let scoring = {
            let features = Arc::clone(&features);
            let counters = Arc::clone(&self.counters);
            spawn_stage("scoring", move || {
                let scorer = scoring_rx.blocking_recv().ok()?;
                Some(stages::run_scoring(scorer, features, scores, counters))
            })
        };
        let scoring = match scoring {
            Ok(handle) => handle,
            Err(e) => {
                drop(handover);
                join_stage("delivery", delivery);
                return Err(e);
            }
        };

        let detection = {
            let gate = FrameGate::new(self.config.detection_stride);
            let orientation = self.tracker.reader();
            let counters = Arc::clone(&self.counters);
            spawn_stage("detection", move || {
                let backend = detection_rx.blocking_recv().ok()?;
                let stage = DetectionStage {
                    backend,
                    gate,
                    orientation,
                    slot: features,
                    counters,
                };
                Some(stage.run(frame_rx))
            })
        };
        let detection = match detection {
            Ok(handle) => handle,
            Err(e) => {
                drop(handover);
                join_stage("scoring", scoring);
                join_stage("delivery", delivery);
                return Err(e);
            }
        };

        let capture = {
            let stop = Arc::clone(&stop_capture);
            let counters = Arc::clone(&self.counters);
            spawn_stage("capture", move || {
                let sensor = capture_rx.blocking_recv().ok()?;
                Some(stages::run_capture(sensor, frame_tx, stop, counters))
            })
        };
        let capture = match capture {
            Ok(handle) => handle,
            Err(e) => {
                drop(handover);
                join_stage("detection", detection);
                join_stage("scoring", scoring);
                join_stage("delivery", delivery);
                return Err(e);
            }
        };

        let running = Running {
            stop_capture,
            capture,
            detection,
            scoring,
            delivery,
        };
        Ok((running, handover))
    }

    /// Halt capture, let in-flight work drain through detection, scoring and
    /// delivery, then stop the orientation tracker. Idempotent.
    ///
    /// Delivery finishes at most the score in flight and the one pending, so
    /// stopping does not wait on a backlog.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        tracing::info!("pipeline stopping");

        running.stop_capture.store(true, Ordering::Release);
        self.sensor = join_stage("capture", running.capture).flatten();
        tracing::debug!("capture joined");

        self.backend = join_stage("detection", running.detection).flatten();
        tracing::debug!("detection joined");

        self.scorer = join_stage("scoring", running.scoring).flatten();
        tracing::debug!("scoring joined");

        join_stage("delivery", running.delivery);
        tracing::debug!("delivery joined");

        self.tracker.stop();

        let stats = self.stats();
        let intact = self.sensor.is_some() && self.backend.is_some() && self.scorer.is_some();
        tracing::info!(
            frames_captured = stats.frames_captured,
            frames_dropped = stats.frames_dropped,
            detection_failures = stats.detection_failures,
            features_superseded = stats.features_superseded,
            scores_emitted = stats.scores_emitted,
            scores_superseded = stats.scores_superseded,
            components_intact = intact,
            "pipeline stopped"
        );
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
