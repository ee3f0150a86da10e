//! Pipeline counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters bumped by the stage workers.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub frames_captured: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub detection_failures: AtomicU64,
    pub features_superseded: AtomicU64,
    pub scores_emitted: AtomicU64,
    pub scores_superseded: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            features_superseded: self.features_superseded.load(Ordering::Relaxed),
            scores_emitted: self.scores_emitted.load(Ordering::Relaxed),
            scores_superseded: self.scores_superseded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub frames_captured: u64,
    /// Frames discarded at capture because detection was still busy.
    pub frames_dropped: u64,
    pub detection_failures: u64,
    /// Feature vectors replaced in the scoring slot before being scored.
    pub features_superseded: u64,
    pub scores_emitted: u64,
    /// Scores replaced in the delivery slot while subscribers were busy.
    pub scores_superseded: u64,
}
