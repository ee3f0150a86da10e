//! framewise-pipeline: Real-time stages connecting sensor, detector and scorer.
//!
//! Capture hands frames to detection over a drop-late edge, detection runs
//! on a gated subsample and extracts features against the latest roll from
//! the orientation tracker, and scoring consumes a single-slot drop-oldest
//! edge. Scores fan out to subscribers on a separate delivery thread.

pub mod handoff;
pub mod orientation;
pub mod pipeline;
mod stages;
pub mod stats;
pub mod subscribers;

use framewise_hw::SensorError;
use std::thread::JoinHandle;
use thiserror::Error;

pub use handoff::{FrameGate, LatestSlot};
pub use orientation::{OrientationReader, OrientationTracker};
pub use pipeline::{Pipeline, PipelineComponents, PipelineConfig};
pub use stats::PipelineStats;
pub use subscribers::SubscriptionId;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("pipeline already running")]
    AlreadyRunning,
    #[error("pipeline components were lost after a stage panicked")]
    ComponentsLost,
    #[error("frame sensor: {0}")]
    Sensor(#[from] SensorError),
    #[error("failed to spawn {stage} thread: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Spawn a named stage thread.
pub(crate) fn spawn_stage<T, F>(
    stage: &'static str,
    f: F,
) -> Result<JoinHandle<T>, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    #[cfg(test)]
    if spawn_faults::refused(stage) {
        return Err(PipelineError::Spawn {
            stage,
            source: std::io::Error::other("thread spawn refused"),
        });
    }

    std::thread::Builder::new()
        .name(format!("framewise-{stage}"))
        .spawn(f)
        .map_err(|source| PipelineError::Spawn { stage, source })
}

/// Join a stage thread. A panic is logged and yields `None`.
pub(crate) fn join_stage<T>(stage: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(stage, "stage thread panicked");
            None
        }
    }
}
