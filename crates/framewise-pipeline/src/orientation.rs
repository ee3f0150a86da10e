//! Orientation tracker: samples device roll on its own thread and exposes
//! only the latest value.

use crate::{join_stage, spawn_stage, PipelineError};
use framewise_core::OrientationSample;
use framewise_hw::OrientationSensor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Single-writer, multi-reader cell holding the latest roll as `f64` bits.
#[derive(Debug)]
pub struct OrientationCell {
    bits: AtomicU64,
}

impl OrientationCell {
    pub fn new(roll: f64) -> Self {
        Self {
            bits: AtomicU64::new(roll.to_bits()),
        }
    }

    pub fn load(&self) -> OrientationSample {
        OrientationSample::new(f64::from_bits(self.bits.load(Ordering::Acquire)))
    }

    fn store(&self, roll: f64) {
        self.bits.store(roll.to_bits(), Ordering::Release);
    }
}

/// Read-only handle to the tracker's latest sample.
#[derive(Debug, Clone)]
pub struct OrientationReader {
    cell: Arc<OrientationCell>,
}

impl OrientationReader {
    pub fn latest(&self) -> OrientationSample {
        self.cell.load()
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Option<Box<dyn OrientationSensor>>>,
}

/// Owns the orientation sensor and the thread sampling it.
///
/// Without a sensor the tracker is inert and reports the default roll
/// forever.
pub struct OrientationTracker {
    cell: Arc<OrientationCell>,
    sensor: Option<Box<dyn OrientationSensor>>,
    rate_hz: u32,
    worker: Option<Worker>,
}

impl OrientationTracker {
    pub fn new(
        sensor: Option<Box<dyn OrientationSensor>>,
        rate_hz: u32,
        default_roll: f64,
    ) -> Self {
        Self {
            cell: Arc::new(OrientationCell::new(default_roll)),
            sensor,
            rate_hz: rate_hz.max(1),
            worker: None,
        }
    }

    /// Tracker with no sensor.
    pub fn inert(default_roll: f64) -> Self {
        Self::new(None, 1, default_roll)
    }

    pub fn reader(&self) -> OrientationReader {
        OrientationReader {
            cell: Arc::clone(&self.cell),
        }
    }

    pub fn latest(&self) -> OrientationSample {
        self.cell.load()
    }

    pub fn has_sensor(&self) -> bool {
        self.sensor.is_some() || self.worker.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start sampling. A missing sensor is not an error; on a spawn failure
    /// the sensor is kept for a retry.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(sensor) = self.sensor.take() else {
            tracing::warn!(
                roll = self.cell.load().roll,
                "orientation sensor unavailable; tracker inert"
            );
            return Ok(());
        };

        let stop = Arc::new(AtomicBool::new(false));
        let cell = Arc::clone(&self.cell);
        let interval = Duration::from_secs_f64(1.0 / self.rate_hz as f64);
        let thread_stop = Arc::clone(&stop);
        let (sensor_tx, sensor_rx) = oneshot::channel::<Box<dyn OrientationSensor>>();

        let handle = spawn_stage("orientation", move || {
            let mut sensor = sensor_rx.blocking_recv().ok()?;
            sample_loop(sensor.as_mut(), &cell, interval, &thread_stop);
            Some(sensor)
        });
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    sensor = sensor.name(),
                    error = %e,
                    "orientation tracker failed to start"
                );
                self.sensor = Some(sensor);
                return Err(e);
            }
        };

        tracing::info!(
            sensor = sensor.name(),
            rate_hz = self.rate_hz,
            "orientation tracker starting"
        );
        if sensor_tx.send(sensor).is_err() {
            tracing::error!("orientation thread exited before receiving its sensor");
        }
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Stop sampling and reclaim the sensor. The last sample stays visible.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        self.sensor = join_stage("orientation", worker.handle).flatten();
        tracing::info!("orientation tracker stopped");
    }
}

impl Drop for OrientationTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample_loop(
    sensor: &mut dyn OrientationSensor,
    cell: &OrientationCell,
    interval: Duration,
    stop: &AtomicBool,
) {
    let mut failures = 0u64;
    while !stop.load(Ordering::Acquire) {
        match sensor.read_roll() {
            Ok(roll) if roll.is_finite() => {
                cell.store(roll);
                failures = 0;
            }
            Ok(roll) => tracing::debug!(roll, "ignoring non-finite roll sample"),
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    tracing::warn!(error = %e, "orientation read failed; keeping last value");
                } else {
                    tracing::debug!(error = %e, failures, "orientation read failed");
                }
            }
        }
        std::thread::sleep(interval);
    }
}
