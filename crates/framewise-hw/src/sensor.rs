//! Frame sensor abstraction and the synthetic test-pattern sensor.

use crate::frame::FrameBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("sensor not started")]
    NotStarted,
}

/// Requested versus granted capture rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub requested: u32,
    pub actual: u32,
}

impl FrameRate {
    pub fn honored(&self) -> bool {
        self.actual >= self.requested
    }

    /// Nominal time between frames at the granted rate.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.actual.max(1) as f64)
    }
}

/// A source of camera frames.
///
/// `start` must not fail merely because the requested rate is unavailable;
/// the sensor runs at the best rate it can and reports it.
pub trait FrameSensor: Send {
    fn name(&self) -> &str;

    /// Open the device and request `target_fps`.
    fn start(&mut self, target_fps: u32) -> Result<FrameRate, SensorError>;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<FrameBuffer, SensorError>;

    /// Release the device. Called once capture halts.
    fn stop(&mut self) {}
}

/// Configuration for [`SyntheticSensor`].
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Highest rate the fake device supports.
    pub max_fps: u32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            max_fps: 60,
            seed: 0x5eed,
        }
    }
}

/// Paced test-pattern sensor: a noisy gradient with a bright subject block
/// drifting across the frame.
pub struct SyntheticSensor {
    config: SyntheticConfig,
    rng: StdRng,
    rate: Option<FrameRate>,
    next_due: Instant,
    sequence: u64,
}

impl SyntheticSensor {
    pub fn new(config: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            rate: None,
            next_due: Instant::now(),
            sequence: 0,
        }
    }

    fn render(&mut self) -> Vec<u8> {
        let w = self.config.width as usize;
        let h = self.config.height as usize;
        let block = (w.min(h) / 4).max(1);
        let travel = w.saturating_sub(block).max(1);
        let bx = (self.sequence as usize * 2) % travel;
        let by = h.saturating_sub(block) / 3;

        let mut pixels = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let base = 40 + (x * 80 / w.max(1)) as i32;
                let noise: i32 = self.rng.gen_range(-6..=6);
                let in_subject = x >= bx && x < bx + block && y >= by && y < by + block;
                let value = if in_subject { 230 + noise } else { base + noise };
                pixels.push(value.clamp(0, 255) as u8);
            }
        }
        pixels
    }
}

impl Default for SyntheticSensor {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

impl FrameSensor for SyntheticSensor {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn start(&mut self, target_fps: u32) -> Result<FrameRate, SensorError> {
        let requested = target_fps.max(1);
        let rate = FrameRate {
            requested,
            actual: requested.min(self.config.max_fps.max(1)),
        };
        self.rate = Some(rate);
        self.next_due = Instant::now();
        Ok(rate)
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SensorError> {
        let rate = self.rate.ok_or(SensorError::NotStarted)?;
        let interval = rate.interval();

        let now = Instant::now();
        if now < self.next_due {
            std::thread::sleep(self.next_due - now);
            self.next_due += interval;
        } else {
            // Behind schedule: restart pacing from now rather than bursting.
            self.next_due = now + interval;
        }

        let pixels = self.render();
        self.sequence += 1;
        Ok(FrameBuffer::new(
            pixels,
            self.config.width,
            self.config.height,
            self.sequence,
        ))
    }

    fn stop(&mut self) {
        self.rate = None;
    }
}
