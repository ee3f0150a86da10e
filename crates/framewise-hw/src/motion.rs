//! Device orientation sources.
//!
//! An [`OrientationSensor`] yields the device roll angle in radians. On Linux
//! an IIO accelerometer is discovered through sysfs; platforms without one
//! simply have no sensor.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

const IIO_ROOT: &str = "/sys/bus/iio/devices";

#[derive(Error, Debug)]
pub enum OrientationError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed reading in {path}: {value:?}")]
    Malformed { path: String, value: String },
}

/// A source of device roll samples.
pub trait OrientationSensor: Send {
    fn name(&self) -> &str;

    /// Current roll angle in radians; zero when the device is level.
    fn read_roll(&mut self) -> Result<f64, OrientationError>;
}

/// Always reports the same angle.
#[derive(Debug, Clone, Copy)]
pub struct FixedOrientation {
    pub roll: f64,
}

impl FixedOrientation {
    pub fn new(roll: f64) -> Self {
        Self { roll }
    }
}

impl OrientationSensor for FixedOrientation {
    fn name(&self) -> &str {
        "fixed"
    }

    fn read_roll(&mut self) -> Result<f64, OrientationError> {
        Ok(self.roll)
    }
}

/// Slow sinusoidal roll sweep with a little jitter.
pub struct SyntheticOrientation {
    amplitude: f64,
    period: Duration,
    started: Instant,
    rng: StdRng,
}

impl SyntheticOrientation {
    pub fn new(amplitude: f64, period: Duration, seed: u64) -> Self {
        Self {
            amplitude,
            period,
            started: Instant::now(),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SyntheticOrientation {
    fn default() -> Self {
        // ±20° over eight seconds.
        Self::new(PI / 9.0, Duration::from_secs(8), 0x0a11)
    }
}

impl OrientationSensor for SyntheticOrientation {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn read_roll(&mut self) -> Result<f64, OrientationError> {
        let period = self.period.as_secs_f64().max(f64::EPSILON);
        let phase = self.started.elapsed().as_secs_f64() / period * 2.0 * PI;
        let jitter: f64 = self.rng.gen_range(-0.005..0.005);
        Ok(self.amplitude * phase.sin() + jitter)
    }
}

/// Linux IIO accelerometer read through sysfs.
///
/// Roll is the angle of gravity in the screen plane: `atan2(ax, ay)`, zero
/// when the device is held upright.
#[derive(Debug, Clone)]
pub struct IioAccelerometer {
    device_dir: PathBuf,
}

impl IioAccelerometer {
    /// Find the first accelerometer under `/sys/bus/iio/devices`.
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new(IIO_ROOT))
    }

    /// Find the first device under `root` exposing x and y acceleration.
    pub fn discover_in(root: &Path) -> Option<Self> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.join("in_accel_x_raw").exists() && p.join("in_accel_y_raw").exists())
            .collect();
        dirs.sort();
        let device_dir = dirs.into_iter().next()?;
        tracing::info!(device = %device_dir.display(), "found IIO accelerometer");
        Some(Self { device_dir })
    }

    fn read_axis(&self, axis: &str) -> Result<f64, OrientationError> {
        let path = self.device_dir.join(format!("in_accel_{axis}_raw"));
        let raw = std::fs::read_to_string(&path).map_err(|source| OrientationError::Read {
            path: path.display().to_string(),
            source,
        })?;
        raw.trim()
            .parse::<f64>()
            .map_err(|_| OrientationError::Malformed {
                path: path.display().to_string(),
                value: raw.trim().to_string(),
            })
    }
}

impl OrientationSensor for IioAccelerometer {
    fn name(&self) -> &str {
        "iio-accel"
    }

    fn read_roll(&mut self) -> Result<f64, OrientationError> {
        let ax = self.read_axis("x")?;
        let ay = self.read_axis("y")?;
        Ok(roll_from_gravity(ax, ay))
    }
}

/// Roll angle from the in-plane gravity components.
pub fn roll_from_gravity(ax: f64, ay: f64) -> f64 {
    if ax == 0.0 && ay == 0.0 {
        return 0.0;
    }
    ax.atan2(ay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roll_from_gravity() {
        assert_eq!(roll_from_gravity(0.0, 9.8), 0.0);
        assert!((roll_from_gravity(9.8, 9.8) - PI / 4.0).abs() < 1e-12);
        assert!((roll_from_gravity(-9.8, 0.0) + PI / 2.0).abs() < 1e-12);
        assert_eq!(roll_from_gravity(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_synthetic_stays_within_amplitude() {
        let mut sensor = SyntheticOrientation::new(0.3, Duration::from_millis(50), 3);
        for _ in 0..20 {
            let roll = sensor.read_roll().unwrap();
            assert!(roll.abs() <= 0.3 + 0.005);
        }
    }

    #[test]
    fn test_iio_discover_and_read() {
        let root = tempfile::tempdir().unwrap();
        let dev = root.path().join("iio:device0");
        std::fs::create_dir(&dev).unwrap();
        std::fs::write(dev.join("in_accel_x_raw"), "512\n").unwrap();
        std::fs::write(dev.join("in_accel_y_raw"), "512\n").unwrap();
        // Non-accelerometer device is skipped.
        std::fs::create_dir(root.path().join("iio:device1")).unwrap();

        let mut sensor = IioAccelerometer::discover_in(root.path()).unwrap();
        let roll = sensor.read_roll().unwrap();
        assert!((roll - PI / 4.0).abs() < 1e-12);

        std::fs::write(dev.join("in_accel_x_raw"), "garbage").unwrap();
        assert!(matches!(sensor.read_roll(), Err(OrientationError::Malformed { .. })));
    }

    #[test]
    fn test_iio_discover_missing_root() {
        assert!(IioAccelerometer::discover_in(Path::new("/nonexistent/iio")).is_none());
    }
}
