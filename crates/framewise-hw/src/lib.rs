//! framewise-hw: Hardware abstraction for frame capture and device orientation.
//!
//! Provides the frame-sensor trait with rate negotiation, a synthetic
//! test-pattern sensor, V4L2 capture (feature `v4l2`) and orientation
//! sources including a Linux IIO accelerometer.

#[cfg(feature = "v4l2")]
pub mod camera;
pub mod frame;
pub mod motion;
pub mod sensor;

#[cfg(feature = "v4l2")]
pub use camera::V4lSensor;
pub use frame::{FrameBuffer, FrameOrientation};
pub use motion::{
    FixedOrientation, IioAccelerometer, OrientationError, OrientationSensor, SyntheticOrientation,
};
pub use sensor::{FrameRate, FrameSensor, SensorError, SyntheticConfig, SyntheticSensor};
