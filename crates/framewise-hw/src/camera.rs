//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, FrameBuffer};
use crate::sensor::{FrameRate, FrameSensor, SensorError};
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale.
    Grey,
}

/// Frame sensor backed by a V4L2 capture device.
pub struct V4lSensor {
    device_path: String,
    device: Option<Device>,
    stream: Option<MmapStream<'static>>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lSensor {
    /// Create a sensor for a device path (e.g., "/dev/video0"). The device
    /// is opened by [`FrameSensor::start`].
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
            device: None,
            stream: None,
            width: CAPTURE_WIDTH,
            height: CAPTURE_HEIGHT,
            pixel_format: PixelFormat::Yuyv,
        }
    }

    fn open(&mut self) -> Result<Device, SensorError> {
        if !Path::new(&self.device_path).exists() {
            return Err(SensorError::DeviceNotFound(self.device_path.clone()));
        }

        let device = Device::with_path(&self.device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                SensorError::DeviceBusy
            } else {
                SensorError::DeviceNotFound(format!("{}: {e}", self.device_path))
            }
        })?;

        let caps = device
            .query_caps()
            .map_err(|e| SensorError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(SensorError::CaptureFailed("device cannot capture video".into()));
        }

        tracing::info!(
            device = %self.device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );
        Ok(device)
    }

    fn negotiate_format(&mut self, device: &Device) -> Result<(), SensorError> {
        let mut fmt = device.format().map_err(|e| {
            SensorError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = CAPTURE_WIDTH;
        fmt.height = CAPTURE_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            SensorError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        self.pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(SensorError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };
        self.width = negotiated.width;
        self.height = negotiated.height;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "negotiated format"
        );
        Ok(())
    }

    /// Request `target_fps`; on refusal keep whatever the driver runs at.
    fn negotiate_rate(device: &Device, target_fps: u32) -> FrameRate {
        let requested = target_fps.max(1);
        let granted = device
            .set_params(&Parameters::with_fps(requested))
            .or_else(|e| {
                tracing::warn!(error = %e, requested, "frame rate request refused");
                device.params()
            });

        let actual = match granted {
            Ok(params) if params.interval.numerator > 0 => {
                params.interval.denominator / params.interval.numerator
            }
            Ok(_) => requested,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "could not read stream parameters; assuming requested rate"
                );
                requested
            }
        };

        FrameRate {
            requested,
            actual: actual.max(1),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSensor for V4lSensor {
    fn name(&self) -> &str {
        &self.device_path
    }

    fn start(&mut self, target_fps: u32) -> Result<FrameRate, SensorError> {
        let device = self.open()?;
        self.negotiate_format(&device)?;
        let rate = Self::negotiate_rate(&device, target_fps);

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, STREAM_BUFFERS)
            .map_err(|e| SensorError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        self.stream = Some(stream);
        self.device = Some(device);
        Ok(rate)
    }

    fn next_frame(&mut self) -> Result<FrameBuffer, SensorError> {
        let (width, height, format) = (self.width, self.height, self.pixel_format);
        let stream = self.stream.as_mut().ok_or(SensorError::NotStarted)?;
        let (buf, meta) = stream
            .next()
            .map_err(|e| SensorError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let gray = to_grayscale(buf, format, width, height)?;
        Ok(FrameBuffer::new(gray, width, height, meta.sequence as u64))
    }

    fn stop(&mut self) {
        // Stream first: it holds mapped buffers of the device.
        self.stream = None;
        self.device = None;
    }
}

/// Convert a raw buffer to grayscale based on the negotiated format.
fn to_grayscale(
    buf: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, SensorError> {
    let pixels = width as usize * height as usize;
    match format {
        PixelFormat::Grey => {
            if buf.len() < pixels {
                return Err(SensorError::CaptureFailed(format!(
                    "GREY buffer too short: expected {pixels}, got {}",
                    buf.len()
                )));
            }
            Ok(buf[..pixels].to_vec())
        }
        PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, width, height)
            .map_err(|e| SensorError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grey_conversion_truncates_padding() {
        let buf = vec![9u8; 10];
        let gray = to_grayscale(&buf, PixelFormat::Grey, 2, 4).unwrap();
        assert_eq!(gray.len(), 8);
    }

    #[test]
    fn test_short_grey_buffer_rejected() {
        assert!(to_grayscale(&[1, 2, 3], PixelFormat::Grey, 2, 2).is_err());
    }

    #[test]
    fn test_missing_device_fails_start() {
        let mut sensor = V4lSensor::new("/dev/video-framewise-missing");
        assert!(matches!(sensor.start(60), Err(SensorError::DeviceNotFound(_))));
    }
}
