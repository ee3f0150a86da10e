//! Frame buffer type and pixel format conversion.

use std::time::Instant;

/// How the sensor image is rotated relative to the device's natural
/// orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameOrientation {
    #[default]
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// A captured grayscale camera frame.
///
/// Owned by the capture stage until handed to detection; nothing keeps it
/// past that hand-off.
pub struct FrameBuffer {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic capture time.
    pub timestamp: Instant,
    pub sequence: u64,
    pub orientation: FrameOrientation,
}

impl FrameBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
            orientation: FrameOrientation::default(),
        }
    }

    pub fn with_orientation(mut self, orientation: FrameOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Time elapsed since capture.
    pub fn age(&self) -> std::time::Duration {
        self.timestamp.elapsed()
    }
}

impl std::fmt::Debug for FrameBuffer {
    // Pixel contents stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("orientation", &self.orientation)
            .finish_non_exhaustive()
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
