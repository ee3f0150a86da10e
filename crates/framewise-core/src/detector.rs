//! Detection backends.
//!
//! A [`DetectionBackend`] runs face, pose and saliency detection over one
//! grayscale frame and either produces a complete [`DetectionResult`] or
//! fails for that frame as a whole. [`DetectorSet`] assembles a backend from
//! independent per-kind detectors.

use crate::types::{BoundingBox, DetectionResult, PoseObservation};
use thiserror::Error;

/// Pixels darker than this count toward the dark-frame ratio.
const DARK_PIXEL_LEVEL: u8 = 32;
/// Fraction of dark pixels above which a frame is considered dark.
const DARK_FRAME_RATIO: f32 = 0.95;
/// Luma standard deviation needed before a frame counts as salient.
const DEFAULT_MIN_CONTRAST: f32 = 12.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("invalid frame: expected {expected} luma bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
    #[error("{detector} detector failed: {reason}")]
    Backend {
        detector: &'static str,
        reason: String,
    },
}

/// Borrowed view of an 8-bit grayscale frame.
#[derive(Debug, Clone, Copy)]
pub struct LumaFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

impl<'a> LumaFrame<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            sequence,
        }
    }

    /// Number of pixels the dimensions call for.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Reject frames whose buffer does not cover the stated dimensions.
    pub fn validate(&self) -> Result<(), DetectorError> {
        let expected = self.pixel_count();
        if self.data.len() < expected {
            return Err(DetectorError::InvalidFrame {
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn pixels(&self) -> &'a [u8] {
        &self.data[..self.pixel_count().min(self.data.len())]
    }
}

/// Detector backend trait.
///
/// Implementations must treat the pixel slice as read-only and must not keep
/// it past the `detect` call.
pub trait DetectionBackend: Send {
    fn name(&self) -> &'static str;

    /// Run all detectors over one frame.
    fn detect(&mut self, frame: &LumaFrame<'_>) -> Result<DetectionResult, DetectorError>;
}

pub trait FaceDetector: Send {
    fn detect_faces(&mut self, frame: &LumaFrame<'_>) -> Result<Vec<BoundingBox>, DetectorError>;
}

pub trait PoseDetector: Send {
    fn detect_poses(&mut self, frame: &LumaFrame<'_>)
        -> Result<Vec<PoseObservation>, DetectorError>;
}

pub trait SaliencyDetector: Send {
    /// Whether the frame contains an attention-worthy region.
    fn detect_saliency(&mut self, frame: &LumaFrame<'_>) -> Result<bool, DetectorError>;
}

/// Backend composed of independent face, pose and saliency detectors.
///
/// Missing detectors report nothing. If any present detector fails, the
/// whole frame fails; partial results are never returned.
#[derive(Default)]
pub struct DetectorSet {
    face: Option<Box<dyn FaceDetector>>,
    pose: Option<Box<dyn PoseDetector>>,
    saliency: Option<Box<dyn SaliencyDetector>>,
}

impl DetectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_face(mut self, detector: impl FaceDetector + 'static) -> Self {
        self.face = Some(Box::new(detector));
        self
    }

    pub fn with_pose(mut self, detector: impl PoseDetector + 'static) -> Self {
        self.pose = Some(Box::new(detector));
        self
    }

    pub fn with_saliency(mut self, detector: impl SaliencyDetector + 'static) -> Self {
        self.saliency = Some(Box::new(detector));
        self
    }

    pub fn has_face(&self) -> bool {
        self.face.is_some()
    }
}

impl DetectionBackend for DetectorSet {
    fn name(&self) -> &'static str {
        "detector-set"
    }

    fn detect(&mut self, frame: &LumaFrame<'_>) -> Result<DetectionResult, DetectorError> {
        frame.validate()?;

        let faces = match self.face.as_mut() {
            Some(d) => d.detect_faces(frame)?,
            None => Vec::new(),
        };
        let poses = match self.pose.as_mut() {
            Some(d) => d.detect_poses(frame)?,
            None => Vec::new(),
        };
        let salient = match self.saliency.as_mut() {
            Some(d) => d.detect_saliency(frame)?,
            None => false,
        };

        Ok(DetectionResult {
            frame_sequence: frame.sequence,
            faces,
            poses,
            salient,
        })
    }
}

/// Saliency from global contrast: a frame is salient when it is not dark
/// and its luma standard deviation exceeds a threshold.
#[derive(Debug, Clone, Copy)]
pub struct ContrastSaliency {
    pub min_contrast: f32,
}

impl Default for ContrastSaliency {
    fn default() -> Self {
        Self {
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl SaliencyDetector for ContrastSaliency {
    fn detect_saliency(&mut self, frame: &LumaFrame<'_>) -> Result<bool, DetectorError> {
        let pixels = frame.pixels();
        if is_dark_frame(pixels, DARK_FRAME_RATIO) {
            return Ok(false);
        }
        Ok(luma_contrast(pixels) > self.min_contrast)
    }
}

/// True if more than `threshold_pct` of pixels fall in the darkest bucket.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < DARK_PIXEL_LEVEL).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

/// Standard deviation of luma values.
pub fn luma_contrast(gray: &[u8]) -> f32 {
    if gray.is_empty() {
        return 0.0;
    }
    let n = gray.len() as f32;
    let mean = gray.iter().map(|&b| b as f32).sum::<f32>() / n;
    let variance = gray.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

/// Replays a fixed sequence of outcomes, one per frame, cycling forever.
///
/// `None` entries simulate a backend failure for that frame. Used by tests
/// and the synthetic pipeline.
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    outcomes: Vec<Option<DetectionResult>>,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(outcomes: Vec<Option<DetectionResult>>) -> Self {
        Self {
            outcomes,
            cursor: 0,
        }
    }

    /// Always returns `result`.
    pub fn constant(result: DetectionResult) -> Self {
        Self::new(vec![Some(result)])
    }

    /// Fails on every frame.
    pub fn failing() -> Self {
        Self::new(vec![None])
    }
}

impl DetectionBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &LumaFrame<'_>) -> Result<DetectionResult, DetectorError> {
        if self.outcomes.is_empty() {
            return Ok(DetectionResult {
                frame_sequence: frame.sequence,
                ..Default::default()
            });
        }
        let outcome = self.outcomes[self.cursor % self.outcomes.len()].clone();
        self.cursor = self.cursor.wrapping_add(1);

        match outcome {
            Some(mut result) => {
                result.frame_sequence = frame.sequence;
                Ok(result)
            }
            None => Err(DetectorError::Backend {
                detector: "scripted",
                reason: "scripted failure".into(),
            }),
        }
    }
}
