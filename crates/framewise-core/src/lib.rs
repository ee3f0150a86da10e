//! framewise-core: Composition analysis for live camera frames.
//!
//! Detection results are reduced to a small feature vector (rule-of-thirds
//! offsets, subject weight, horizon level, lead room) and scored into a
//! 0–100 total with a tier. The heuristic scorer is always available; the
//! `onnx` feature adds an SCRFD face detector and a learned scorer.

pub mod detector;
pub mod extractor;
#[cfg(feature = "onnx")]
pub mod face;
#[cfg(feature = "onnx")]
pub mod learned;
pub mod scorer;
pub mod types;

pub use detector::{DetectionBackend, DetectorError, DetectorSet, LumaFrame, ScriptedBackend};
pub use extractor::extract;
pub use scorer::{CompositionScorer, HeuristicScorer, Scorer};
pub use types::{
    BoundingBox, CompositionScore, DetectionResult, FeatureVector, OrientationSample,
    PoseObservation, ScoreSource, Tier,
};
