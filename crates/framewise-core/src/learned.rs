//! Learned composition scorer via ONNX Runtime.
//!
//! The model takes a `1x5` `f32` tensor laid out as
//! [`FeatureVector::to_array`] and returns at least two values:
//! `[quality, confidence]`, both in [0, 1].

use crate::scorer::{Assessment, Scorer};
use crate::types::{FeatureVector, ScoreSource};
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FEATURE_DIM: usize = 5;

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX-backed scorer with an acceptance threshold on its own confidence.
pub struct OnnxScorer {
    session: Session,
    acceptance: f64,
}

impl OnnxScorer {
    /// Load the scoring model from `model_path`.
    pub fn load(model_path: &str, acceptance: f64) -> Result<Self, ScorerError> {
        if !Path::new(model_path).exists() {
            return Err(ScorerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(1)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            acceptance,
            "loaded composition model"
        );

        Ok(Self {
            session,
            acceptance,
        })
    }

    fn infer(&mut self, features: &FeatureVector) -> Result<Assessment, ScorerError> {
        let input = Self::preprocess(features);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| ScorerError::InferenceFailed(format!("output extraction: {e}")))?;

        match raw {
            [quality, confidence, ..] => Ok(Assessment {
                quality: *quality as f64,
                confidence: *confidence as f64,
            }),
            _ => Err(ScorerError::InferenceFailed(format!(
                "expected [quality, confidence], got {} values",
                raw.len()
            ))),
        }
    }

    fn preprocess(features: &FeatureVector) -> Array2<f32> {
        let values = features.clamped().to_array();
        Array2::from_shape_fn((1, FEATURE_DIM), |(_, i)| values[i])
    }
}

impl Scorer for OnnxScorer {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn source(&self) -> ScoreSource {
        ScoreSource::Learned
    }

    fn assess(&mut self, features: &FeatureVector) -> Option<Assessment> {
        match self.infer(features) {
            Ok(assessment) => Some(assessment),
            Err(e) => {
                tracing::warn!(error = %e, "composition model inference failed");
                None
            }
        }
    }

    fn acceptance_threshold(&self) -> f64 {
        self.acceptance
    }
}
