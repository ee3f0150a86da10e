//! Composition scoring.
//!
//! A [`Scorer`] turns a feature vector into a quality estimate plus its own
//! confidence. [`CompositionScorer`] wraps an optional learned scorer with the
//! deterministic heuristic as fallback and assembles the published
//! [`CompositionScore`].

use crate::types::{unit, CompositionScore, FeatureVector, ScoreSource, Tier};

/// Published confidence is never below this value.
pub const CONFIDENCE_FLOOR: f64 = 0.6;

/// Fixed confidence reported by the heuristic scorer.
pub const HEURISTIC_CONFIDENCE: f64 = 0.7;

/// Raw output of a scorer before tiering and flooring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    /// Overall quality in [0, 1].
    pub quality: f64,
    pub confidence: f64,
}

/// Strategy for estimating composition quality from a feature vector.
pub trait Scorer: Send {
    fn name(&self) -> &'static str;

    fn source(&self) -> ScoreSource;

    /// Estimate quality. `None` means the scorer could not produce a result
    /// for this input and the caller should fall back.
    fn assess(&mut self, features: &FeatureVector) -> Option<Assessment>;

    /// Assessments with confidence below this value are rejected.
    fn acceptance_threshold(&self) -> f64 {
        0.0
    }
}

/// Deterministic rule-based scorer. Always produces an assessment.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl HeuristicScorer {
    pub fn evaluate(&self, features: &FeatureVector) -> Assessment {
        let f = features.clamped();
        let terms = [
            thirds_quality(&f),
            f.subject_weight,
            f.horizon_level,
            f.lead_room,
        ];
        let quality = terms.iter().sum::<f64>() / terms.len() as f64;
        Assessment {
            quality: unit(quality),
            confidence: HEURISTIC_CONFIDENCE,
        }
    }
}

impl Scorer for HeuristicScorer {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn source(&self) -> ScoreSource {
        ScoreSource::Heuristic
    }

    fn assess(&mut self, features: &FeatureVector) -> Option<Assessment> {
        Some(self.evaluate(features))
    }
}

/// Rule-of-thirds quality: `1 - min(1, offset_x + offset_y)`.
///
/// The axis offsets are summed before inverting, so diagonal misalignment is
/// penalized on both axes at once.
pub fn thirds_quality(features: &FeatureVector) -> f64 {
    let x = unit(features.thirds_offset_x);
    let y = unit(features.thirds_offset_y);
    unit(1.0 - (x + y).min(1.0))
}

/// Convert a [0, 1] value to a rounded percentage.
pub fn percent(value: f64) -> u8 {
    (unit(value) * 100.0).round().clamp(0.0, 100.0) as u8
}

/// Front door of the scoring stage.
pub struct CompositionScorer {
    learned: Option<Box<dyn Scorer>>,
    heuristic: HeuristicScorer,
}

impl Default for CompositionScorer {
    fn default() -> Self {
        Self::heuristic()
    }
}

impl CompositionScorer {
    /// Scorer that only uses the heuristic path.
    pub fn heuristic() -> Self {
        Self {
            learned: None,
            heuristic: HeuristicScorer,
        }
    }

    /// Prefer `learned`, falling back to the heuristic when it declines
    /// or reports confidence below its acceptance threshold.
    pub fn with_learned(learned: Box<dyn Scorer>) -> Self {
        tracing::info!(scorer = learned.name(), "learned scorer installed");
        Self {
            learned: Some(learned),
            heuristic: HeuristicScorer,
        }
    }

    pub fn has_learned(&self) -> bool {
        self.learned.is_some()
    }

    /// Score one feature vector.
    pub fn score(&mut self, features: &FeatureVector) -> CompositionScore {
        let features = features.clamped();
        let (assessment, source) = self
            .assess_learned(&features)
            .unwrap_or_else(|| (self.heuristic.evaluate(&features), ScoreSource::Heuristic));

        let total = percent(assessment.quality);
        CompositionScore {
            total,
            rule_of_thirds: percent(thirds_quality(&features)),
            subject_weight: percent(features.subject_weight),
            horizon_level: percent(features.horizon_level),
            lead_room: percent(features.lead_room),
            confidence: floor_confidence(assessment.confidence),
            tier: Tier::from_total(total),
            source,
        }
    }

    fn assess_learned(&mut self, features: &FeatureVector) -> Option<(Assessment, ScoreSource)> {
        let scorer = self.learned.as_mut()?;
        let Some(assessment) = scorer.assess(features) else {
            tracing::debug!(scorer = scorer.name(), "learned scorer declined; using heuristic");
            return None;
        };
        let accepted = assessment.quality.is_finite()
            && assessment.confidence >= scorer.acceptance_threshold();
        if !accepted {
            tracing::debug!(
                scorer = scorer.name(),
                confidence = assessment.confidence,
                threshold = scorer.acceptance_threshold(),
                "learned assessment rejected; using heuristic"
            );
            return None;
        }
        Some((assessment, scorer.source()))
    }
}

/// Apply the confidence floor. NaN maps to the floor.
pub fn floor_confidence(confidence: f64) -> f64 {
    confidence.max(CONFIDENCE_FLOOR)
}
