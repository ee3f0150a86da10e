use serde::{Deserialize, Serialize};
use std::fmt;

/// Bounding box of a detected face.
///
/// Coordinates are normalized to [0, 1] in detector space; extraction
/// inverts the y axis when it derives the subject centroid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f32,
}

impl BoundingBox {
    /// Center point of the box, in the same space as the box itself.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Build a box of the given size centred on `(cx, cy)`.
    pub fn centered(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
            confidence: 1.0,
        }
    }
}

/// Body landmark identifiers reported by pose backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Landmark {
    Head,
    Neck,
    Torso,
    LeftShoulder,
    RightShoulder,
    LeftHip,
    RightHip,
}

/// A single recognized body point, normalized to [0, 1] in detector space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub landmark: Landmark,
    pub x: f64,
    pub y: f64,
    pub confidence: f32,
}

impl Keypoint {
    pub fn new(landmark: Landmark, x: f64, y: f64, confidence: f32) -> Self {
        Self {
            landmark,
            x,
            y,
            confidence,
        }
    }
}

/// One detected body pose.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseObservation {
    pub keypoints: Vec<Keypoint>,
}

impl PoseObservation {
    /// Location of the torso landmark, if the backend recognized one.
    pub fn torso(&self) -> Option<(f64, f64)> {
        self.keypoints
            .iter()
            .find(|k| k.landmark == Landmark::Torso)
            .map(|k| (k.x, k.y))
    }
}

/// Output of one detection pass over a sampled frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Sequence number of the frame this result was produced from.
    pub frame_sequence: u64,
    pub faces: Vec<BoundingBox>,
    pub poses: Vec<PoseObservation>,
    /// Whether the saliency detector found an attention-worthy region.
    pub salient: bool,
}

impl DetectionResult {
    /// True when no detector found anything.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty() && self.poses.is_empty() && !self.salient
    }
}

/// Latest device roll angle in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub roll: f64,
}

impl OrientationSample {
    pub const LEVEL: Self = Self { roll: 0.0 };

    pub fn new(roll: f64) -> Self {
        Self { roll }
    }
}

/// Composition features derived from one detection result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Distance from the centroid x to the nearer third-line.
    pub thirds_offset_x: f64,
    /// Distance from the centroid y to the nearer third-line.
    pub thirds_offset_y: f64,
    pub subject_weight: f64,
    pub horizon_level: f64,
    pub lead_room: f64,
}

impl FeatureVector {
    /// All components at the same value; handy for boundary checks.
    pub fn uniform(value: f64) -> Self {
        Self {
            thirds_offset_x: value,
            thirds_offset_y: value,
            subject_weight: value,
            horizon_level: value,
            lead_room: value,
        }
    }

    /// Copy with every component clamped to [0, 1]. NaN becomes 0.
    pub fn clamped(&self) -> Self {
        Self {
            thirds_offset_x: unit(self.thirds_offset_x),
            thirds_offset_y: unit(self.thirds_offset_y),
            subject_weight: unit(self.subject_weight),
            horizon_level: unit(self.horizon_level),
            lead_room: unit(self.lead_room),
        }
    }

    /// Flat `f32` layout used by learned scorers:
    /// `[offset_x, offset_y, subject_weight, horizon_level, lead_room]`.
    pub fn to_array(&self) -> [f32; 5] {
        [
            self.thirds_offset_x as f32,
            self.thirds_offset_y as f32,
            self.subject_weight as f32,
            self.horizon_level as f32,
            self.lead_room as f32,
        ]
    }
}

/// Clamp to [0, 1], mapping NaN to 0.
pub fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Coarse quality bucket derived from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Tier {
    /// Map a total score to its tier.
    ///
    /// `[85, 100]` excellent, `[70, 85)` good, `[50, 70)` fair, otherwise poor.
    pub fn from_total(total: u8) -> Self {
        match total {
            85..=u8::MAX => Tier::Excellent,
            70..=84 => Tier::Good,
            50..=69 => Tier::Fair,
            _ => Tier::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Poor => "poor",
            Tier::Fair => "fair",
            Tier::Good => "good",
            Tier::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which scorer produced a [`CompositionScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Heuristic,
    Learned,
}

/// Final composition assessment published to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositionScore {
    /// Overall score in [0, 100].
    pub total: u8,
    pub rule_of_thirds: u8,
    pub subject_weight: u8,
    pub horizon_level: u8,
    pub lead_room: u8,
    /// Never below [`crate::scorer::CONFIDENCE_FLOOR`].
    pub confidence: f64,
    pub tier: Tier,
    pub source: ScoreSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(Tier::from_total(100), Tier::Excellent);
        assert_eq!(Tier::from_total(85), Tier::Excellent);
        assert_eq!(Tier::from_total(84), Tier::Good);
        assert_eq!(Tier::from_total(70), Tier::Good);
        assert_eq!(Tier::from_total(69), Tier::Fair);
        assert_eq!(Tier::from_total(50), Tier::Fair);
        assert_eq!(Tier::from_total(49), Tier::Poor);
        assert_eq!(Tier::from_total(0), Tier::Poor);
    }

    #[test]
    fn test_tier_is_pure() {
        for total in 0..=100u8 {
            assert_eq!(Tier::from_total(total), Tier::from_total(total));
        }
    }

    #[test]
    fn test_clamped_handles_out_of_range_and_nan() {
        let f = FeatureVector {
            thirds_offset_x: -0.5,
            thirds_offset_y: 1.7,
            subject_weight: f64::NAN,
            horizon_level: 0.25,
            lead_room: f64::INFINITY,
        }
        .clamped();
        assert_eq!(f.thirds_offset_x, 0.0);
        assert_eq!(f.thirds_offset_y, 1.0);
        assert_eq!(f.subject_weight, 0.0);
        assert_eq!(f.horizon_level, 0.25);
        assert_eq!(f.lead_room, 1.0);
    }

    #[test]
    fn test_pose_torso_lookup() {
        let pose = PoseObservation {
            keypoints: vec![
                Keypoint::new(Landmark::Head, 0.5, 0.9, 0.9),
                Keypoint::new(Landmark::Torso, 0.4, 0.6, 0.8),
            ],
        };
        assert_eq!(pose.torso(), Some((0.4, 0.6)));
        assert_eq!(PoseObservation::default().torso(), None);
    }

    #[test]
    fn test_bounding_box_center() {
        let b = BoundingBox::centered(0.33, 0.33, 0.2, 0.3);
        let (cx, cy) = b.center();
        assert!((cx - 0.33).abs() < 1e-12);
        assert!((cy - 0.33).abs() < 1e-12);
    }

    #[test]
    fn test_score_serializes_tier_lowercase() {
        let score = CompositionScore {
            total: 90,
            rule_of_thirds: 99,
            subject_weight: 80,
            horizon_level: 100,
            lead_room: 67,
            confidence: 0.7,
            tier: Tier::Excellent,
            source: ScoreSource::Heuristic,
        };
        let json = serde_json::to_value(score).unwrap();
        assert_eq!(json["tier"], "excellent");
        assert_eq!(json["source"], "heuristic");
    }
}
