//! Composition feature extraction.
//!
//! Turns one [`DetectionResult`] plus the orientation sample current at that
//! instant into a [`FeatureVector`]. Extraction never fails: every missing
//! input falls back to a neutral default.

use crate::types::{unit, DetectionResult, FeatureVector, OrientationSample};
use std::f64::consts::PI;

/// Canonical third-lines on each axis.
const THIRD_LINES: [f64; 2] = [1.0 / 3.0, 2.0 / 3.0];

/// Roll beyond which the horizon earns no credit (30 degrees).
const HORIZON_TOLERANCE: f64 = PI / 6.0;

/// Subject centroid used when nothing was detected.
const DEFAULT_CENTROID: (f64, f64) = (0.5, 0.5);

const WEIGHT_FACE: f64 = 0.8;
const WEIGHT_POSE: f64 = 0.7;
const WEIGHT_SALIENT: f64 = 0.5;
const WEIGHT_NONE: f64 = 0.2;

/// Derive a feature vector from a detection result and the current roll.
pub fn extract(detection: &DetectionResult, orientation: OrientationSample) -> FeatureVector {
    let (cx, cy) = subject_centroid(detection);

    FeatureVector {
        thirds_offset_x: thirds_offset(cx),
        thirds_offset_y: thirds_offset(cy),
        subject_weight: subject_weight(detection),
        horizon_level: horizon_level(orientation.roll),
        lead_room: lead_room(cx),
    }
    .clamped()
}

/// Subject centroid in up-normalized coordinates.
///
/// Priority: first face center, then the first pose's torso landmark,
/// otherwise the frame center. Detector y is inverted.
pub fn subject_centroid(detection: &DetectionResult) -> (f64, f64) {
    if let Some(face) = detection.faces.first() {
        let (x, y) = face.center();
        return (x, 1.0 - y);
    }
    if let Some((x, y)) = detection.poses.first().and_then(|p| p.torso()) {
        return (x, 1.0 - y);
    }
    DEFAULT_CENTROID
}

/// Distance from `coord` to the nearer of the two third-lines.
pub fn thirds_offset(coord: f64) -> f64 {
    THIRD_LINES
        .iter()
        .map(|line| (coord - line).abs())
        .fold(f64::INFINITY, f64::min)
}

/// Strict priority: face, pose, saliency, nothing.
pub fn subject_weight(detection: &DetectionResult) -> f64 {
    if !detection.faces.is_empty() {
        WEIGHT_FACE
    } else if !detection.poses.is_empty() {
        WEIGHT_POSE
    } else if detection.salient {
        WEIGHT_SALIENT
    } else {
        WEIGHT_NONE
    }
}

/// Favor space on the side the subject is not occupying.
pub fn lead_room(cx: f64) -> f64 {
    if cx < 0.5 {
        1.0 - cx
    } else {
        cx
    }
}

/// Full credit when level, decaying linearly to zero at ±30°.
pub fn horizon_level(roll: f64) -> f64 {
    unit(1.0 - (roll.abs() / HORIZON_TOLERANCE).min(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, Keypoint, Landmark, PoseObservation};
    use proptest::prelude::*;

    fn face_at(cx: f64, cy: f64) -> DetectionResult {
        DetectionResult {
            faces: vec![BoundingBox::centered(cx, cy, 0.2, 0.2)],
            ..Default::default()
        }
    }

    fn pose_with_torso(x: f64, y: f64) -> PoseObservation {
        PoseObservation {
            keypoints: vec![Keypoint::new(Landmark::Torso, x, y, 0.9)],
        }
    }

    #[test]
    fn test_face_centroid_is_y_inverted() {
        let (cx, cy) = subject_centroid(&face_at(0.33, 0.33));
        assert!((cx - 0.33).abs() < 1e-9);
        assert!((cy - 0.67).abs() < 1e-9);
    }

    #[test]
    fn test_face_takes_priority_over_pose() {
        let mut det = face_at(0.2, 0.8);
        det.poses.push(pose_with_torso(0.9, 0.1));
        let (cx, cy) = subject_centroid(&det);
        assert!((cx - 0.2).abs() < 1e-9);
        assert!((cy - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_pose_torso_centroid() {
        let det = DetectionResult {
            poses: vec![pose_with_torso(0.7, 0.25)],
            ..Default::default()
        };
        assert_eq!(subject_centroid(&det), (0.7, 0.75));
    }

    #[test]
    fn test_pose_without_torso_keeps_default() {
        let det = DetectionResult {
            poses: vec![PoseObservation {
                keypoints: vec![Keypoint::new(Landmark::Head, 0.1, 0.1, 1.0)],
            }],
            ..Default::default()
        };
        assert_eq!(subject_centroid(&det), (0.5, 0.5));
        // Pose still counts toward subject weight.
        assert_eq!(subject_weight(&det), WEIGHT_POSE);
    }

    #[test]
    fn test_thirds_offset_nearest_line() {
        assert!(thirds_offset(1.0 / 3.0).abs() < 1e-12);
        assert!(thirds_offset(2.0 / 3.0).abs() < 1e-12);
        assert!((thirds_offset(0.5) - 1.0 / 6.0).abs() < 1e-12);
        assert!((thirds_offset(0.0) - 1.0 / 3.0).abs() < 1e-12);
        assert!((thirds_offset(1.0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_subject_weight_priority() {
        let mut det = DetectionResult::default();
        assert_eq!(subject_weight(&det), 0.2);
        det.salient = true;
        assert_eq!(subject_weight(&det), 0.5);
        det.poses.push(PoseObservation::default());
        assert_eq!(subject_weight(&det), 0.7);
        det.faces.push(BoundingBox::centered(0.5, 0.5, 0.1, 0.1));
        assert_eq!(subject_weight(&det), 0.8);
    }

    #[test]
    fn test_lead_room() {
        assert!((lead_room(0.2) - 0.8).abs() < 1e-12);
        assert_eq!(lead_room(0.5), 0.5);
        assert_eq!(lead_room(0.9), 0.9);
    }

    #[test]
    fn test_horizon_level_anchors() {
        assert_eq!(horizon_level(0.0), 1.0);
        assert_eq!(horizon_level(PI / 6.0), 0.0);
        assert_eq!(horizon_level(-PI / 3.0), 0.0);
        assert!((horizon_level(PI / 12.0) - 0.5).abs() < 1e-12);
        assert_eq!(horizon_level(f64::NAN), 0.0);
    }

    #[test]
    fn test_extract_face_near_thirds() {
        let f = extract(&face_at(0.33, 0.33), OrientationSample::LEVEL);
        assert!(f.thirds_offset_x < 0.01);
        assert!(f.thirds_offset_y < 0.01);
        assert_eq!(f.subject_weight, 0.8);
        assert_eq!(f.horizon_level, 1.0);
        assert!((f.lead_room - 0.67).abs() < 1e-9);
    }

    #[test]
    fn test_extract_empty_tilted() {
        let f = extract(&DetectionResult::default(), OrientationSample::new(PI / 3.0));
        assert!((f.thirds_offset_x - 1.0 / 6.0).abs() < 1e-12);
        assert!((f.thirds_offset_y - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(f.subject_weight, 0.2);
        assert_eq!(f.horizon_level, 0.0);
        assert_eq!(f.lead_room, 0.5);
    }

    #[test]
    fn test_extract_clamps_out_of_frame_face() {
        let f = extract(&face_at(1.4, -0.3), OrientationSample::LEVEL);
        for v in f.to_array() {
            assert!((0.0..=1.0).contains(&v), "component {v} out of range");
        }
    }

    proptest! {
        #[test]
        fn prop_horizon_zero_beyond_tolerance(
            roll in HORIZON_TOLERANCE..10.0f64,
            negate in any::<bool>(),
        ) {
            let roll = if negate { -roll } else { roll };
            prop_assert_eq!(horizon_level(roll), 0.0);
        }

        #[test]
        fn prop_horizon_non_increasing(a in 0.0..HORIZON_TOLERANCE, b in 0.0..HORIZON_TOLERANCE) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(horizon_level(lo) >= horizon_level(hi));
            prop_assert_eq!(horizon_level(hi), horizon_level(-hi));
        }

        #[test]
        fn prop_extract_components_in_unit_range(
            cx in -2.0..3.0f64,
            cy in -2.0..3.0f64,
            roll in -10.0..10.0f64,
        ) {
            let f = extract(&face_at(cx, cy), OrientationSample::new(roll));
            for v in f.to_array() {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
