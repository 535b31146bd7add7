use serde::{Deserialize, Serialize};

/// Axis-aligned face bounding rectangle in image pixel space.
///
/// Invariant: `left < right` and `top < bottom`. The classifier is the only
/// producer of these rectangles and upholds the invariant; consumers treat
/// them as read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        debug_assert!(left < right && top < bottom, "degenerate face rect");
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// A single face reported by the classifier.
///
/// Attribute probabilities are `None` when the classifier could not produce
/// them (classification disabled, or the model declined to score the face).
/// Pose angles are always present per the classifier contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bounds: FaceRect,
    /// Short-lived id associating this face across consecutive invocations
    /// within one session. Not a biometric identity; never persisted.
    pub tracking_id: Option<i32>,
    /// Probability in [0, 1] that the left eye is open.
    pub left_eye_open: Option<f32>,
    /// Probability in [0, 1] that the right eye is open.
    pub right_eye_open: Option<f32>,
    /// Probability in [0, 1] that the face is smiling.
    pub smiling: Option<f32>,
    /// Head pitch in degrees (rotation about the X axis).
    pub euler_x: f32,
    /// Head yaw in degrees (rotation about the Y axis).
    pub euler_y: f32,
    /// Head roll in degrees (rotation about the Z axis).
    pub euler_z: f32,
}

/// Head pose Euler angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadRotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Stable feature vector derived from exactly one [`DetectedFace`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Tracking id of the source face; `None` when the classifier assigned
    /// no stable id for this cycle.
    pub face_id: Option<i32>,
    pub eyes_open: bool,
    pub smiling: bool,
    pub rotation: HeadRotation,
    /// Raw smiling probability, carried for persistence. The boolean
    /// judgment above is deliberately not persisted.
    pub smile_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_rect_dimensions() {
        let rect = FaceRect::new(100, 100, 300, 400);
        assert_eq!(rect.width(), 200);
        assert_eq!(rect.height(), 300);
    }

    #[test]
    fn test_face_rect_roundtrips_through_json() {
        let rect = FaceRect::new(-5, 0, 10, 20);
        let json = serde_json::to_string(&rect).unwrap();
        let back: FaceRect = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rect);
    }
}
