//! Feature interpretation — fixed thresholding of classifier probabilities.

use crate::types::{DetectedFace, FeatureRecord, HeadRotation};

// --- Threshold policy (pinned by tests) ---
/// Both eye-open probabilities must strictly exceed this for `eyes_open`.
const EYE_OPEN_THRESHOLD: f32 = 0.5;
/// The smiling probability must strictly exceed this for `smiling`.
const SMILING_THRESHOLD: f32 = 0.7;

/// Derive a [`FeatureRecord`] from one detected face.
///
/// Pure function of its input. An unavailable probability fails closed: the
/// corresponding boolean is `false`, not "unknown". Pose angles pass through
/// unchanged; the classifier contract guarantees they are always present.
pub fn interpret(face: &DetectedFace) -> FeatureRecord {
    let eyes_open = match (face.left_eye_open, face.right_eye_open) {
        (Some(left), Some(right)) => left > EYE_OPEN_THRESHOLD && right > EYE_OPEN_THRESHOLD,
        _ => false,
    };

    let smiling = face
        .smiling
        .map(|p| p > SMILING_THRESHOLD)
        .unwrap_or(false);

    FeatureRecord {
        face_id: face.tracking_id,
        eyes_open,
        smiling,
        rotation: HeadRotation {
            x: face.euler_x,
            y: face.euler_y,
            z: face.euler_z,
        },
        smile_score: face.smiling,
    }
}
