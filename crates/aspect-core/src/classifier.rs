//! Classifier capability seam.
//!
//! The pipeline consumes face classification through the [`FaceClassifier`]
//! trait; [`crate::onnx::OnnxFaceClassifier`] is the shipped implementation.

use crate::normalize::NormalizedImage;
use crate::types::DetectedFace;
use thiserror::Error;

/// Default minimum face width relative to image width. Faces narrower than
/// this fraction of the image are not reported.
pub const DEFAULT_MIN_FACE_SIZE: f32 = 0.15;

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("invalid input image: {0}")]
    InvalidImage(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Speed/accuracy trade-off for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceMode {
    /// Prioritize accuracy over latency.
    Accurate,
    /// Prioritize latency over accuracy.
    Fast,
}

/// Classifier configuration, fixed once at startup for the process lifetime.
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    pub performance_mode: PerformanceMode,
    /// Minimum face width as a fraction of image width, in (0, 1].
    pub min_face_size: f32,
    /// Assign short-lived tracking ids across consecutive invocations.
    pub tracking_enabled: bool,
    /// Produce eye-open and smiling probabilities.
    pub classification_enabled: bool,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            performance_mode: PerformanceMode::Accurate,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            tracking_enabled: true,
            classification_enabled: true,
        }
    }
}

/// A face classifier: given an upright image, report zero or more faces with
/// bounding rectangles, optional tracking ids, optional per-attribute
/// probabilities, and three pose angles.
///
/// Implementations are not required to be reentrant; callers must serialize
/// invocations (the detection engine runs all calls on one worker thread).
pub trait FaceClassifier: Send {
    fn detect(&mut self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, DetectionError>;
}
