//! aspect-core — still-image face feature pipeline primitives.
//!
//! Frame normalization, the face classifier seam (with an ONNX Runtime
//! implementation), feature interpretation, and overlay coordinate mapping.
//! Everything here is synchronous; the daemon provides the async seams.

pub mod classifier;
pub mod interpret;
pub mod normalize;
pub mod onnx;
pub mod overlay;
pub mod types;

pub use classifier::{ClassifierOptions, DetectionError, FaceClassifier, PerformanceMode};
pub use interpret::interpret;
pub use normalize::{normalize, DecodeError, NormalizedImage, RawFrame, Rotation};
pub use overlay::{map_faces, OverlayShape, ViewMapping};
pub use types::{DetectedFace, FaceRect, FeatureRecord, HeadRotation};
