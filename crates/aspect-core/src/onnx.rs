//! ONNX-Runtime-backed face classifier.
//!
//! Runs a single-stage face attribute model with four output heads:
//! `scores` `[1, N]`, `boxes` `[1, N, 4]` (corner coordinates in letterboxed
//! input pixels), `attrs` `[1, N, 3]` (left-eye-open, right-eye-open and
//! smiling probabilities, negative = unavailable) and `poses` `[1, N, 3]`
//! (pitch/yaw/roll in degrees).

use crate::classifier::{
    ClassifierOptions, DetectionError, FaceClassifier, PerformanceMode,
};
use crate::normalize::NormalizedImage;
use crate::types::{DetectedFace, FaceRect};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ACCURATE_INPUT_SIZE: usize = 416;
const FAST_INPUT_SIZE: usize = 256;
const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;
/// Minimum IoU against a previous-cycle box for a tracking id to carry over.
const TRACKING_IOU_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum ClassifierLoadError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model must expose 4 outputs (scores/boxes/attrs/poses), got {0}")]
    UnexpectedOutputs(usize),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Output tensor indices: (scores, boxes, attrs, poses).
type OutputIndices = (usize, usize, usize, usize);

/// Metadata for coordinate de-mapping after letterbox resize.
struct LetterboxInfo {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// A decoded detection before tracking-id assignment.
#[derive(Debug, Clone)]
struct Candidate {
    // Corner coordinates in image pixel space.
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    attrs: [f32; 3],
    pose: [f32; 3],
}

/// Greedy IoU tracker carrying short-lived face ids across consecutive
/// invocations. Ids are session-scoped and never persisted.
#[derive(Default)]
struct FaceTracker {
    /// Boxes and ids reported by the previous invocation.
    previous: Vec<(i32, FaceRect)>,
    next_id: i32,
}

impl FaceTracker {
    /// Match each rect against the previous invocation's boxes; a match
    /// above [`TRACKING_IOU_THRESHOLD`] carries its id over, everything
    /// else receives a fresh monotonic id.
    fn assign(&mut self, rects: &[FaceRect]) -> Vec<i32> {
        let mut claimed = vec![false; self.previous.len()];
        let mut ids = Vec::with_capacity(rects.len());

        for rect in rects {
            let mut best: Option<(usize, f32)> = None;
            for (i, (_, prev_rect)) in self.previous.iter().enumerate() {
                if claimed[i] {
                    continue;
                }
                let overlap = rect_iou(rect, prev_rect);
                if overlap > TRACKING_IOU_THRESHOLD
                    && best.map(|(_, b)| overlap > b).unwrap_or(true)
                {
                    best = Some((i, overlap));
                }
            }

            let id = match best {
                Some((i, _)) => {
                    claimed[i] = true;
                    self.previous[i].0
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            ids.push(id);
        }

        self.previous = ids.iter().copied().zip(rects.iter().copied()).collect();
        ids
    }
}

/// ONNX face attribute classifier.
///
/// Not reentrant: `detect` takes `&mut self` and callers must serialize
/// invocations (the engine runs every call on its single worker thread).
pub struct OnnxFaceClassifier {
    session: Session,
    options: ClassifierOptions,
    input_size: usize,
    output_indices: OutputIndices,
    tracker: FaceTracker,
}

impl OnnxFaceClassifier {
    /// Load the attribute model from `model_path` with a fixed configuration.
    ///
    /// The options are immutable for the lifetime of the classifier. Fails
    /// fast when the model file is missing or malformed; callers abort
    /// startup on error.
    pub fn load(model_path: &str, options: ClassifierOptions) -> Result<Self, ClassifierLoadError> {
        if !Path::new(model_path).exists() {
            return Err(ClassifierLoadError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            // `with_intra_threads` yields `ort::Error<SessionBuilder>`; erase the
            // phantom context type to `ort::Error<()>` so `?` can convert it into
            // `ClassifierLoadError` (message/behavior preserved).
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?output_names,
            ?options,
            "loaded face attribute model"
        );

        if output_names.len() < 4 {
            return Err(ClassifierLoadError::UnexpectedOutputs(output_names.len()));
        }

        let output_indices = discover_output_indices(&output_names);
        tracing::debug!(?output_indices, "output tensor mapping");

        let input_size = match options.performance_mode {
            PerformanceMode::Accurate => ACCURATE_INPUT_SIZE,
            PerformanceMode::Fast => FAST_INPUT_SIZE,
        };

        Ok(Self {
            session,
            options,
            input_size,
            output_indices,
            tracker: FaceTracker::default(),
        })
    }

    /// Preprocess the upright image into a NCHW float tensor with letterbox
    /// padding, recording the transform for coordinate de-mapping.
    fn preprocess(&self, image: &NormalizedImage) -> (Array4<f32>, LetterboxInfo) {
        let side = self.input_size;
        let (width, height) = (image.width() as f32, image.height() as f32);

        let scale = (side as f32 / width).min(side as f32 / height);
        let new_w = (width * scale).round().max(1.0) as u32;
        let new_h = (height * scale).round().max(1.0) as u32;
        let pad_x = (side as f32 - new_w as f32) / 2.0;
        let pad_y = (side as f32 - new_h as f32) / 2.0;

        let resized = image::imageops::resize(
            image.pixels(),
            new_w,
            new_h,
            image::imageops::FilterType::Triangle,
        );

        let pad_x_start = pad_x.floor() as u32;
        let pad_y_start = pad_y.floor() as u32;

        // Pad with INPUT_MEAN so the margins normalize to 0.0.
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for y in 0..side as u32 {
            for x in 0..side as u32 {
                let pixel = if y >= pad_y_start
                    && y < pad_y_start + new_h
                    && x >= pad_x_start
                    && x < pad_x_start + new_w
                {
                    *resized.get_pixel(x - pad_x_start, y - pad_y_start)
                } else {
                    image::Rgb([INPUT_MEAN as u8; 3])
                };

                for channel in 0..3 {
                    tensor[[0, channel, y as usize, x as usize]] =
                        (pixel.0[channel] as f32 - INPUT_MEAN) / INPUT_STD;
                }
            }
        }

        (tensor, LetterboxInfo { scale, pad_x, pad_y })
    }
}

impl FaceClassifier for OnnxFaceClassifier {
    fn detect(&mut self, image: &NormalizedImage) -> Result<Vec<DetectedFace>, DetectionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectionError::InvalidImage("empty image".into()));
        }

        let (input, letterbox) = self.preprocess(image);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())
                .map_err(|e| DetectionError::Inference(e.to_string()))?])
            .map_err(|e| DetectionError::Inference(e.to_string()))?;

        let (score_idx, box_idx, attr_idx, pose_idx) = self.output_indices;
        let (_, scores) = outputs[score_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("scores: {e}")))?;
        let (_, boxes) = outputs[box_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("boxes: {e}")))?;
        let (_, attrs) = outputs[attr_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("attrs: {e}")))?;
        let (_, poses) = outputs[pose_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectionError::Inference(format!("poses: {e}")))?;

        let candidates = decode_outputs(
            scores,
            boxes,
            attrs,
            poses,
            &letterbox,
            image.width(),
            image.height(),
            CONFIDENCE_THRESHOLD,
        );
        let kept = nms(candidates, NMS_THRESHOLD);

        let min_width = self.options.min_face_size * image.width() as f32;
        let kept: Vec<Candidate> = kept
            .into_iter()
            .filter(|c| c.x2 - c.x1 >= min_width)
            .collect();

        let rects: Vec<FaceRect> = kept
            .iter()
            .map(|c| {
                FaceRect::new(
                    c.x1.floor() as i32,
                    c.y1.floor() as i32,
                    c.x2.ceil() as i32,
                    c.y2.ceil() as i32,
                )
            })
            .collect();

        let ids: Vec<Option<i32>> = if self.options.tracking_enabled {
            self.tracker.assign(&rects).into_iter().map(Some).collect()
        } else {
            vec![None; rects.len()]
        };

        let classify = self.options.classification_enabled;
        let faces: Vec<DetectedFace> = kept
            .iter()
            .zip(rects)
            .zip(ids)
            .map(|((candidate, bounds), tracking_id)| DetectedFace {
                bounds,
                tracking_id,
                left_eye_open: attr_probability(candidate.attrs[0], classify),
                right_eye_open: attr_probability(candidate.attrs[1], classify),
                smiling: attr_probability(candidate.attrs[2], classify),
                euler_x: candidate.pose[0],
                euler_y: candidate.pose[1],
                euler_z: candidate.pose[2],
            })
            .collect();

        tracing::debug!(faces = faces.len(), "classifier invocation complete");
        Ok(faces)
    }
}

/// Interpret one raw attribute value: the model emits a negative sentinel
/// when it could not score the attribute.
fn attr_probability(raw: f32, classification_enabled: bool) -> Option<f32> {
    if !classification_enabled || raw < 0.0 {
        None
    } else {
        Some(raw.clamp(0.0, 1.0))
    }
}

/// Discover output tensor ordering by name, falling back to the standard
/// positional ordering [scores, boxes, attrs, poses].
fn discover_output_indices(names: &[String]) -> OutputIndices {
    let find = |name: &str| names.iter().position(|n| n == name);

    match (find("scores"), find("boxes"), find("attrs"), find("poses")) {
        (Some(s), Some(b), Some(a), Some(p)) => (s, b, a, p),
        _ => {
            tracing::info!(
                ?names,
                "output names not recognized, using positional mapping"
            );
            (0, 1, 2, 3)
        }
    }
}

/// Decode raw output tensors into image-space candidates above the
/// confidence threshold.
#[allow(clippy::too_many_arguments)]
fn decode_outputs(
    scores: &[f32],
    boxes: &[f32],
    attrs: &[f32],
    poses: &[f32],
    letterbox: &LetterboxInfo,
    image_w: u32,
    image_h: u32,
    threshold: f32,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for (idx, &score) in scores.iter().enumerate() {
        if score <= threshold {
            continue;
        }

        let box_off = idx * 4;
        if box_off + 3 >= boxes.len() {
            break;
        }

        // Map from letterboxed input space back to image space.
        let x1 = (boxes[box_off] - letterbox.pad_x) / letterbox.scale;
        let y1 = (boxes[box_off + 1] - letterbox.pad_y) / letterbox.scale;
        let x2 = (boxes[box_off + 2] - letterbox.pad_x) / letterbox.scale;
        let y2 = (boxes[box_off + 3] - letterbox.pad_y) / letterbox.scale;

        let x1 = x1.clamp(0.0, image_w as f32 - 1.0);
        let y1 = y1.clamp(0.0, image_h as f32 - 1.0);
        let x2 = x2.clamp(0.0, image_w as f32);
        let y2 = y2.clamp(0.0, image_h as f32);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let attr_off = idx * 3;
        let pose_off = idx * 3;
        let attr = |i: usize| attrs.get(attr_off + i).copied().unwrap_or(-1.0);
        let pose = |i: usize| poses.get(pose_off + i).copied().unwrap_or(0.0);

        candidates.push(Candidate {
            x1,
            y1,
            x2,
            y2,
            score,
            attrs: [attr(0), attr(1), attr(2)],
            pose: [pose(0), pose(1), pose(2)],
        });
    }

    candidates
}

/// Non-Maximum Suppression over corner-form candidates, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    let mut suppressed = vec![false; candidates.len()];

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(candidates[i].clone());

        for j in (i + 1)..candidates.len() {
            if !suppressed[j] && candidate_iou(&candidates[i], &candidates[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn candidate_iou(a: &Candidate, b: &Candidate) -> f32 {
    iou_corners(a.x1, a.y1, a.x2, a.y2, b.x1, b.y1, b.x2, b.y2)
}

fn rect_iou(a: &FaceRect, b: &FaceRect) -> f32 {
    iou_corners(
        a.left as f32,
        a.top as f32,
        a.right as f32,
        a.bottom as f32,
        b.left as f32,
        b.top as f32,
        b.right as f32,
        b.bottom as f32,
    )
}

/// Intersection-over-Union of two corner-form rectangles.
#[allow(clippy::too_many_arguments)]
fn iou_corners(
    ax1: f32,
    ay1: f32,
    ax2: f32,
    ay2: f32,
    bx1: f32,
    by1: f32,
    bx2: f32,
    by2: f32,
) -> f32 {
    let x1 = ax1.max(bx1);
    let y1 = ay1.max(by1);
    let x2 = ax2.min(bx2);
    let y2 = ay2.min(by2);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = (ax2 - ax1) * (ay2 - ay1) + (bx2 - bx1) * (by2 - by1) - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
