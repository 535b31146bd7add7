//! The capture cycle — capture, normalize, classify, interpret, render,
//! persist.
//!
//! Only the first detected face is interpreted and persisted when several
//! are present. This mirrors the single-subject capture flow the app is
//! built around and is a documented policy, not an interpreter limit.

use crate::engine::{EngineError, EngineHandle};
use crate::sink::PreviewSink;
use crate::store::FeatureStore;
use aspect_core::interpret::interpret;
use aspect_core::normalize::{normalize, DecodeError, RawFrame, Rotation};
use aspect_core::overlay::{map_faces, OverlayShape};
use aspect_core::types::FeatureRecord;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Result of one completed capture cycle.
#[derive(Debug, Serialize)]
pub struct CycleOutcome {
    pub generation: u64,
    /// `None` when no face was detected.
    pub record: Option<FeatureRecord>,
    pub shapes: Vec<OverlayShape>,
    pub summary: String,
    /// Assigned row id when the record was persisted.
    pub saved_row_id: Option<i64>,
    /// Persistence failure, reported without disturbing the live cycle.
    pub store_error: Option<String>,
}

/// Owns one end-to-end capture flow: engine in front, sink and store behind.
pub struct Pipeline {
    engine: EngineHandle,
    store: FeatureStore,
    sink: Arc<PreviewSink>,
    sensor_rotation: Rotation,
    view_width: u32,
    view_height: u32,
    deadline: Duration,
    generation: AtomicU64,
}

impl Pipeline {
    pub fn new(
        engine: EngineHandle,
        store: FeatureStore,
        sink: Arc<PreviewSink>,
        sensor_rotation: Rotation,
        view_width: u32,
        view_height: u32,
        deadline: Duration,
    ) -> Self {
        Self {
            engine,
            store,
            sink,
            sensor_rotation,
            view_width,
            view_height,
            deadline,
            generation: AtomicU64::new(0),
        }
    }

    /// Run one capture cycle. Every failure path clears the preview for
    /// this cycle's generation before the error propagates — the overlay
    /// never keeps showing results from an earlier, unrelated cycle.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(generation, "capture cycle started");

        match self.run_inner(generation).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.sink.clear(generation, format!("error: {e}"));
                Err(e)
            }
        }
    }

    async fn run_inner(&self, generation: u64) -> Result<CycleOutcome, CycleError> {
        let frame = self.with_deadline(self.engine.capture()).await?;

        let image = normalize(RawFrame {
            data: frame.data,
            rotation: self.sensor_rotation,
        })?;
        let (image_w, image_h) = (image.width(), image.height());

        let faces = self.with_deadline(self.engine.submit(image)).await?;

        if faces.is_empty() {
            let summary = "No faces detected".to_string();
            self.sink.clear(generation, summary.clone());
            return Ok(CycleOutcome {
                generation,
                record: None,
                shapes: Vec::new(),
                summary,
                saved_row_id: None,
                store_error: None,
            });
        }

        tracing::debug!(generation, faces = faces.len(), "faces detected");

        // First face only; see module docs.
        let record = interpret(&faces[0]);
        let shapes = map_faces(
            &faces[..1],
            image_w,
            image_h,
            self.view_width,
            self.view_height,
        );
        let summary = format_summary(&record);

        self.sink.apply(generation, shapes.clone(), summary.clone());

        let (saved_row_id, store_error) = self.persist(&record).await;

        Ok(CycleOutcome {
            generation,
            record: Some(record),
            shapes,
            summary,
            saved_row_id,
            store_error,
        })
    }

    /// Save off the async context; a store failure is user-visible but must
    /// not disturb the already-rendered cycle.
    async fn persist(&self, record: &FeatureRecord) -> (Option<i64>, Option<String>) {
        let store = self.store.clone();
        let record = record.clone();
        let result = tokio::task::spawn_blocking(move || store.save(&record)).await;

        match result {
            Ok(Ok(id)) => (Some(id), None),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "failed to persist feature record");
                (None, Some(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "store task panicked");
                (None, Some(e.to_string()))
            }
        }
    }

    /// Client-side deadline: stop waiting for the engine without cancelling
    /// the outstanding request (the classifier exposes no cancel; the
    /// worker thread keeps serializing access regardless).
    async fn with_deadline<T>(
        &self,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout),
        }
    }
}

fn format_summary(record: &FeatureRecord) -> String {
    let face_id = record
        .face_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "n/a".to_string());
    format!(
        "Face id: {face_id}\n\
         Eyes open: {}\n\
         Smiling: {}\n\
         Rotation x: {:.1}°\n\
         Rotation y: {:.1}°\n\
         Rotation z: {:.1}°",
        record.eyes_open,
        record.smiling,
        record.rotation.x,
        record.rotation.y,
        record.rotation.z,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use aspect_core::classifier::{DetectionError, FaceClassifier};
    use aspect_core::normalize::NormalizedImage;
    use aspect_core::types::{DetectedFace, FaceRect, HeadRotation};
    use aspect_hw::{CaptureError, CapturedFrame, FrameSource};
    use image::RgbImage;
    use std::io::Cursor;
    use std::sync::mpsc as std_mpsc;

    fn encode_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct StubSource {
        data: Vec<u8>,
    }

    impl FrameSource for StubSource {
        fn capture_raw(&mut self) -> Result<CapturedFrame, CaptureError> {
            Ok(CapturedFrame {
                data: self.data.clone(),
                sequence: 0,
                timestamp: std::time::Instant::now(),
            })
        }
    }

    struct FixedClassifier {
        faces: Vec<DetectedFace>,
    }

    impl FaceClassifier for FixedClassifier {
        fn detect(
            &mut self,
            _image: &NormalizedImage,
        ) -> Result<Vec<DetectedFace>, DetectionError> {
            Ok(self.faces.clone())
        }
    }

    struct FailingClassifier;

    impl FaceClassifier for FailingClassifier {
        fn detect(
            &mut self,
            _image: &NormalizedImage,
        ) -> Result<Vec<DetectedFace>, DetectionError> {
            Err(DetectionError::Inference("synthetic failure".into()))
        }
    }

    /// Reports the dimensions it was handed, then finds nothing.
    struct DimensionSpy {
        seen: std_mpsc::Sender<(u32, u32)>,
    }

    impl FaceClassifier for DimensionSpy {
        fn detect(
            &mut self,
            image: &NormalizedImage,
        ) -> Result<Vec<DetectedFace>, DetectionError> {
            let _ = self.seen.send((image.width(), image.height()));
            Ok(Vec::new())
        }
    }

    fn canonical_face() -> DetectedFace {
        DetectedFace {
            bounds: FaceRect::new(100, 100, 300, 400),
            tracking_id: Some(7),
            left_eye_open: Some(0.9),
            right_eye_open: Some(0.8),
            smiling: Some(0.85),
            euler_x: 5.0,
            euler_y: -10.0,
            euler_z: 2.0,
        }
    }

    fn pipeline_with(
        classifier: Box<dyn FaceClassifier>,
        frame_data: Vec<u8>,
        rotation: Rotation,
    ) -> (tempfile::TempDir, Arc<PreviewSink>, FeatureStore, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let store = FeatureStore::open(&dir.path().join("features.db")).unwrap();
        let sink = Arc::new(PreviewSink::new());
        let engine = spawn_engine(Box::new(StubSource { data: frame_data }), classifier);
        let pipeline = Pipeline::new(
            engine,
            store.clone(),
            sink.clone(),
            rotation,
            640,
            480,
            Duration::from_secs(5),
        );
        (dir, sink, store, pipeline)
    }

    #[tokio::test]
    async fn test_capture_cycle_end_to_end() {
        let (_dir, sink, store, pipeline) = pipeline_with(
            Box::new(FixedClassifier {
                faces: vec![canonical_face()],
            }),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        let outcome = pipeline.run_cycle().await.unwrap();

        let record = outcome.record.unwrap();
        assert_eq!(record.face_id, Some(7));
        assert!(record.eyes_open);
        assert!(record.smiling);
        assert_eq!(
            record.rotation,
            HeadRotation {
                x: 5.0,
                y: -10.0,
                z: 2.0
            }
        );

        // Identity mapping: image and view are both 640×480.
        assert_eq!(outcome.shapes.len(), 1);
        assert_eq!(outcome.shapes[0].left, 100.0);
        assert_eq!(outcome.shapes[0].bottom, 400.0);

        // One row persisted with matching numeric fields and a fresh id.
        let id = outcome.saved_row_id.unwrap();
        let rows = store.load_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].x, 5.0);
        assert_eq!(rows[0].y, -10.0);
        assert_eq!(rows[0].z, 2.0);
        assert!((rows[0].smile_score - 0.85).abs() < 1e-6);

        // The sink reflects this cycle.
        let state = sink.snapshot();
        assert_eq!(state.generation, outcome.generation);
        assert_eq!(state.shapes.len(), 1);
        assert!(state.summary.contains("Face id: 7"));

        // Bulk clear leaves the store empty.
        store.clear_all().unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_detection_clears_overlay_and_saves_nothing() {
        let (_dir, sink, store, pipeline) = pipeline_with(
            Box::new(FixedClassifier { faces: Vec::new() }),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        let outcome = pipeline.run_cycle().await.unwrap();

        assert!(outcome.record.is_none());
        assert!(outcome.shapes.is_empty());
        assert_eq!(outcome.summary, "No faces detected");
        assert!(store.load_all().unwrap().is_empty());

        let state = sink.snapshot();
        assert!(state.shapes.is_empty());
        assert_eq!(state.summary, "No faces detected");
    }

    #[tokio::test]
    async fn test_classifier_failure_clears_sink() {
        let (_dir, sink, store, pipeline) = pipeline_with(
            Box::new(FailingClassifier),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        let err = pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Engine(EngineError::Detection(_))));

        let state = sink.snapshot();
        assert!(state.shapes.is_empty());
        assert!(state.summary.starts_with("error:"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_with_decode_error() {
        let (_dir, sink, _store, pipeline) = pipeline_with(
            Box::new(FixedClassifier {
                faces: vec![canonical_face()],
            }),
            vec![0xde, 0xad, 0xbe, 0xef],
            Rotation::Deg0,
        );

        let err = pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, CycleError::Decode(_)));
        assert!(sink.snapshot().summary.starts_with("error:"));
    }

    #[tokio::test]
    async fn test_sensor_rotation_reaches_the_classifier() {
        let (seen_tx, seen_rx) = std_mpsc::channel();
        let (_dir, _sink, _store, pipeline) = pipeline_with(
            Box::new(DimensionSpy { seen: seen_tx }),
            encode_png(64, 48),
            Rotation::Deg90,
        );

        pipeline.run_cycle().await.unwrap();
        // 90° rotation swaps the captured 64×48 to 48×64.
        assert_eq!(seen_rx.recv().unwrap(), (48, 64));
    }

    #[tokio::test]
    async fn test_only_first_face_is_interpreted_and_rendered() {
        let mut second = canonical_face();
        second.bounds = FaceRect::new(400, 100, 500, 200);
        second.tracking_id = Some(8);

        let (_dir, _sink, store, pipeline) = pipeline_with(
            Box::new(FixedClassifier {
                faces: vec![canonical_face(), second],
            }),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        let outcome = pipeline.run_cycle().await.unwrap();
        assert_eq!(outcome.record.unwrap().face_id, Some(7));
        assert_eq!(outcome.shapes.len(), 1);
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_overlay_applied() {
        let (dir, sink, store, pipeline) = pipeline_with(
            Box::new(FixedClassifier {
                faces: vec![canonical_face()],
            }),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        // Sabotage the database path: replace the file with a directory so
        // per-operation connection opening fails.
        drop(store);
        let db_path = dir.path().join("features.db");
        std::fs::remove_file(&db_path).unwrap();
        std::fs::create_dir(&db_path).unwrap();

        let outcome = pipeline.run_cycle().await.unwrap();
        assert!(outcome.saved_row_id.is_none());
        assert!(outcome.store_error.is_some());

        // The rendered cycle is untouched by the persistence failure.
        let state = sink.snapshot();
        assert_eq!(state.shapes.len(), 1);
        assert!(state.summary.contains("Face id: 7"));
    }

    #[tokio::test]
    async fn test_generation_advances_per_cycle() {
        let (_dir, sink, _store, pipeline) = pipeline_with(
            Box::new(FixedClassifier {
                faces: vec![canonical_face()],
            }),
            encode_png(640, 480),
            Rotation::Deg0,
        );

        let first = pipeline.run_cycle().await.unwrap();
        let second = pipeline.run_cycle().await.unwrap();
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(sink.snapshot().generation, 2);
    }
}
