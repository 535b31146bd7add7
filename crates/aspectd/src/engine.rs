//! Detection engine — owns the capture device and the classifier on one
//! dedicated worker thread.
//!
//! The worker serializes all hardware and classifier access: the classifier
//! is not reentrant-safe, so every invocation flows through the single
//! request channel. Detection submissions are additionally gated to one in
//! flight; a submission arriving while another is unresolved is rejected
//! with [`EngineError::Busy`] rather than queued — a queued stale still has
//! no value once the preview has moved on, and rejecting keeps the
//! latest-cycle-wins rendering invariant trivial.

use aspect_core::classifier::{DetectionError, FaceClassifier};
use aspect_core::normalize::NormalizedImage;
use aspect_core::types::DetectedFace;
use aspect_hw::{CaptureError, CapturedFrame, FrameSource};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Semaphore};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),
    #[error("a detection request is already in flight")]
    Busy,
    #[error("timed out waiting for the engine")]
    Timeout,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from async callers to the engine thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<CapturedFrame, EngineError>>,
    },
    Detect {
        image: NormalizedImage,
        reply: oneshot::Sender<Result<Vec<DetectedFace>, EngineError>>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    /// One permit: the single-flight gate for detection submissions.
    detect_gate: Arc<Semaphore>,
}

impl EngineHandle {
    /// Trigger one still capture on the worker.
    pub async fn capture(&self) -> Result<CapturedFrame, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Submit one normalized image for classification.
    ///
    /// At most one submission may be unresolved at a time; a second
    /// concurrent call fails fast with [`EngineError::Busy`] and leaves the
    /// in-flight request untouched. The result is delivered exactly once,
    /// to this call only. The image is dropped as soon as inference
    /// completes.
    pub async fn submit(&self, image: NormalizedImage) -> Result<Vec<DetectedFace>, EngineError> {
        let _permit = self
            .detect_gate
            .try_acquire()
            .map_err(|_| EngineError::Busy)?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Ask the worker to drain and exit, releasing the classifier and the
    /// capture device. Idempotent; safe to call with requests in flight.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineRequest::Shutdown).await;
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The caller constructs and owns the hardware and classifier resources
/// up front (fail-fast startup) and transfers them to the worker; they are
/// dropped exactly once, when the worker exits.
pub fn spawn_engine(
    mut source: Box<dyn FrameSource>,
    mut classifier: Box<dyn FaceClassifier>,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("aspect-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { reply } => {
                        let result = source.capture_raw().map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Detect { image, reply } => {
                        let result = classifier.detect(&image).map_err(EngineError::from);
                        // The image buffer dies here, before the next
                        // request is dequeued.
                        drop(image);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Shutdown => break,
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle {
        tx,
        detect_gate: Arc::new(Semaphore::new(1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aspect_core::types::FaceRect;
    use image::RgbImage;
    use std::sync::mpsc as std_mpsc;

    fn test_image() -> NormalizedImage {
        NormalizedImage::new(RgbImage::new(64, 48))
    }

    fn test_face() -> DetectedFace {
        DetectedFace {
            bounds: FaceRect::new(10, 10, 40, 40),
            tracking_id: Some(1),
            left_eye_open: Some(0.9),
            right_eye_open: Some(0.9),
            smiling: Some(0.2),
            euler_x: 0.0,
            euler_y: 0.0,
            euler_z: 0.0,
        }
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

    /// Classifier that blocks inside `detect` until released, signalling
    /// entry so tests can establish the in-flight state deterministically.
    struct BlockingClassifier {
        started: mpsc::Sender<()>,
        release: std_mpsc::Receiver<()>,
    }

    impl FaceClassifier for BlockingClassifier {
        fn detect(
            &mut self,
            _image: &NormalizedImage,
        ) -> Result<Vec<DetectedFace>, DetectionError> {
            let _ = self.started.blocking_send(());
            let _ = self.release.recv();
            Ok(vec![test_face()])
        }
    }

    struct InstantClassifier;

    impl FaceClassifier for InstantClassifier {
        fn detect(
            &mut self,
            _image: &NormalizedImage,
        ) -> Result<Vec<DetectedFace>, DetectionError> {
            Ok(vec![test_face()])
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

    #[tokio::test]
    async fn test_submit_resolves_with_faces() {
        let engine = spawn_engine(
            Box::new(StubSource { data: vec![1] }),
            Box::new(InstantClassifier),
        );
        let faces = engine.submit(test_image()).await.unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].tracking_id, Some(1));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_classifier_failure_propagates() {
        let engine = spawn_engine(
            Box::new(StubSource { data: vec![1] }),
            Box::new(FailingClassifier),
        );
        let err = engine.submit(test_image()).await.unwrap_err();
        assert!(matches!(err, EngineError::Detection(_)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_capture_returns_source_bytes() {
        let engine = spawn_engine(
            Box::new(StubSource {
                data: vec![9, 9, 9],
            }),
            Box::new(InstantClassifier),
        );
        let frame = engine.capture().await.unwrap();
        assert_eq!(frame.data, vec![9, 9, 9]);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_submission_rejected_while_first_in_flight() {
        // Repeated trials: the reject policy must be deterministic.
        for _ in 0..3 {
            let (started_tx, mut started_rx) = mpsc::channel(1);
            let (release_tx, release_rx) = std_mpsc::channel();
            let engine = spawn_engine(
                Box::new(StubSource { data: vec![1] }),
                Box::new(BlockingClassifier {
                    started: started_tx,
                    release: release_rx,
                }),
            );

            let first = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.submit(test_image()).await })
            };

            // Wait until the first submission is demonstrably in flight.
            started_rx.recv().await.unwrap();

            let second = engine.submit(test_image()).await;
            assert!(matches!(second, Err(EngineError::Busy)));

            // The rejected call must not have disturbed the first one.
            release_tx.send(()).unwrap();
            let faces = first.await.unwrap().unwrap();
            assert_eq!(faces.len(), 1);

            engine.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_submission_allowed_after_previous_resolves() {
        let engine = spawn_engine(
            Box::new(StubSource { data: vec![1] }),
            Box::new(InstantClassifier),
        );
        for _ in 0..3 {
            assert!(engine.submit(test_image()).await.is_ok());
        }
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails_with_channel_closed() {
        let engine = spawn_engine(
            Box::new(StubSource { data: vec![1] }),
            Box::new(InstantClassifier),
        );
        engine.shutdown().await;
        // Give the worker a moment to drain and drop the receiver.
        tokio::task::yield_now().await;
        let err = engine.submit(test_image()).await.unwrap_err();
        assert!(matches!(err, EngineError::ChannelClosed));
    }
}
