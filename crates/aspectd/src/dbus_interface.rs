use crate::pipeline::Pipeline;
use crate::sink::PreviewSink;
use crate::store::FeatureStore;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the Aspect capture daemon.
///
/// Bus name: org.freedesktop.Aspect1
/// Object path: /org/freedesktop/Aspect1
pub struct AspectService {
    pipeline: Arc<Pipeline>,
    sink: Arc<PreviewSink>,
    store: FeatureStore,
}

impl AspectService {
    pub fn new(pipeline: Arc<Pipeline>, sink: Arc<PreviewSink>, store: FeatureStore) -> Self {
        Self {
            pipeline,
            sink,
            store,
        }
    }
}

#[interface(name = "org.freedesktop.Aspect1")]
impl AspectService {
    /// Run one capture cycle and return its outcome as JSON.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        tracing::info!("capture requested");
        let outcome = self
            .pipeline
            .run_cycle()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        serde_json::to_string(&outcome).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return all persisted feature rows as JSON, newest first.
    async fn records(&self) -> zbus::fdo::Result<String> {
        let store = self.store.clone();
        let rows = tokio::task::spawn_blocking(move || store.load_all())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        serde_json::to_string(&rows).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Delete every persisted feature row. Returns the number deleted.
    async fn clear_records(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("clear_records requested");
        let store = self.store.clone();
        let deleted = tokio::task::spawn_blocking(move || store.clear_all())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        Ok(deleted as u32)
    }

    /// Return daemon status and the current preview state.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = self.sink.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "generation": state.generation,
            "overlay_shapes": state.shapes.len(),
            "summary": state.summary,
        })
        .to_string())
    }
}
