use anyhow::{Context, Result};
use aspect_core::classifier::ClassifierOptions;
use aspect_core::onnx::OnnxFaceClassifier;
use aspect_hw::Camera;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod pipeline;
mod sink;
mod store;

use config::Config;
use dbus_interface::AspectService;
use pipeline::Pipeline;
use sink::PreviewSink;
use store::FeatureStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("aspectd starting");

    let config = Config::from_env();

    // Fail-fast startup: classifier, camera and store are acquired before
    // the service goes on the bus. Classifier acquisition failure aborts
    // initialization; nothing else in the system is fatal.
    let classifier = OnnxFaceClassifier::load(
        &config.model_path.to_string_lossy(),
        ClassifierOptions::default(),
    )
    .context("failed to acquire classifier resource")?;

    let camera = Camera::open(&config.camera_device).context("failed to open capture device")?;
    let store = FeatureStore::open(&config.db_path).context("failed to open feature store")?;

    let engine = engine::spawn_engine(Box::new(camera), Box::new(classifier));
    let sink = Arc::new(PreviewSink::new());

    let pipeline = Arc::new(Pipeline::new(
        engine.clone(),
        store.clone(),
        sink.clone(),
        config.sensor_rotation,
        config.view_width,
        config.view_height,
        Duration::from_secs(config.deadline_secs),
    ));

    let _conn = zbus::connection::Builder::session()?
        .name("org.freedesktop.Aspect1")?
        .serve_at(
            "/org/freedesktop/Aspect1",
            AspectService::new(pipeline, sink, store),
        )?
        .build()
        .await
        .context("failed to register on the session bus")?;

    tracing::info!("aspectd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("aspectd shutting down");

    engine.shutdown().await;

    Ok(())
}
