use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aspect", about = "Aspect face-feature capture CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture a still image and classify the face in it
    Capture,
    /// List saved feature records, newest first
    Records,
    /// Delete all saved feature records
    Clear,
    /// Show daemon status and the current preview state
    Status,
    /// Run capture-device diagnostics (bypasses the daemon)
    Test,
}

// `#[zbus::proxy]` generates `AspectProxy` for the daemon interface.
#[zbus::proxy(
    interface = "org.freedesktop.Aspect1",
    default_service = "org.freedesktop.Aspect1",
    default_path = "/org/freedesktop/Aspect1"
)]
trait Aspect {
    async fn capture(&self) -> zbus::Result<String>;
    async fn records(&self) -> zbus::Result<String>;
    async fn clear_records(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Test = cli.command {
        return run_diagnostics();
    }

    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus — is aspectd running?")?;
    let proxy = AspectProxy::new(&conn).await?;

    match cli.command {
        Commands::Capture => {
            let outcome = proxy.capture().await?;
            let parsed: serde_json::Value = serde_json::from_str(&outcome)?;
            match parsed.get("summary").and_then(|s| s.as_str()) {
                Some(summary) => println!("{summary}"),
                None => println!("{outcome}"),
            }
            if let Some(id) = parsed.get("saved_row_id").and_then(|v| v.as_i64()) {
                println!("Saved as record {id}");
            }
            if let Some(err) = parsed.get("store_error").and_then(|v| v.as_str()) {
                eprintln!("Warning: record not saved: {err}");
            }
        }
        Commands::Records => {
            let records = proxy.records().await?;
            let rows: Vec<serde_json::Value> = serde_json::from_str(&records)?;
            if rows.is_empty() {
                println!("No saved feature records");
            }
            for row in rows {
                println!(
                    "id {}: x {:.1}°, y {:.1}°, z {:.1}°, smile {:.2}",
                    row["id"],
                    row["x"].as_f64().unwrap_or(0.0),
                    row["y"].as_f64().unwrap_or(0.0),
                    row["z"].as_f64().unwrap_or(0.0),
                    row["smile_score"].as_f64().unwrap_or(0.0),
                );
            }
        }
        Commands::Clear => {
            let deleted = proxy.clear_records().await?;
            println!("Deleted {deleted} record(s)");
        }
        Commands::Status => {
            println!("{}", proxy.status().await?);
        }
        Commands::Test => unreachable!("handled above"),
    }

    Ok(())
}

/// Enumerate capture devices directly, without the daemon.
fn run_diagnostics() -> Result<()> {
    let devices = aspect_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No video capture devices found");
        return Ok(());
    }
    for dev in devices {
        println!("{}: {} ({}, bus {})", dev.path, dev.name, dev.driver, dev.bus);
    }
    Ok(())
}
