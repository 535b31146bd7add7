use aspect_core::normalize::Rotation;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Path to the face attribute ONNX model.
    pub model_path: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Sensor mounting rotation applied to every captured frame.
    pub sensor_rotation: Rotation,
    /// Preview view dimensions the overlay is mapped into.
    pub view_width: u32,
    pub view_height: u32,
    /// Deadline in seconds for waiting on one capture or detection.
    pub deadline_secs: u64,
}

impl Config {
    /// Load configuration from `ASPECTD_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("aspect");

        let model_path = std::env::var("ASPECTD_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models/faceattr.onnx"));

        let db_path = std::env::var("ASPECTD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("features.db"));

        let sensor_rotation = std::env::var("ASPECTD_SENSOR_ROTATION")
            .ok()
            .and_then(|v| v.parse().ok())
            .and_then(Rotation::from_degrees)
            .unwrap_or(Rotation::Deg0);

        Self {
            camera_device: std::env::var("ASPECTD_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            model_path,
            db_path,
            sensor_rotation,
            view_width: env_u32("ASPECTD_VIEW_WIDTH", 1280),
            view_height: env_u32("ASPECTD_VIEW_HEIGHT", 720),
            deadline_secs: env_u64("ASPECTD_DEADLINE_SECS", 10),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
