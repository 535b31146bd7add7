//! Feature record store — SQLite adapter for persisted feature rows.
//!
//! Each operation opens its own connection and releases it on return, even
//! on failure; nothing is held open between operations. The schema only
//! ever grows: migrations add columns, never drop them.

use aspect_core::types::FeatureRecord;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current schema version, recorded in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store write failed: {0}")]
    Write(#[source] rusqlite::Error),
    #[error("store read failed: {0}")]
    Read(#[source] rusqlite::Error),
}

/// One persisted feature row. Immutable once written; removed only by
/// [`FeatureStore::clear_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedFeatureRow {
    /// Store-assigned monotonic id.
    pub id: i64,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub smile_score: f64,
}

/// Handle to the feature store. Cheap to clone; holds no connection.
#[derive(Clone)]
pub struct FeatureStore {
    db_path: PathBuf,
}

impl FeatureStore {
    /// Open (and if needed create or migrate) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = store.connect().map_err(StoreError::Write)?;
        migrate(&conn).map_err(StoreError::Write)?;

        tracing::info!(path = %db_path.display(), "feature store ready");
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, rusqlite::Error> {
        Connection::open(&self.db_path)
    }

    /// Insert the derived numeric fields of one record as a single atomic
    /// row and return the assigned id.
    ///
    /// Only the continuous smile score is persisted, not the boolean
    /// judgment; an unavailable score is stored as 0.0.
    pub fn save(&self, record: &FeatureRecord) -> Result<i64, StoreError> {
        let conn = self.connect().map_err(StoreError::Write)?;
        conn.execute(
            "INSERT INTO face_features (pose_x, pose_y, pose_z, smile_score)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                record.rotation.x,
                record.rotation.y,
                record.rotation.z,
                record.smile_score.unwrap_or(0.0) as f64,
            ],
        )
        .map_err(StoreError::Write)?;

        let id = conn.last_insert_rowid();
        tracing::debug!(id, "saved feature row");
        Ok(id)
    }

    /// All rows, newest first (descending assigned id).
    pub fn load_all(&self) -> Result<Vec<PersistedFeatureRow>, StoreError> {
        let conn = self.connect().map_err(StoreError::Read)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, pose_x, pose_y, pose_z, smile_score
                 FROM face_features ORDER BY id DESC",
            )
            .map_err(StoreError::Read)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(PersistedFeatureRow {
                    id: row.get(0)?,
                    x: row.get(1)?,
                    y: row.get(2)?,
                    z: row.get(3)?,
                    // NULL in rows written before the smile_score migration.
                    smile_score: row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                })
            })
            .map_err(StoreError::Read)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Read)?;

        Ok(rows)
    }

    /// Delete every row unconditionally. Returns the number deleted.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let conn = self.connect().map_err(StoreError::Write)?;
        let deleted = conn
            .execute("DELETE FROM face_features", [])
            .map_err(StoreError::Write)?;
        tracing::info!(deleted, "cleared feature store");
        Ok(deleted)
    }
}

/// Bring the schema up to [`SCHEMA_VERSION`]. A fresh database is created
/// at the current schema directly; existing databases step through each
/// version, adding columns only.
fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version >= SCHEMA_VERSION {
        return Ok(());
    }

    if version == 0 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS face_features (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pose_x FLOAT,
                pose_y FLOAT,
                pose_z FLOAT,
                smile_score DOUBLE
            );",
        )?;
    } else {
        for step in (version + 1)..=SCHEMA_VERSION {
            match step {
                2 => {
                    conn.execute_batch(
                        "ALTER TABLE face_features ADD COLUMN smile_score DOUBLE;",
                    )?;
                    tracing::info!("migrated feature store to schema v2");
                }
                _ => {}
            }
        }
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
