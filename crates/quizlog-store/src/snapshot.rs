// ABOUTME: Atomic snapshot save and load for a dataset's materialized state.
// ABOUTME: Each snapshot records a fingerprint of the log it was taken from so staleness is detectable.

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use quizlog_core::MaterializedState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atomic::write_atomic;

/// Errors that can occur during snapshot operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Identifies one version of a log file. Every append grows the file and
/// every compaction swaps in a new file, so a snapshot whose fingerprint
/// differs from the live log's describes some other version of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFingerprint {
    pub len: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl LogFingerprint {
    /// Fingerprint the log at `path`, or None if it does not exist.
    pub fn of(path: &Path) -> io::Result<Option<Self>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(Self {
            len: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }))
    }
}

/// A full dump of a dataset's state, cached to avoid replaying the log on
/// every read. The log stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub dataset: String,
    pub state: MaterializedState,
    pub log: Option<LogFingerprint>,
    pub saved_at: DateTime<Utc>,
}

impl SnapshotData {
    /// True if this snapshot was taken from exactly the given log version.
    pub fn matches(&self, current: &Option<LogFingerprint>) -> bool {
        &self.log == current
    }
}

/// Save a snapshot to disk using atomic write (write to .tmp, fsync, rename).
/// Creates the target directory if it does not exist.
pub fn save_snapshot(path: &Path, data: &SnapshotData) -> Result<(), SnapshotError> {
    let json = serde_json::to_string_pretty(data)?;
    write_atomic(path, &path.with_extension("json.tmp"), json.as_bytes())?;
    Ok(())
}

/// Load the snapshot at `path`. Returns None if it does not exist.
pub fn load_snapshot(path: &Path) -> Result<Option<SnapshotData>, SnapshotError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let data: SnapshotData = serde_json::from_str(&contents)?;
    Ok(Some(data))
}
