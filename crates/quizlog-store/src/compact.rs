// ABOUTME: Log compaction: collapses a dataset's log into a single checkpoint entry.
// ABOUTME: Backs up the old log first, swaps the new one in atomically, and prunes old backups.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use quizlog_core::{DatasetName, PendingEntry};
use thiserror::Error;

use crate::atomic::{sync_parent_dir, write_atomic};
use crate::jsonl::LogError;
use crate::layout::StoreLayout;
use crate::rebuild::rebuild;

/// Number of backups kept per dataset unless configured otherwise.
pub const DEFAULT_BACKUPS_RETAINED: usize = 3;

const BACKUP_PREFIX: &str = "log-";
const BACKUP_SUFFIX: &str = ".jsonl";

/// Errors that can occur during compaction.
#[derive(Debug, Error)]
pub enum CompactError {
    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What a single compaction did.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionReport {
    pub dataset: DatasetName,
    pub entries_before: usize,
    pub keys_after: usize,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub backup: Option<PathBuf>,
    pub pruned_backups: usize,
}

/// Compact a dataset's log.
///
/// Sequence:
/// 1. Rebuild the current state from the log
/// 2. Wrap it in a single Checkpoint entry
/// 3. Copy the existing log (if any) to a timestamped backup
/// 4. Write the checkpoint to a temp file, fsync, rename over the log
/// 5. Delete all but the `retain_backups` newest backups
///
/// The live log is never truncated in place, so a crash at any step
/// leaves either the old log or the compacted one.
pub fn compact(
    layout: &StoreLayout,
    dataset: &DatasetName,
    retain_backups: usize,
) -> Result<CompactionReport, CompactError> {
    let log = layout.log(dataset);
    let bytes_before = log.size()?;
    let rebuilt = rebuild(&log)?;

    let keys_after = rebuilt.state.len();
    let checkpoint = PendingEntry::checkpoint(rebuilt.state.into_map()).stamp(Utc::now());
    let mut line = serde_json::to_string(&checkpoint)?;
    line.push('\n');

    let backup = if log.exists() {
        Some(backup_log(layout, dataset, log.path())?)
    } else {
        None
    };

    write_atomic(log.path(), &log.tmp_path(), line.as_bytes())?;

    let pruned_backups = prune_backups(layout, dataset, retain_backups)?;

    let report = CompactionReport {
        dataset: dataset.clone(),
        entries_before: rebuilt.entry_count,
        keys_after,
        bytes_before,
        bytes_after: line.len() as u64,
        backup,
        pruned_backups,
    };

    tracing::info!(
        "compacted {}: {} entries ({} bytes) -> 1 checkpoint with {} keys ({} bytes), pruned {} backups",
        dataset,
        report.entries_before,
        report.bytes_before,
        report.keys_after,
        report.bytes_after,
        report.pruned_backups
    );

    Ok(report)
}

/// List a dataset's backups, newest first.
pub fn list_backups(layout: &StoreLayout, dataset: &DatasetName) -> io::Result<Vec<PathBuf>> {
    let dir = layout.backups_dir(dataset);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with(BACKUP_PREFIX) && name_str.ends_with(BACKUP_SUFFIX) {
            backups.push(entry.path());
        }
    }

    // Stamps are fixed-width, so name order is creation order.
    backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(backups)
}

/// Delete all but the `retain` newest backups. Returns how many were removed.
pub fn prune_backups(
    layout: &StoreLayout,
    dataset: &DatasetName,
    retain: usize,
) -> io::Result<usize> {
    let mut pruned = 0;
    for path in list_backups(layout, dataset)?.into_iter().skip(retain) {
        fs::remove_file(&path)?;
        tracing::debug!("removed old backup {}", path.display());
        pruned += 1;
    }
    Ok(pruned)
}

/// Copy the live log to `backups/log-<stamp>.jsonl` and fsync the copy.
fn backup_log(layout: &StoreLayout, dataset: &DatasetName, log_path: &Path) -> io::Result<PathBuf> {
    let dir = layout.backups_dir(dataset);
    fs::create_dir_all(&dir)?;

    let mut at = Utc::now();
    let backup_path = loop {
        let candidate = dir.join(backup_file_name(at));
        if !candidate.exists() {
            break candidate;
        }
        at = at + chrono::Duration::nanoseconds(1);
    };

    fs::copy(log_path, &backup_path)?;
    File::open(&backup_path)?.sync_all()?;
    sync_parent_dir(&backup_path);

    Ok(backup_path)
}

fn backup_file_name(at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        BACKUP_PREFIX,
        at.format("%Y%m%dT%H%M%S%9fZ"),
        BACKUP_SUFFIX
    )
}
