// ABOUTME: Storage facade: the only entry point other subsystems use to read and write datasets.
// ABOUTME: Writes append to the log durably, then refresh the snapshot; reads prefer a valid snapshot.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quizlog_core::{DatasetName, DatasetNameError, LogEntry, MaterializedState, PendingEntry};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::compact::{self, CompactError, CompactionReport, DEFAULT_BACKUPS_RETAINED};
use crate::jsonl::{JsonlLog, LogError, RepairOutcome};
use crate::layout::StoreLayout;
use crate::rebuild::rebuild_state;
use crate::scheduler::{CompactionScheduler, CompactionTarget, ScheduleConfig};
use crate::snapshot::{LogFingerprint, SnapshotData, load_snapshot, save_snapshot};

/// Errors surfaced by the storage facade.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid dataset name: {0}")]
    InvalidDataset(#[from] DatasetNameError),

    #[error("update to {dataset} was not durably saved: {source}")]
    NotDurable { dataset: String, source: LogError },

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("compaction error: {0}")]
    Compact(#[from] CompactError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("data source error: {0}")]
    Source(crate::typed::SourceError),
}

/// How reads decide between the snapshot and a log replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Serve the snapshot when it was taken from the current log version,
    /// otherwise replay the log and re-save the snapshot.
    #[default]
    Snapshot,
    /// Always replay the log. Snapshots are still written on each update.
    Replay,
}

impl FromStr for ReadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snapshot" => Ok(Self::Snapshot),
            "replay" => Ok(Self::Replay),
            other => Err(format!("unknown read policy {:?}", other)),
        }
    }
}

impl fmt::Display for ReadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snapshot => f.write_str("snapshot"),
            Self::Replay => f.write_str("replay"),
        }
    }
}

/// Tunables for a Store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub read_policy: ReadPolicy,
    pub backups_retained: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            read_policy: ReadPolicy::default(),
            backups_retained: DEFAULT_BACKUPS_RETAINED,
        }
    }
}

/// Per-dataset bookkeeping, guarded by that dataset's lock.
#[derive(Debug, Default)]
struct DatasetSlot {
    repaired: bool,
}

struct StoreInner {
    layout: StoreLayout,
    options: StoreOptions,
    // One slot per dataset name touched by this process, never evicted.
    // Datasets are a small fixed set, so the map stays small.
    slots: Mutex<HashMap<DatasetName, Arc<Mutex<DatasetSlot>>>>,
}

/// Durable key/value datasets backed by append-only logs.
///
/// Every operation on a dataset holds that dataset's lock, so appends,
/// snapshot refreshes and compactions of the same dataset never overlap.
/// Different datasets proceed independently.
pub struct Store {
    inner: Arc<StoreInner>,
    scheduler: Mutex<Option<CompactionScheduler>>,
}

impl Store {
    /// Open a store rooted at `home` with default options.
    pub fn open(home: PathBuf) -> Result<Self, StoreError> {
        Self::with_options(home, StoreOptions::default())
    }

    pub fn with_options(home: PathBuf, options: StoreOptions) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(home)?;
        tracing::info!(
            "opened store at {} (read policy: {}, backups retained: {})",
            layout.home().display(),
            options.read_policy,
            options.backups_retained
        );
        Ok(Self {
            inner: Arc::new(StoreInner {
                layout,
                options,
                slots: Mutex::new(HashMap::new()),
            }),
            scheduler: Mutex::new(None),
        })
    }

    pub fn home(&self) -> &Path {
        self.inner.layout.home()
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.inner.layout
    }

    // -- writes --

    /// Install or overwrite one key.
    pub async fn upsert<V: Serialize + ?Sized>(
        &self,
        dataset: &str,
        key: &str,
        value: &V,
    ) -> Result<LogEntry, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let value = serde_json::to_value(value)?;
        let _guard = self.inner.lock(&dataset).await?;
        self.inner.write_locked(&dataset, PendingEntry::set(key, value))
    }

    /// Remove one key. Deleting an absent key still records the tombstone.
    pub async fn delete(&self, dataset: &str, key: &str) -> Result<LogEntry, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let _guard = self.inner.lock(&dataset).await?;
        self.inner.write_locked(&dataset, PendingEntry::delete(key))
    }

    /// Merge every key of `mapping` into the dataset with a single entry.
    /// Keys not in `mapping` are left as they are.
    pub async fn merge_all<V: Serialize>(
        &self,
        dataset: &str,
        mapping: &BTreeMap<String, V>,
    ) -> Result<LogEntry, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let mapping = to_value_map(mapping)?;
        let _guard = self.inner.lock(&dataset).await?;
        self.inner.write_locked(&dataset, PendingEntry::set_all(mapping))
    }

    /// Make the dataset hold exactly `mapping`: tombstones every current
    /// key missing from it, then merges it in.
    pub async fn replace_all<V: Serialize>(
        &self,
        dataset: &str,
        mapping: &BTreeMap<String, V>,
    ) -> Result<(), StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let mapping = to_value_map(mapping)?;
        let _guard = self.inner.lock(&dataset).await?;

        let current = self.inner.read_locked(&dataset)?;
        let stale: Vec<String> = current
            .keys()
            .filter(|key| !mapping.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            self.inner.write_locked(&dataset, PendingEntry::delete(key))?;
        }
        self.inner.write_locked(&dataset, PendingEntry::set_all(mapping))?;
        Ok(())
    }

    // -- reads --

    /// Current state of a dataset. A dataset that was never written reads
    /// as empty.
    pub async fn state(&self, dataset: &str) -> Result<MaterializedState, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let _guard = self.inner.lock(&dataset).await?;
        self.inner.read_locked(&dataset)
    }

    /// One key of a dataset, deserialized.
    pub async fn get<V: DeserializeOwned>(
        &self,
        dataset: &str,
        key: &str,
    ) -> Result<Option<V>, StoreError> {
        Ok(self.state(dataset).await?.get_as(key)?)
    }

    /// Every key of a dataset, deserialized.
    pub async fn get_all<V: DeserializeOwned>(
        &self,
        dataset: &str,
    ) -> Result<BTreeMap<String, V>, StoreError> {
        Ok(self.state(dataset).await?.to_typed()?)
    }

    /// When the dataset's snapshot was last written, if it has one.
    pub async fn last_updated(&self, dataset: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let _guard = self.inner.lock(&dataset).await?;
        match load_snapshot(&self.inner.layout.snapshot_path(&dataset)) {
            Ok(snapshot) => Ok(snapshot.map(|s| s.saved_at)),
            Err(e) => {
                tracing::warn!("snapshot for {} unreadable: {}", dataset, e);
                Ok(None)
            }
        }
    }

    // -- log access --

    /// Raw entries of a dataset's log in append order.
    pub async fn read_entries(&self, dataset: &str) -> Result<Vec<LogEntry>, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let _guard = self.inner.lock(&dataset).await?;
        Ok(self.inner.layout.log(&dataset).read_entries()?)
    }

    /// Replay a dataset's log, bypassing the snapshot entirely.
    pub async fn rebuild_state(&self, dataset: &str) -> Result<MaterializedState, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        let _guard = self.inner.lock(&dataset).await?;
        Ok(rebuild_state(&self.inner.layout.log(&dataset))?)
    }

    pub async fn log_size(&self, dataset: &str) -> Result<u64, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        Ok(self.inner.layout.log(&dataset).size()?)
    }

    /// Backups of a dataset's log, newest first.
    pub async fn list_backups(&self, dataset: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        Ok(compact::list_backups(&self.inner.layout, &dataset)?)
    }

    pub fn list_datasets(&self) -> Result<Vec<DatasetName>, StoreError> {
        Ok(self.inner.layout.list_datasets()?)
    }

    // -- compaction --

    /// Compact a dataset now, serialized with every other operation on it.
    pub async fn force_compact(&self, dataset: &str) -> Result<CompactionReport, StoreError> {
        let dataset = DatasetName::new(dataset)?;
        CompactionTarget::compact(self.inner.as_ref(), &dataset).await
    }

    /// Start compacting the given datasets in the background. Returns false
    /// if background compaction is already running, in which case the new
    /// settings are ignored.
    pub async fn start_background_compaction(
        &self,
        datasets: &[&str],
        interval: Duration,
        threshold_bytes: u64,
    ) -> Result<bool, StoreError> {
        let datasets = datasets
            .iter()
            .map(|name| DatasetName::new(*name))
            .collect::<Result<Vec<_>, _>>()?;
        let config = ScheduleConfig {
            datasets,
            interval,
            threshold_bytes,
        };

        let mut scheduler = self.scheduler.lock().await;
        if let Some(existing) = scheduler.as_ref()
            && existing.is_running()
        {
            return Ok(false);
        }

        let target: Arc<dyn CompactionTarget> = self.inner.clone();
        let mut fresh = CompactionScheduler::new(target, config);
        let started = fresh.start();
        *scheduler = Some(fresh);
        Ok(started)
    }

    /// Stop background compaction, waiting for an in-flight sweep.
    pub async fn stop_background_compaction(&self) {
        if let Some(mut scheduler) = self.scheduler.lock().await.take() {
            scheduler.stop().await;
        }
    }

    pub async fn background_compaction_running(&self) -> bool {
        self.scheduler
            .lock()
            .await
            .as_ref()
            .map(CompactionScheduler::is_running)
            .unwrap_or(false)
    }
}

impl StoreInner {
    /// Take a dataset's lock. The first time a dataset is touched in this
    /// process its log is repaired, so a record torn by an earlier crash
    /// cannot run into the next append.
    async fn lock(&self, dataset: &DatasetName) -> Result<OwnedMutexGuard<DatasetSlot>, StoreError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(dataset.clone()).or_default())
        };

        let mut guard = slot.lock_owned().await;
        if !guard.repaired {
            match self.layout.log(dataset).repair()? {
                RepairOutcome::Clean => {}
                outcome => tracing::warn!("recovered log for {}: {:?}", dataset, outcome),
            }
            guard.repaired = true;
        }
        Ok(guard)
    }

    /// Append then refresh the snapshot. Caller holds the dataset lock.
    ///
    /// The append decides success. A failed snapshot refresh only logs a
    /// warning: the snapshot keeps its old fingerprint, so the next read
    /// sees it as stale and replays the log.
    fn write_locked(&self, dataset: &DatasetName, pending: PendingEntry) -> Result<LogEntry, StoreError> {
        let log = self.layout.log(dataset);
        let base = self.cached_state(dataset, &log);

        let entry = log.append(pending).map_err(|source| StoreError::NotDurable {
            dataset: dataset.to_string(),
            source,
        })?;
        tracing::debug!(
            "appended {:?} {} to {}",
            entry.operation,
            entry.key.as_deref().unwrap_or("*"),
            dataset
        );

        let state = match base {
            Some(mut state) => {
                state.apply(&entry);
                state
            }
            None => match rebuild_state(&log) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!("skipping snapshot refresh for {}: {}", dataset, e);
                    return Ok(entry);
                }
            },
        };
        self.store_snapshot(dataset, &log, state, entry.timestamp);
        Ok(entry)
    }

    /// Resolve current state under the configured read policy. Caller holds
    /// the dataset lock.
    ///
    /// A snapshot re-saved by a read keeps the previous `saved_at`, so
    /// `last_updated` only moves when data is written.
    fn read_locked(&self, dataset: &DatasetName) -> Result<MaterializedState, StoreError> {
        let log = self.layout.log(dataset);
        if self.options.read_policy == ReadPolicy::Replay {
            return Ok(rebuild_state(&log)?);
        }

        let previous = self.load_cached(dataset);
        let previous_saved_at = match previous {
            Some(snapshot) if self.is_current(dataset, &log, &snapshot) => return Ok(snapshot.state),
            Some(snapshot) => Some(snapshot.saved_at),
            None => None,
        };

        let entries = log.read_entries()?;
        let state = MaterializedState::replay(&entries);
        if let Some(saved_at) = previous_saved_at.or_else(|| entries.last().map(|e| e.timestamp)) {
            self.store_snapshot(dataset, &log, state.clone(), saved_at);
        }
        Ok(state)
    }

    /// The snapshot's state if it was taken from the log as it is now.
    /// Missing, unreadable and stale snapshots all yield None.
    fn cached_state(&self, dataset: &DatasetName, log: &JsonlLog) -> Option<MaterializedState> {
        self.load_cached(dataset)
            .filter(|snapshot| self.is_current(dataset, log, snapshot))
            .map(|snapshot| snapshot.state)
    }

    fn load_cached(&self, dataset: &DatasetName) -> Option<SnapshotData> {
        match load_snapshot(&self.layout.snapshot_path(dataset)) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("snapshot for {} unreadable, replaying log: {}", dataset, e);
                None
            }
        }
    }

    fn is_current(&self, dataset: &DatasetName, log: &JsonlLog, snapshot: &SnapshotData) -> bool {
        let current = match LogFingerprint::of(log.path()) {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!("cannot stat log for {}: {}", dataset, e);
                return false;
            }
        };

        if !snapshot.matches(&current) {
            tracing::info!("snapshot for {} is behind its log, replaying", dataset);
            return false;
        }
        true
    }

    fn store_snapshot(
        &self,
        dataset: &DatasetName,
        log: &JsonlLog,
        state: MaterializedState,
        saved_at: DateTime<Utc>,
    ) {
        let fingerprint = match LogFingerprint::of(log.path()) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!("cannot stat log for {}: {}", dataset, e);
                return;
            }
        };

        let data = SnapshotData {
            dataset: dataset.to_string(),
            state,
            log: fingerprint,
            saved_at,
        };
        if let Err(e) = save_snapshot(&self.layout.snapshot_path(dataset), &data) {
            tracing::warn!("failed to save snapshot for {}: {}", dataset, e);
        }
    }
}

#[async_trait]
impl CompactionTarget for StoreInner {
    async fn log_size(&self, dataset: &DatasetName) -> Result<u64, StoreError> {
        Ok(self.layout.log(dataset).size()?)
    }

    async fn compact(&self, dataset: &DatasetName) -> Result<CompactionReport, StoreError> {
        let _guard = self.lock(dataset).await?;
        Ok(compact::compact(
            &self.layout,
            dataset,
            self.options.backups_retained,
        )?)
    }
}

fn to_value_map<V: Serialize>(mapping: &BTreeMap<String, V>) -> Result<BTreeMap<String, Value>, StoreError> {
    mapping
        .iter()
        .map(|(key, value)| Ok((key.clone(), serde_json::to_value(value)?)))
        .collect()
}
