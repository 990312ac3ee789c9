// ABOUTME: Background compaction scheduler that periodically compacts oversized logs.
// ABOUTME: An owned start/stop object driving a tokio task; per-dataset failures never stop the schedule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizlog_core::DatasetName;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::compact::CompactionReport;
use crate::store::StoreError;

/// Default time between compaction sweeps.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default log size above which a dataset is compacted.
pub const DEFAULT_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// What the scheduler compacts. Implemented by the store so scheduled
/// compactions take the same per-dataset lock as writes and manual ones.
#[async_trait]
pub trait CompactionTarget: Send + Sync {
    async fn log_size(&self, dataset: &DatasetName) -> Result<u64, StoreError>;

    async fn compact(&self, dataset: &DatasetName) -> Result<CompactionReport, StoreError>;
}

/// Which datasets to watch and when to compact them.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub datasets: Vec<DatasetName>,
    pub interval: Duration,
    pub threshold_bytes: u64,
}

impl ScheduleConfig {
    pub fn new(datasets: Vec<DatasetName>) -> Self {
        Self {
            datasets,
            interval: DEFAULT_INTERVAL,
            threshold_bytes: DEFAULT_THRESHOLD_BYTES,
        }
    }
}

/// Outcome of one sweep over the monitored datasets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub compacted: Vec<DatasetName>,
    pub skipped: Vec<DatasetName>,
    pub failed: Vec<DatasetName>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the background compaction task. `start` is idempotent while
/// running; `stop` lets an in-flight sweep finish before returning.
pub struct CompactionScheduler {
    target: Arc<dyn CompactionTarget>,
    config: ScheduleConfig,
    running: Option<Running>,
}

impl CompactionScheduler {
    pub fn new(target: Arc<dyn CompactionTarget>, config: ScheduleConfig) -> Self {
        Self {
            target,
            config,
            running: None,
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the background task. Returns false, doing nothing, if it is
    /// already running. The first sweep happens one interval after start.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.target),
            self.config.clone(),
            shutdown_rx,
        ));
        self.running = Some(Running { shutdown, task });

        tracing::info!(
            "background compaction started: {} datasets every {:?}, threshold {} bytes",
            self.config.datasets.len(),
            self.config.interval,
            self.config.threshold_bytes
        );
        true
    }

    /// Cancel the pending timer and wait for any in-flight sweep to finish.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.task.await {
            tracing::warn!("background compaction task ended abnormally: {}", e);
        }
        tracing::info!("background compaction stopped");
    }
}

impl Drop for CompactionScheduler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_loop(
    target: Arc<dyn CompactionTarget>,
    config: ScheduleConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = config.interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // A sweep runs to completion once its tick has fired; shutdown is
        // only observed between sweeps.
        tokio::select! {
            _ = ticker.tick() => {
                run_tick(target.as_ref(), &config).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// Check every monitored dataset once, compacting those whose log exceeds
/// the threshold. Datasets are handled one at a time; an error on one is
/// logged and the sweep moves on.
pub async fn run_tick(target: &dyn CompactionTarget, config: &ScheduleConfig) -> TickSummary {
    let mut summary = TickSummary::default();

    for dataset in &config.datasets {
        let size = match target.log_size(dataset).await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!("failed to size log for {}: {}", dataset, e);
                summary.failed.push(dataset.clone());
                continue;
            }
        };

        if size <= config.threshold_bytes {
            summary.skipped.push(dataset.clone());
            continue;
        }

        tracing::info!(
            "log for {} is {} bytes (threshold {}), compacting",
            dataset,
            size,
            config.threshold_bytes
        );
        match target.compact(dataset).await {
            Ok(_) => summary.compacted.push(dataset.clone()),
            Err(e) => {
                tracing::error!("scheduled compaction of {} failed: {}", dataset, e);
                summary.failed.push(dataset.clone());
            }
        }
    }

    summary
}
