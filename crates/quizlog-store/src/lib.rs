// ABOUTME: Persistence layer for quizlog, handling durable dataset storage and recovery.
// ABOUTME: Provides JSONL operation logs, snapshots, checkpoint compaction and background scheduling.

mod atomic;
pub mod compact;
pub mod config;
pub mod jsonl;
pub mod layout;
pub mod rebuild;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod typed;

pub use compact::{CompactError, CompactionReport, compact, list_backups, prune_backups};
pub use config::{ConfigError, StoreConfig};
pub use jsonl::{JsonlLog, LogError, RepairOutcome};
pub use layout::StoreLayout;
pub use rebuild::{Rebuilt, rebuild, rebuild_state};
pub use scheduler::{CompactionScheduler, CompactionTarget, ScheduleConfig, TickSummary, run_tick};
pub use snapshot::{LogFingerprint, SnapshotData, SnapshotError, load_snapshot, save_snapshot};
pub use store::{ReadPolicy, Store, StoreError, StoreOptions};
pub use typed::{DatasetHandle, DatasetSource, SourceError};
