// ABOUTME: Configuration loading and validation for the quizlog store.
// ABOUTME: Reads QUIZLOG_* environment variables and turns them into store and scheduler settings.

use std::path::PathBuf;
use std::time::Duration;

use quizlog_core::{Dataset, DatasetName, GameStates, Players, Tokens};
use thiserror::Error;

use crate::compact::DEFAULT_BACKUPS_RETAINED;
use crate::scheduler::{DEFAULT_INTERVAL, DEFAULT_THRESHOLD_BYTES, ScheduleConfig};
use crate::store::{ReadPolicy, Store, StoreError, StoreOptions};

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("QUIZLOG_DATASETS contains an invalid dataset name: {0}")]
    InvalidDataset(String),
}

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub home: PathBuf,
    pub datasets: Vec<DatasetName>,
    pub compact_interval: Duration,
    pub compact_threshold_bytes: u64,
    pub backups_retained: usize,
    pub read_policy: ReadPolicy,
}

impl StoreConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - QUIZLOG_HOME: data directory (default: ~/.quizlog)
    /// - QUIZLOG_DATASETS: comma-separated datasets to compact (default: players,tokens,game_state)
    /// - QUIZLOG_COMPACT_INTERVAL_SECS: seconds between compaction sweeps (default: 3600)
    /// - QUIZLOG_COMPACT_THRESHOLD_BYTES: log size that triggers compaction (default: 1048576)
    /// - QUIZLOG_BACKUPS_RETAINED: backups kept per dataset, at least 1 (default: 3)
    /// - QUIZLOG_READ_POLICY: snapshot or replay (default: snapshot)
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = std::env::var("QUIZLOG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/tmp"))
                    .join(".quizlog")
            });

        let datasets = match non_empty_var("QUIZLOG_DATASETS") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| {
                    DatasetName::new(name).map_err(|_| ConfigError::InvalidDataset(name.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => default_datasets(),
        };

        let compact_interval = match non_empty_var("QUIZLOG_COMPACT_INTERVAL_SECS") {
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "QUIZLOG_COMPACT_INTERVAL_SECS",
                        expected: "positive number of seconds",
                        value,
                    });
                }
            },
            None => DEFAULT_INTERVAL,
        };

        let compact_threshold_bytes = match non_empty_var("QUIZLOG_COMPACT_THRESHOLD_BYTES") {
            Some(value) => value.parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: "QUIZLOG_COMPACT_THRESHOLD_BYTES",
                expected: "byte count",
                value,
            })?,
            None => DEFAULT_THRESHOLD_BYTES,
        };

        let backups_retained = match non_empty_var("QUIZLOG_BACKUPS_RETAINED") {
            Some(value) => match value.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "QUIZLOG_BACKUPS_RETAINED",
                        expected: "count of at least 1",
                        value,
                    });
                }
            },
            None => DEFAULT_BACKUPS_RETAINED,
        };

        let read_policy = match non_empty_var("QUIZLOG_READ_POLICY") {
            Some(value) => value.parse::<ReadPolicy>().map_err(|_| ConfigError::Invalid {
                var: "QUIZLOG_READ_POLICY",
                expected: "read policy (snapshot or replay)",
                value,
            })?,
            None => ReadPolicy::default(),
        };

        Ok(Self {
            home,
            datasets,
            compact_interval,
            compact_threshold_bytes,
            backups_retained,
            read_policy,
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            read_policy: self.read_policy,
            backups_retained: self.backups_retained,
        }
    }

    /// Open the store this configuration describes.
    pub fn open_store(&self) -> Result<Store, StoreError> {
        Store::with_options(self.home.clone(), self.store_options())
    }

    pub fn schedule(&self) -> ScheduleConfig {
        ScheduleConfig {
            datasets: self.datasets.clone(),
            interval: self.compact_interval,
            threshold_bytes: self.compact_threshold_bytes,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn default_datasets() -> Vec<DatasetName> {
    [Players::NAME, Tokens::NAME, GameStates::NAME]
        .into_iter()
        .filter_map(|name| DatasetName::new(name).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "QUIZLOG_HOME",
        "QUIZLOG_DATASETS",
        "QUIZLOG_COMPACT_INTERVAL_SECS",
        "QUIZLOG_COMPACT_THRESHOLD_BYTES",
        "QUIZLOG_BACKUPS_RETAINED",
        "QUIZLOG_READ_POLICY",
    ];

    fn clear_env() {
        // SAFETY: test-only code; these tests run in one function to avoid races
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    // One test touches the environment so parallel tests cannot interleave.
    #[test]
    fn config_loads_defaults_overrides_and_rejects_bad_values() {
        clear_env();
        let config = StoreConfig::from_env().unwrap();
        assert!(config.home.to_string_lossy().contains(".quizlog"));
        assert_eq!(
            config.datasets.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
            vec!["players", "tokens", "game_state"]
        );
        assert_eq!(config.compact_interval, Duration::from_secs(3600));
        assert_eq!(config.compact_threshold_bytes, 1024 * 1024);
        assert_eq!(config.backups_retained, 3);
        assert_eq!(config.read_policy, ReadPolicy::Snapshot);

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("QUIZLOG_HOME", "/srv/quizlog");
            std::env::set_var("QUIZLOG_DATASETS", "players, tokens");
            std::env::set_var("QUIZLOG_COMPACT_INTERVAL_SECS", "60");
            std::env::set_var("QUIZLOG_COMPACT_THRESHOLD_BYTES", "4096");
            std::env::set_var("QUIZLOG_BACKUPS_RETAINED", "5");
            std::env::set_var("QUIZLOG_READ_POLICY", "Replay");
        }
        let config = StoreConfig::from_env().unwrap();
        assert_eq!(config.home, PathBuf::from("/srv/quizlog"));
        assert_eq!(config.datasets.len(), 2);
        assert_eq!(config.schedule().interval, Duration::from_secs(60));
        assert_eq!(config.schedule().threshold_bytes, 4096);
        assert_eq!(config.store_options().backups_retained, 5);
        assert_eq!(config.store_options().read_policy, ReadPolicy::Replay);

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("QUIZLOG_BACKUPS_RETAINED", "0");
        }
        let err = StoreConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("QUIZLOG_BACKUPS_RETAINED"), "{}", err);

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::remove_var("QUIZLOG_BACKUPS_RETAINED");
            std::env::set_var("QUIZLOG_DATASETS", "players,../etc");
        }
        assert!(matches!(
            StoreConfig::from_env(),
            Err(ConfigError::InvalidDataset(name)) if name == "../etc"
        ));

        // SAFETY: test-only code, see clear_env
        unsafe {
            std::env::set_var("QUIZLOG_DATASETS", "players");
            std::env::set_var("QUIZLOG_READ_POLICY", "sometimes");
        }
        let err = StoreConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("QUIZLOG_READ_POLICY"), "{}", err);

        clear_env();
    }
}
