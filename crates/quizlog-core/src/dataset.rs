// ABOUTME: Dataset naming and the typed Dataset trait binding a log name to its record type.
// ABOUTME: Names are validated so they can be used directly as directory names on disk.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::model::{GameSession, PlayerStats, TokenMetadata};

/// Errors that can occur when validating a dataset name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DatasetNameError {
    #[error("dataset name is empty")]
    Empty,

    #[error("dataset name {0:?} may only contain ASCII letters, digits, '_' and '-'")]
    InvalidChars(String),
}

/// A validated dataset name. One log, one snapshot and a set of backups
/// exist per name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn new(name: impl Into<String>) -> Result<Self, DatasetNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DatasetNameError::Empty);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DatasetNameError::InvalidChars(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetName {
    type Err = DatasetNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for DatasetName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Binds a dataset name to the record type stored under each key.
pub trait Dataset {
    const NAME: &'static str;
    type Value: Serialize + DeserializeOwned + Send + Sync;
}

/// Per-user trivia statistics, keyed by user id.
pub struct Players;

impl Dataset for Players {
    const NAME: &'static str = "players";
    type Value = PlayerStats;
}

/// Cached NFT metadata used to build questions, keyed by token id.
pub struct Tokens;

impl Dataset for Tokens {
    const NAME: &'static str = "tokens";
    type Value = TokenMetadata;
}

/// In-progress game sessions, keyed by channel id.
pub struct GameStates;

impl Dataset for GameStates {
    const NAME: &'static str = "game_state";
    type Value = GameSession;
}
