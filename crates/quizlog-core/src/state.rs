// ABOUTME: Defines MaterializedState, the key/value mapping built by replaying a log.
// ABOUTME: The apply() method folds Set, Delete and Checkpoint entries into current state.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entry::{LogEntry, Operation};

/// The current contents of a dataset, obtained by replaying its log from
/// an empty mapping. Keys are kept sorted so two replays of the same log
/// compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterializedState {
    entries: BTreeMap<String, Value>,
}

impl MaterializedState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay entries left to right into a fresh state.
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LogEntry>) -> Self {
        let mut state = Self::new();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    /// Apply a single entry.
    ///
    /// A keyed `Set` installs or overwrites its key, a keyless `Set` merges
    /// every key of its object payload, `Delete` removes its key, and a
    /// `Checkpoint` merges its snapshot into the current state. Checkpoints
    /// fast-forward rather than reset because entries after them still apply.
    pub fn apply(&mut self, entry: &LogEntry) {
        match (entry.operation, &entry.key) {
            (Operation::Set, Some(key)) => {
                let value = entry.value.clone().unwrap_or(Value::Null);
                self.entries.insert(key.clone(), value);
            }
            (Operation::Set, None) | (Operation::Checkpoint, _) => match &entry.value {
                Some(Value::Object(map)) => {
                    for (key, value) in map {
                        self.entries.insert(key.clone(), value.clone());
                    }
                }
                _ => {
                    tracing::warn!(
                        "skipping {:?} entry at {} without an object payload",
                        entry.operation,
                        entry.timestamp
                    );
                }
            },
            (Operation::Delete, Some(key)) => {
                self.entries.remove(key);
            }
            (Operation::Delete, None) => {
                tracing::warn!("skipping delete entry at {} without a key", entry.timestamp);
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    /// Borrow the underlying mapping.
    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// Consume the state, returning the underlying mapping.
    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.entries
    }

    /// Deserialize a single key into a typed value. Returns Ok(None) when
    /// the key is absent.
    pub fn get_as<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, serde_json::Error> {
        self.entries
            .get(key)
            .map(|value| V::deserialize(value))
            .transpose()
    }

    /// Deserialize every value into a typed mapping.
    pub fn to_typed<V: DeserializeOwned>(&self) -> Result<BTreeMap<String, V>, serde_json::Error> {
        self.entries
            .iter()
            .map(|(key, value)| Ok((key.clone(), V::deserialize(value)?)))
            .collect()
    }
}

impl From<BTreeMap<String, Value>> for MaterializedState {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self { entries }
    }
}
