// ABOUTME: Defines the log entry envelope and the three operations a log can record.
// ABOUTME: Entries are immutable facts; PendingEntry is an entry still waiting for its timestamp.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Set,
    Delete,
    Checkpoint,
}

/// One record in a dataset's log. Serialized as a single JSON line.
///
/// `key` is present for keyed `Set` and for `Delete`. A keyless `Set`
/// carries a whole mapping in `value` that is merged into state, and a
/// `Checkpoint` carries the full materialized state at compaction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// A log entry that has not been appended yet. The writer assigns the
/// timestamp at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub operation: Operation,
    pub key: Option<String>,
    pub value: Option<Value>,
}

impl PendingEntry {
    /// Install or overwrite a single key.
    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self {
            operation: Operation::Set,
            key: Some(key.into()),
            value: Some(value),
        }
    }

    /// Merge every key of `mapping` into state.
    pub fn set_all(mapping: BTreeMap<String, Value>) -> Self {
        Self {
            operation: Operation::Set,
            key: None,
            value: Some(Value::Object(mapping.into_iter().collect())),
        }
    }

    /// Tombstone for a single key.
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            operation: Operation::Delete,
            key: Some(key.into()),
            value: None,
        }
    }

    /// Full-state checkpoint written by compaction.
    pub fn checkpoint(state: BTreeMap<String, Value>) -> Self {
        Self {
            operation: Operation::Checkpoint,
            key: None,
            value: Some(Value::Object(state.into_iter().collect())),
        }
    }

    /// Attach a timestamp, producing the entry that goes on disk.
    pub fn stamp(self, timestamp: DateTime<Utc>) -> LogEntry {
        LogEntry {
            timestamp,
            operation: self.operation,
            key: self.key,
            value: self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keyed_set_serializes_as_single_line() {
        let entry = PendingEntry::set("u1", json!({"score": 100})).stamp(Utc::now());
        let line = serde_json::to_string(&entry).unwrap();

        assert!(!line.contains('\n'));
        assert!(line.contains(r#""operation":"set""#));
        assert!(line.contains(r#""key":"u1""#));
    }

    #[test]
    fn delete_omits_value_field() {
        let entry = PendingEntry::delete("c1").stamp(Utc::now());
        let line = serde_json::to_string(&entry).unwrap();

        assert!(line.contains(r#""operation":"delete""#));
        assert!(!line.contains("value"));
    }

    #[test]
    fn checkpoint_omits_key_field() {
        let mut state = BTreeMap::new();
        state.insert("a".to_string(), json!(1));
        let entry = PendingEntry::checkpoint(state).stamp(Utc::now());
        let line = serde_json::to_string(&entry).unwrap();

        assert!(line.contains(r#""operation":"checkpoint""#));
        assert!(!line.contains(r#""key""#));

        let parsed: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn entry_without_optional_fields_parses() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","operation":"delete","key":"k"}"#;
        let entry: LogEntry = serde_json::from_str(line).unwrap();

        assert_eq!(entry.operation, Operation::Delete);
        assert_eq!(entry.key.as_deref(), Some("k"));
        assert!(entry.value.is_none());
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let line = r#"{"timestamp":"2024-01-01T00:00:00Z","operation":"truncate"}"#;
        assert!(serde_json::from_str::<LogEntry>(line).is_err());
    }
}
