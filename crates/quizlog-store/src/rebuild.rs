// ABOUTME: Rebuilds a dataset's materialized state by replaying its log from empty.
// ABOUTME: This is the ground-truth recovery path whenever the snapshot is missing or stale.

use quizlog_core::MaterializedState;

use crate::jsonl::{JsonlLog, LogError};

/// State recovered from a log, plus how many entries produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Rebuilt {
    pub state: MaterializedState,
    pub entry_count: usize,
}

/// Read every entry of `log` and fold them left to right into an empty
/// state. A log that does not exist rebuilds to an empty state.
pub fn rebuild(log: &JsonlLog) -> Result<Rebuilt, LogError> {
    let entries = log.read_entries()?;
    let state = MaterializedState::replay(&entries);

    tracing::debug!(
        "rebuilt {} keys from {} entries in {}",
        state.len(),
        entries.len(),
        log.path().display()
    );

    Ok(Rebuilt {
        state,
        entry_count: entries.len(),
    })
}

/// Convenience wrapper returning only the state.
pub fn rebuild_state(log: &JsonlLog) -> Result<MaterializedState, LogError> {
    rebuild(log).map(|rebuilt| rebuilt.state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizlog_core::PendingEntry;
    use serde_json::json;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn rebuild_missing_log_is_empty() {
        let dir = TempDir::new().unwrap();
        let log = JsonlLog::new(dir.path().join("nope.jsonl"));

        let rebuilt = rebuild(&log).unwrap();
        assert!(rebuilt.state.is_empty());
        assert_eq!(rebuilt.entry_count, 0);
    }

    #[test]
    fn rebuild_applies_entries_in_append_order() {
        let dir = TempDir::new().unwrap();
        let log = JsonlLog::new(dir.path().join("log.jsonl"));

        log.append(PendingEntry::set("u1", json!({"score": 100}))).unwrap();
        log.append(PendingEntry::set("u2", json!({"score": 10}))).unwrap();
        log.append(PendingEntry::set("u1", json!({"score": 150}))).unwrap();
        log.append(PendingEntry::delete("u2")).unwrap();

        let rebuilt = rebuild(&log).unwrap();

        assert_eq!(rebuilt.entry_count, 4);
        assert_eq!(rebuilt.state.get("u1"), Some(&json!({"score": 150})));
        assert!(!rebuilt.state.contains_key("u2"));
    }

    #[test]
    fn rebuild_twice_yields_same_state() {
        let dir = TempDir::new().unwrap();
        let log = JsonlLog::new(dir.path().join("log.jsonl"));
        for i in 0..20 {
            log.append(PendingEntry::set(format!("k{}", i % 7), json!(i))).unwrap();
            if i % 5 == 0 {
                log.append(PendingEntry::delete(format!("k{}", i % 3))).unwrap();
            }
        }

        assert_eq!(rebuild_state(&log).unwrap(), rebuild_state(&log).unwrap());
    }

    #[test]
    fn rebuild_surfaces_corruption() {
        let dir = TempDir::new().unwrap();
        let log = JsonlLog::new(dir.path().join("log.jsonl"));
        log.append(PendingEntry::set("a", json!(1))).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "{{broken").unwrap();
        drop(file);

        assert!(matches!(rebuild(&log), Err(LogError::Corrupt { .. })));
    }
}
