// ABOUTME: Append-only JSONL operation log for durable per-dataset storage.
// ABOUTME: Provides fsynced append, ordered reads that reject interior corruption, and torn-tail repair.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use quizlog_core::{LogEntry, PendingEntry};
use thiserror::Error;

use crate::atomic::{sync_parent_dir, write_atomic};

/// Errors that can occur during JSONL log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("json error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt record at {}:{}: {}", .path.display(), .line, .source)]
    Corrupt {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// What `repair` found at the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The file ends with a complete, newline-terminated record (or is empty).
    Clean,
    /// The last record parsed but had no trailing newline; one was added.
    NewlineAdded,
    /// An unparseable, unterminated trailing line was dropped.
    TornTailDropped,
}

/// Where the readable part of a log ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    MissingNewline,
    Torn { offset: usize },
}

/// An append-only JSONL log backed by a file. Each line is one
/// JSON-serialized LogEntry followed by a newline. The file is created
/// lazily by the first append.
#[derive(Debug, Clone)]
pub struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the underlying JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Size of the log in bytes, or 0 if it has never been written.
    pub fn size(&self) -> io::Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Stamp a pending entry with the current time and append it.
    /// Returns the entry exactly as it was written.
    pub fn append(&self, pending: PendingEntry) -> Result<LogEntry, LogError> {
        let entry = pending.stamp(Utc::now());
        self.append_entry(&entry)?;
        Ok(entry)
    }

    /// Append a single entry as one JSON line: open for append, write the
    /// whole line in one call, fsync, close. Returns only once the line is
    /// on stable storage.
    ///
    /// A file that does not end on a record boundary is repaired first. If
    /// the write or fsync fails the file is truncated back to its previous
    /// length, so a failed append leaves no partial line behind.
    pub fn append_entry(&self, entry: &LogEntry) -> Result<(), LogError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let created = !self.path.exists();
        if created && let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !created && !self.ends_on_boundary()? {
            let outcome = self.repair()?;
            tracing::warn!(
                "{} had a partial record before append: {:?}",
                self.path.display(),
                outcome
            );
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let original_len = file.metadata()?.len();
        if let Err(e) = file.write_all(line.as_bytes()).and_then(|()| file.sync_all()) {
            if let Err(rollback) = file.set_len(original_len).and_then(|()| file.sync_all()) {
                tracing::error!(
                    "failed to roll back partial append to {}: {}",
                    self.path.display(),
                    rollback
                );
            }
            return Err(e.into());
        }
        drop(file);

        if created {
            sync_parent_dir(&self.path);
        }
        Ok(())
    }

    /// Read all entries in append order. A missing file reads as empty.
    ///
    /// Blank lines are skipped. A malformed interior line fails the whole
    /// read with `LogError::Corrupt`; an unparseable final line with no
    /// trailing newline is a write torn by a crash and is ignored.
    pub fn read_entries(&self) -> Result<Vec<LogEntry>, LogError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let (entries, tail) = self.parse(&bytes)?;
        if let Tail::Torn { offset } = tail {
            tracing::warn!(
                "ignoring torn trailing record in {} ({} bytes)",
                self.path.display(),
                bytes.len() - offset
            );
        }
        Ok(entries)
    }

    /// Make the file end on a record boundary. A torn trailing line is
    /// dropped and a missing final newline is added, so the next append
    /// starts on its own line. Interior corruption is still an error.
    /// Uses atomic temp-file + fsync + rename to prevent data loss on crash.
    pub fn repair(&self) -> Result<RepairOutcome, LogError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RepairOutcome::Clean),
            Err(e) => return Err(e.into()),
        };
        let (_, tail) = self.parse(&bytes)?;

        let (contents, outcome) = match tail {
            Tail::Clean => return Ok(RepairOutcome::Clean),
            Tail::MissingNewline => {
                let mut contents = bytes;
                contents.push(b'\n');
                (contents, RepairOutcome::NewlineAdded)
            }
            Tail::Torn { offset } => (bytes[..offset].to_vec(), RepairOutcome::TornTailDropped),
        };

        write_atomic(&self.path, &self.tmp_path(), &contents)?;
        tracing::info!("repaired {}: {:?}", self.path.display(), outcome);
        Ok(outcome)
    }

    /// True if the file is empty or its last byte is a newline.
    fn ends_on_boundary(&self) -> io::Result<bool> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(true);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] == b'\n')
    }

    /// Sibling path used for atomic rewrites of this log.
    pub(crate) fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn parse(&self, bytes: &[u8]) -> Result<(Vec<LogEntry>, Tail), LogError> {
        let mut entries = Vec::new();
        if bytes.is_empty() {
            return Ok((entries, Tail::Clean));
        }

        let ends_with_newline = bytes.last() == Some(&b'\n');
        let mut tail = if ends_with_newline {
            Tail::Clean
        } else {
            Tail::MissingNewline
        };

        let mut offset = 0;
        let mut line_no = 0;
        while offset < bytes.len() {
            line_no += 1;
            let end = bytes[offset..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|i| offset + i);
            let line = &bytes[offset..end.unwrap_or(bytes.len())];

            if !line.iter().all(u8::is_ascii_whitespace) {
                match serde_json::from_slice::<LogEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    // Only the unterminated last line can be a torn write.
                    Err(_) if end.is_none() => {
                        tail = Tail::Torn { offset };
                    }
                    Err(source) => {
                        return Err(LogError::Corrupt {
                            path: self.path.clone(),
                            line: line_no,
                            source,
                        });
                    }
                }
            }

            offset = match end {
                Some(end) => end + 1,
                None => bytes.len(),
            };
        }

        Ok((entries, tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizlog_core::Operation;
    use serde_json::json;
    use tempfile::TempDir;

    fn make_log(dir: &TempDir) -> JsonlLog {
        JsonlLog::new(dir.path().join("players").join("log.jsonl"))
    }

    #[test]
    fn append_and_read_in_order() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);

        log.append(PendingEntry::set("u1", json!({"score": 100}))).unwrap();
        log.append(PendingEntry::set("u2", json!({"score": 50}))).unwrap();
        log.append(PendingEntry::delete("u1")).unwrap();

        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].key.as_deref(), Some("u1"));
        assert_eq!(entries[1].key.as_deref(), Some("u2"));
        assert_eq!(entries[2].operation, Operation::Delete);
        assert!(entries[0].timestamp <= entries[2].timestamp);
    }

    #[test]
    fn first_append_creates_log_and_directories() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        assert!(!log.exists());

        log.append(PendingEntry::set("k", json!(1))).unwrap();

        assert!(log.exists());
        assert!(log.size().unwrap() > 0);
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);

        assert!(log.read_entries().unwrap().is_empty());
        assert_eq!(log.size().unwrap(), 0);
    }

    #[test]
    fn every_line_is_newline_terminated() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        log.append(PendingEntry::set("a", json!("x\ny"))).unwrap();
        log.append(PendingEntry::set("b", json!(2))).unwrap();

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.ends_with('\n'));
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn append_is_durable_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log.jsonl");

        let written = JsonlLog::new(&path)
            .append(PendingEntry::set("k", json!(42)))
            .unwrap();

        // A fresh handle sees exactly what was written
        let entries = JsonlLog::new(&path).read_entries().unwrap();
        assert_eq!(entries, vec![written]);
    }

    #[test]
    fn interior_corruption_is_fatal() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        log.append(PendingEntry::set("a", json!(1))).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        writeln!(file, "this is not json").unwrap();
        drop(file);
        log.append(PendingEntry::set("b", json!(2))).unwrap();

        match log.read_entries() {
            Err(LogError::Corrupt { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected corrupt record error, got {:?}", other),
        }
    }

    #[test]
    fn torn_trailing_line_is_ignored_on_read() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        log.append(PendingEntry::set("a", json!(1))).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        write!(file, r#"{{"timestamp":"2024-01-01T00:00:00Z","operation":"se"#).unwrap();
        drop(file);

        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn complete_final_line_without_newline_is_read() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(
            log.path(),
            r#"{"timestamp":"2024-01-01T00:00:00Z","operation":"set","key":"a","value":1}"#,
        )
        .unwrap();

        assert_eq!(log.read_entries().unwrap().len(), 1);
    }

    #[test]
    fn repair_drops_torn_tail_and_next_append_is_clean() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        log.append(PendingEntry::set("a", json!(1))).unwrap();
        log.append(PendingEntry::set("b", json!(2))).unwrap();

        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        write!(file, r#"{{"timestamp":"2024-01-01T00:00:00Z","oper"#).unwrap();
        drop(file);

        assert_eq!(log.repair().unwrap(), RepairOutcome::TornTailDropped);
        log.append(PendingEntry::set("c", json!(3))).unwrap();

        let keys: Vec<_> = log
            .read_entries()
            .unwrap()
            .into_iter()
            .filter_map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(!log.tmp_path().exists());
    }

    #[test]
    fn repair_adds_missing_newline() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(
            log.path(),
            r#"{"timestamp":"2024-01-01T00:00:00Z","operation":"set","key":"a","value":1}"#,
        )
        .unwrap();

        assert_eq!(log.repair().unwrap(), RepairOutcome::NewlineAdded);
        log.append(PendingEntry::set("b", json!(2))).unwrap();

        assert_eq!(log.read_entries().unwrap().len(), 2);
    }

    #[test]
    fn append_after_partial_write_drops_fragment() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        log.append(PendingEntry::set("a", json!(1))).unwrap();

        // Leftover of an append that failed partway through
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        write!(file, r#"{{"timestamp":"2024-01-01T00:00:00Z","oper"#).unwrap();
        drop(file);

        let written = log.append(PendingEntry::set("b", json!(2))).unwrap();

        let entries = log.read_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], written);
        assert!(fs::read_to_string(log.path()).unwrap().ends_with('\n'));
    }

    #[test]
    fn append_after_unterminated_record_keeps_both() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(
            log.path(),
            r#"{"timestamp":"2024-01-01T00:00:00Z","operation":"set","key":"a","value":1}"#,
        )
        .unwrap();

        log.append(PendingEntry::set("b", json!(2))).unwrap();

        let keys: Vec<_> = log
            .read_entries()
            .unwrap()
            .into_iter()
            .filter_map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn repair_no_op_on_clean_or_missing_file() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        assert_eq!(log.repair().unwrap(), RepairOutcome::Clean);

        log.append(PendingEntry::set("a", json!(1))).unwrap();
        let before = fs::read(log.path()).unwrap();

        assert_eq!(log.repair().unwrap(), RepairOutcome::Clean);
        assert_eq!(fs::read(log.path()).unwrap(), before);
    }

    #[test]
    fn repair_refuses_interior_corruption() {
        let dir = TempDir::new().unwrap();
        let log = make_log(&dir);
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(log.path(), "garbage\n").unwrap();
        log.append(PendingEntry::set("a", json!(1))).unwrap();

        assert!(matches!(log.repair(), Err(LogError::Corrupt { line: 1, .. })));
    }

    #[test]
    fn tmp_path_is_sibling() {
        let log = JsonlLog::new("/data/players/log.jsonl");
        assert_eq!(log.tmp_path(), PathBuf::from("/data/players/log.jsonl.tmp"));
    }
}
