// ABOUTME: Crash-safe whole-file replacement shared by repair, compaction and snapshots.
// ABOUTME: Writes to a temp file, fsyncs, renames over the target, then fsyncs the directory.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Replace `path` with `contents` using write-temp + fsync + rename.
/// A crash at any point leaves either the old file or the new one.
pub(crate) fn write_atomic(path: &Path, tmp_path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_file = File::create(tmp_path)?;
    tmp_file.write_all(contents)?;
    tmp_file.sync_all()?;
    drop(tmp_file);

    fs::rename(tmp_path, path)?;
    sync_parent_dir(path);
    Ok(())
}

/// Fsync the parent directory so a rename or newly created entry is durable.
/// Best-effort: the data itself is already synced when this runs.
pub(crate) fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replaces_existing_file_and_removes_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("target.json");
        let tmp = dir.path().join("target.json.tmp");
        fs::write(&path, b"old").unwrap();

        write_atomic(&path, &tmp, b"new").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
        assert!(!tmp.exists());
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("file");
        let tmp = dir.path().join("a").join("b").join("file.tmp");

        write_atomic(&path, &tmp, b"x").unwrap();
        assert!(path.exists());
    }
}
