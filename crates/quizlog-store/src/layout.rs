// ABOUTME: Filesystem layout of the quizlog home directory.
// ABOUTME: Maps dataset names to their log, snapshot and backup paths, and discovers existing datasets.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use quizlog_core::DatasetName;

use crate::jsonl::JsonlLog;

/// Resolves where each dataset's files live:
///
/// ```text
/// <home>/datasets/<name>/log.jsonl
/// <home>/datasets/<name>/snapshot.json
/// <home>/datasets/<name>/backups/log-<stamp>.jsonl
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    home: PathBuf,
}

impl StoreLayout {
    /// Create a layout rooted at the given home directory, creating the
    /// datasets directory if it does not exist.
    pub fn new(home: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(home.join("datasets"))?;
        Ok(Self { home })
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn dataset_dir(&self, dataset: &DatasetName) -> PathBuf {
        self.home.join("datasets").join(dataset.as_str())
    }

    pub fn log_path(&self, dataset: &DatasetName) -> PathBuf {
        self.dataset_dir(dataset).join("log.jsonl")
    }

    pub fn log(&self, dataset: &DatasetName) -> JsonlLog {
        JsonlLog::new(self.log_path(dataset))
    }

    pub fn snapshot_path(&self, dataset: &DatasetName) -> PathBuf {
        self.dataset_dir(dataset).join("snapshot.json")
    }

    pub fn backups_dir(&self, dataset: &DatasetName) -> PathBuf {
        self.dataset_dir(dataset).join("backups")
    }

    /// Scan the datasets directory and return every dataset with a
    /// directory on disk, sorted by name.
    pub fn list_datasets(&self) -> io::Result<Vec<DatasetName>> {
        let datasets_dir = self.home.join("datasets");
        if !datasets_dir.exists() {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for entry in fs::read_dir(&datasets_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            match DatasetName::new(name_str.as_ref()) {
                Ok(dataset) => results.push(dataset),
                Err(_) => {
                    tracing::warn!("skipping unrecognized directory in datasets/: {}", name_str);
                }
            }
        }

        results.sort();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn name(s: &str) -> DatasetName {
        DatasetName::new(s).unwrap()
    }

    #[test]
    fn layout_creates_datasets_directory() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("quizlog_home");

        let layout = StoreLayout::new(home.clone()).unwrap();

        assert!(home.join("datasets").exists());
        assert_eq!(layout.home(), &home);
    }

    #[test]
    fn paths_are_scoped_per_dataset() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path().to_path_buf()).unwrap();
        let players = name("players");

        assert_eq!(
            layout.log_path(&players),
            dir.path().join("datasets/players/log.jsonl")
        );
        assert_eq!(
            layout.snapshot_path(&players),
            dir.path().join("datasets/players/snapshot.json")
        );
        assert_eq!(
            layout.backups_dir(&players),
            dir.path().join("datasets/players/backups")
        );
    }

    #[test]
    fn list_datasets_skips_files_and_bad_names() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path().to_path_buf()).unwrap();

        fs::create_dir_all(layout.dataset_dir(&name("tokens"))).unwrap();
        fs::create_dir_all(layout.dataset_dir(&name("players"))).unwrap();
        fs::create_dir_all(dir.path().join("datasets").join("not.valid")).unwrap();
        fs::write(dir.path().join("datasets").join("stray.txt"), "x").unwrap();

        let datasets = layout.list_datasets().unwrap();
        assert_eq!(datasets, vec![name("players"), name("tokens")]);
    }
}
