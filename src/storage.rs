//! Local key/value persistence for the saved session.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Serialized point collection written by an explicit save.
pub const SNAPSHOT_KEY: &str = "customPointsData";
/// Milliseconds since the epoch of the last successful remote fetch.
pub const LAST_FETCH_KEY: &str = "lastFetchTime";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read {key}: {source}")]
    Read { key: String, source: io::Error },
    #[error("failed to write {key}: {source}")]
    Write { key: String, source: io::Error },
}

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Read {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            key: key.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        // Write then rename so a crash mid-save leaves the previous value.
        let tmp = self.dir.join(format!(".{key}.tmp"));
        fs::write(&tmp, value).map_err(write_err)?;
        fs::rename(&tmp, self.path(key)).map_err(write_err)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.entries.insert(key.to_string(), value.into());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_store_round_trips_and_reports_missing() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::new(dir.path().join("session"));

        assert_eq!(store.get(SNAPSHOT_KEY).unwrap(), None);

        store.set(SNAPSHOT_KEY, "{\"type\":\"FeatureCollection\",\"features\":[]}").unwrap();
        store.set(LAST_FETCH_KEY, "1700000000000").unwrap();
        store.set(LAST_FETCH_KEY, "1700000000001").unwrap();

        assert_eq!(
            store.get(LAST_FETCH_KEY).unwrap().as_deref(),
            Some("1700000000001")
        );
        assert!(store.get(SNAPSHOT_KEY).unwrap().is_some());
    }

    #[test]
    fn memory_store_overwrites() {
        let mut store = MemoryStore::new().with("a", "1");
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("b").unwrap(), None);
    }
}
