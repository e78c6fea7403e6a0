//! Key-value backends holding serialized snapshots.
//!
//! Mirrors the `getItem` / `setItem` contract of browser local storage: values are
//! opaque strings, a missing key reads as `None`, and a write replaces the whole value.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage is read-only")]
    ReadOnly,
}

pub type KvResult<T> = Result<T, KvError>;

pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> KvResult<Option<String>>;

    fn set_item(&mut self, key: &str, value: &str) -> KvResult<()>;
}

/// One file per key under a root directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    root: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn item_path(&self, key: &str) -> KvResult<PathBuf> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(KvError::InvalidKey(key.to_owned()));
        }

        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get_item(&self, key: &str) -> KvResult<Option<String>> {
        let path = self.item_path(key)?;
        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(fs::read_to_string(path)?))
    }

    fn set_item(&mut self, key: &str, value: &str) -> KvResult<()> {
        let path = self.item_path(key)?;
        fs::create_dir_all(&self.root)?;

        // Write atomically using a temporary file
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, value)?;
        fs::rename(&temp_path, &path)?;

        log::debug!("wrote {} bytes to {}", value.len(), path.display());
        Ok(())
    }
}

/// In-process storage for tests and throwaway sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    items: HashMap<String, String>,
    read_only: bool,
    writes: usize,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(key: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.items.insert(key.to_owned(), value.to_owned());
        store
    }

    /// Makes every subsequent `set_item` fail, as a full or locked backend would.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Number of successful writes since creation.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get_item(&self, key: &str) -> KvResult<Option<String>> {
        Ok(self.items.get(key).cloned())
    }

    fn set_item(&mut self, key: &str, value: &str) -> KvResult<()> {
        if self.read_only {
            return Err(KvError::ReadOnly);
        }

        self.items.insert(key.to_owned(), value.to_owned());
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_reads_back_what_it_wrote() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut store = FileKeyValueStore::new(temp.path().join("nested"));

        assert_eq!(store.get_item("mapLayers").expect("read should succeed"), None);

        store.set_item("mapLayers", "[]").expect("write should succeed");
        store.set_item("mapLayers", "[1]").expect("overwrite should succeed");

        assert_eq!(store.get_item("mapLayers").expect("read should succeed").as_deref(), Some("[1]"));
        assert!(!temp.path().join("nested/mapLayers.tmp").exists());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let mut store = FileKeyValueStore::new(temp.path());

        assert!(matches!(store.set_item("../escape", "x"), Err(KvError::InvalidKey(_))));
        assert!(matches!(store.get_item(""), Err(KvError::InvalidKey(_))));
    }

    #[test]
    fn read_only_memory_store_refuses_writes() {
        let mut store = MemoryKeyValueStore::with_item("k", "v");
        store.set_read_only(true);

        assert!(matches!(store.set_item("k", "w"), Err(KvError::ReadOnly)));
        assert_eq!(store.get_item("k").expect("read should succeed").as_deref(), Some("v"));
        assert_eq!(store.writes(), 0);
    }
}
