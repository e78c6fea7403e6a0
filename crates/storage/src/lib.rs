use directories::ProjectDirs;
use map_model::MapSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub mod annotation_store;
pub mod kv;

pub use annotation_store::{AnnotationStore, StoreError, StoreResult};
pub use kv::{FileKeyValueStore, KeyValueStore, KvError, KvResult, MemoryKeyValueStore};

const SETTINGS_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unable to resolve local data directory")]
    NoDataDirectory,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Application data root: settings file plus the local key-value area.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsEnvelope {
    version: u32,
    settings: MapSettings,
}

impl Storage {
    pub fn from_default_project() -> Result<Self, StorageError> {
        let dirs =
            ProjectDirs::from("dev", "Zonemap", "zonemap").ok_or(StorageError::NoDataDirectory)?;

        Ok(Self { root: dirs.data_local_dir().to_path_buf() })
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load_settings(&self) -> Result<MapSettings, StorageError> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(MapSettings::default());
        }

        let bytes = fs::read(path)?;
        let envelope: SettingsEnvelope = serde_json::from_slice(&bytes)?;

        Ok(envelope.settings)
    }

    pub fn save_settings(&self, settings: &MapSettings) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;

        let envelope =
            SettingsEnvelope { version: SETTINGS_SCHEMA_VERSION, settings: settings.clone() };

        let bytes = serde_json::to_vec_pretty(&envelope)?;
        fs::write(self.settings_path(), bytes)?;
        Ok(())
    }

    pub fn key_value_store(&self) -> FileKeyValueStore {
        FileKeyValueStore::new(self.root.join("local-storage"))
    }

    /// Annotation store over this root, loaded under the key from `settings`.
    pub fn open_annotations(&self, settings: &MapSettings) -> AnnotationStore<FileKeyValueStore> {
        AnnotationStore::open(self.key_value_store(), settings.storage_key.clone())
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join("settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let settings = MapSettings {
            storage_key: "layers".to_owned(),
            single_pending_marker: false,
            ..MapSettings::default()
        };

        store.save_settings(&settings).expect("save should succeed");
        let loaded = store.load_settings().expect("load should succeed");

        assert_eq!(loaded, settings);
    }

    #[test]
    fn load_defaults_when_file_absent() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());

        let loaded = store.load_settings().expect("load should succeed");
        assert_eq!(loaded, MapSettings::default());
    }

    #[test]
    fn annotations_use_configured_key() {
        let temp = tempfile::tempdir().expect("temp dir should be created");
        let store = Storage::with_root(temp.path());
        let settings = MapSettings { storage_key: "zonas".to_owned(), ..MapSettings::default() };

        let mut annotations = store.open_annotations(&settings);
        annotations.add_marker(20.6, -87.07, "").expect("add should succeed");

        assert!(temp.path().join("local-storage/zonas.json").exists());
        assert_eq!(store.open_annotations(&settings).len(), 1);
        assert!(store.open_annotations(&MapSettings::default()).is_empty());
    }
}
