//! Durable key-value slot backing the stash.
//!
//! The plugin only needs get/set/remove of one serialized blob under a
//! fixed key. [`FileStore`] keeps slots in a JSON file on disk;
//! [`MemoryStore`] backs tests and callers that want stashing without
//! persistence across restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Errors from slot operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A key-value slot store for serialized stash contents.
pub trait StashStore: Send {
    /// Returns the blob stored under `key`, if any.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` under `key`, replacing any previous blob.
    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes the blob under `key`. Removing an absent key is fine.
    fn clear(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Slot store persisted to a JSON file.
///
/// Slots are cached in memory and the whole map is rewritten on every
/// mutation.
pub struct FileStore {
    path: PathBuf,
    slots: HashMap<String, String>,
}

impl FileStore {
    /// Opens a file store, loading existing slots from disk.
    pub fn new(path: PathBuf) -> Result<Self, StoreError> {
        let slots = load_slots(&path)?;
        Ok(Self { path, slots })
    }

    fn persist(&self) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.slots)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        debug!("persisted {} slot(s) to {:?}", self.slots.len(), self.path);
        Ok(())
    }
}

impl StashStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.slots.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn clear(&mut self, key: &str) -> Result<(), StoreError> {
        if self.slots.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

/// In-memory slot store.
#[derive(Default)]
pub struct MemoryStore {
    slots: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StashStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.slots.get(key).cloned())
    }

    fn save(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&mut self, key: &str) -> Result<(), StoreError> {
        self.slots.remove(key);
        Ok(())
    }
}

fn load_slots(path: &Path) -> Result<HashMap<String, String>, StoreError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let slots: HashMap<String, String> = serde_json::from_str(&data)?;
    debug!("loaded {} slot(s) from {:?}", slots.len(), path);
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert!(store.load("k").unwrap().is_none());
        store.save("k", "v").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
        store.clear("k").unwrap();
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slots.json");

        let mut store = FileStore::new(path.clone()).unwrap();
        store.save("k", "v").unwrap();
        drop(store);

        let store = FileStore::new(path).unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn clearing_absent_key_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("slots.json")).unwrap();
        store.clear("missing").unwrap();
    }
}
