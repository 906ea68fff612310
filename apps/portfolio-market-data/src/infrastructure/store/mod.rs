//! Key-Value Store Adapters
//!
//! - [`InMemoryStore`]: process-local, for tests and ephemeral runs
//! - [`JsonFileStore`]: a single JSON object on disk, rewritten on every `set`

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::application::ports::{KeyValueStore, StoreError};

// =============================================================================
// In-Memory Store
// =============================================================================

/// Volatile store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// =============================================================================
// JSON File Store
// =============================================================================

/// Store persisted as one JSON object of string values.
///
/// The file is read once on open; writes replace it through a sibling
/// temporary file so a crash never leaves a truncated document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open the store, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file exists but cannot be read or is not
    /// a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = values.len(), "Opened state file");

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let document = serde_json::to_string_pretty(values)?;
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, document)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock();
        let previous = values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&values) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => values.insert(key.to_string(), old),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("api_key").unwrap(), None);

        store.set("api_key", "abc").unwrap();
        store.set("api_key", "def").unwrap();

        assert_eq!(store.get("api_key").unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn file_store_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("state.json")).unwrap();

        assert_eq!(store.get("anything").unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.set("api_key", "abc").unwrap();
        store.set("portfolio_state", r#"{"entries":[]}"#).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("api_key").unwrap().as_deref(), Some("abc"));
        assert_eq!(
            reopened.get("portfolio_state").unwrap().as_deref(),
            Some(r#"{"entries":[]}"#)
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Encoding(_))
        ));
    }

    #[test]
    fn failed_write_leaves_value_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("state.json");
        let store = JsonFileStore::open(&path).unwrap();

        assert!(matches!(store.set("api_key", "abc"), Err(StoreError::Io(_))));
        assert_eq!(store.get("api_key").unwrap(), None);
    }
}
