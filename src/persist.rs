//! Pluggable key/value persistence for store slices.
//!
//! [`Storage`] is the boundary the persistence middleware writes through.
//! [`MemoryStorage`] backs tests; [`JsonFileStorage`] keeps one JSON document
//! per key under a root directory.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::Value;

/// Key/value persistence boundary.
///
/// Loading an absent key is an error, not a default value; callers decide
/// what absence means. See [`Error::is_not_found`].
pub trait Storage {
    fn save(&self, key: &str, value: &Value) -> Result<()>;
    fn load(&self, key: &str) -> Result<Value>;
    /// Removing an absent key is a no-op.
    fn remove(&self, key: &str) -> Result<()>;
}

// =============================================================================
// In-memory storage
// =============================================================================

/// Volatile [`Storage`] for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Value> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                key: key.to_string(),
            })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// =============================================================================
// JSON file storage
// =============================================================================

/// [`Storage`] backed by one `<key>.json` file per key.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    root: PathBuf,
}

impl JsonFileStorage {
    /// Use (and create, if needed) `root` as the storage directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl Storage for JsonFileStorage {
    fn save(&self, key: &str, value: &Value) -> Result<()> {
        let path = self.path_for(key);
        let encoded = serde_json::to_string_pretty(value)?;
        fs::write(&path, encoded)?;
        trace!(%key, path = %path.display(), "saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Value> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    key: key.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
