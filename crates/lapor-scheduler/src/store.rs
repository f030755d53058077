//! File-based and in-memory property stores.
//! The file store keeps every property in one JSON object, human-readable,
//! rewritten whole on each mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lapor_core::config::{StoreConfig, expand_path};
use lapor_core::error::{LaporError, Result};
use lapor_core::traits::PropertyStore;

use crate::persistence::SqliteStore;

/// JSON-file property store.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or create) a store backed by the given JSON file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cache = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            if json.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&json)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            cache: Mutex::new(cache),
        })
    }

    /// Write to a sibling temp file, then rename over the target.
    fn flush(&self, map: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("💾 Saved {} properties to {}", map.len(), self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.cache
            .lock()
            .map_err(|e| LaporError::Store(format!("Lock: {e}")))
    }
}

impl PropertyStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.lock()?;
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.lock()?;
        if map.remove(key).is_some() {
            self.flush(&map)?;
        }
        Ok(())
    }
}

/// Volatile store for tests and dry runs.
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropertyStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .map
            .lock()
            .map_err(|e| LaporError::Store(format!("Lock: {e}")))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|e| LaporError::Store(format!("Lock: {e}")))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self
            .map
            .lock()
            .map_err(|e| LaporError::Store(format!("Lock: {e}")))?;
        map.remove(key);
        Ok(())
    }
}

/// Open the backend named in config.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn PropertyStore>> {
    let path = expand_path(&config.path);
    match config.backend.as_str() {
        "sqlite" => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(SqliteStore::open(&path)?))
        }
        "file" => Ok(Arc::new(FileStore::open(&path)?)),
        "memory" => {
            tracing::warn!("⚠️ Using in-memory property store, queue will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        other => Err(LaporError::Config(format!("Unknown store backend: {other}"))),
    }
}
