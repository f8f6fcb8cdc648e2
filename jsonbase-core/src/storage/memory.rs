// jsonbase-core/src/storage/memory.rs
//! Pure in-memory storage implementations for fast testing
//!
//! These back the same traits as the file-based stores but keep everything
//! in HashMaps, so unit and integration tests run without touching disk.
//! Two databases sharing the same `Arc`s behave like two processes sharing
//! one backing store.

use crate::error::{JsonBaseError, Result};
use crate::storage::traits::{BlobStore, PropertyStore, ScriptLock};
use parking_lot::lock_api::{RawMutex as _, RawMutexTimed as _};
use parking_lot::{RawMutex, RwLock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// In-memory blob store (testing)
#[derive(Default)]
pub struct MemoryBlobStore {
    files: RwLock<HashMap<String, Value>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        MemoryBlobStore {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Number of blobs currently stored
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.files.read().contains_key(id)
    }
}

impl BlobStore for MemoryBlobStore {
    fn read_file(&self, id: &str) -> Result<Value> {
        self.files
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| JsonBaseError::FileNotFound(format!("No blob with id '{}'", id)))
    }

    fn write_file(&self, id: &str, content: &Value) -> Result<()> {
        self.files
            .write()
            .insert(id.to_string(), content.clone());
        Ok(())
    }

    fn create_file(&self, name: &str) -> Result<String> {
        let id = format!("{}-{}", name, Uuid::new_v4());
        self.files.write().insert(id.clone(), json!({}));
        Ok(id)
    }

    fn delete_file(&self, id: &str) -> Result<()> {
        match self.files.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(JsonBaseError::FileNotFound(format!(
                "No blob with id '{}'",
                id
            ))),
        }
    }
}

/// In-memory property store (testing)
#[derive(Default)]
pub struct MemoryPropertyStore {
    props: RwLock<HashMap<String, String>>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        MemoryPropertyStore {
            props: RwLock::new(HashMap::new()),
        }
    }
}

impl PropertyStore for MemoryPropertyStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        Ok(self.props.read().get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.props
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_property(&self, key: &str) -> Result<()> {
        self.props.write().remove(key);
        Ok(())
    }
}

/// In-process script lock (testing)
///
/// A timed raw mutex: `wait_lock` maps to `try_lock_for`, `release_lock`
/// to `unlock`. Release must follow a successful wait; the lock service's
/// guard enforces that pairing.
pub struct MemoryScriptLock {
    raw: RawMutex,
}

impl MemoryScriptLock {
    pub fn new() -> Self {
        MemoryScriptLock {
            raw: RawMutex::INIT,
        }
    }
}

impl Default for MemoryScriptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptLock for MemoryScriptLock {
    fn wait_lock(&self, timeout_ms: u64) -> Result<bool> {
        Ok(self.raw.try_lock_for(Duration::from_millis(timeout_ms)))
    }

    fn release_lock(&self) {
        // Pairing with a successful wait_lock is the guard's invariant
        unsafe { self.raw.unlock() }
    }
}
