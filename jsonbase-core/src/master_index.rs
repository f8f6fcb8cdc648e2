// jsonbase-core/src/master_index.rs
//! Master index: the authoritative registry of collections
//!
//! The whole registry is one JSON payload stored under a single property
//! key. Every process sharing the property store sees the same payload;
//! mutation is only legal while holding the process-level exclusion, which
//! [`MasterIndex`] enforces by routing every write through the lock
//! service.
//!
//! Payload shape:
//!
//! ```text
//! {
//!   "version": 1,
//!   "collections": { "<name>": <CollectionMetadata>, ... },
//!   "lastUpdated": { "__type": "Date", "value": "..." },
//!   "locks": { "<name>": <LockStatus>, ... }
//! }
//! ```

use crate::date_tag;
use crate::error::{JsonBaseError, Result};
use crate::lock_service::{LockService, DEFAULT_EXCLUSION_TIMEOUT_MS};
use crate::metadata::{now_ms, CollectionMetadata, LockStatus};
use crate::storage::PropertyStore;
use crate::log_debug;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Default property-store key for the master index payload
pub const DEFAULT_MASTER_INDEX_KEY: &str = "JSONBASE_MASTER_INDEX";

/// Current payload format version
pub const MASTER_INDEX_VERSION: u32 = 1;

/// The persisted master-index payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterIndexData {
    pub version: u32,
    pub collections: HashMap<String, CollectionMetadata>,
    #[serde(rename = "lastUpdated", with = "date_tag::tagged")]
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub locks: HashMap<String, LockStatus>,
}

impl MasterIndexData {
    pub fn new() -> Self {
        MasterIndexData {
            version: MASTER_INDEX_VERSION,
            collections: HashMap::new(),
            last_updated: now_ms(),
            locks: HashMap::new(),
        }
    }

    /// Read the payload from the property store
    ///
    /// `Ok(None)` when the key is absent; `MasterIndex` errors for corrupt
    /// or structurally invalid payloads.
    pub fn load(props: &dyn PropertyStore, key: &str) -> Result<Option<Self>> {
        let raw = match props.get_property(key)? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let data: MasterIndexData = serde_json::from_str(&raw).map_err(|e| {
            JsonBaseError::MasterIndex(format!("Corrupted master index payload: {}", e))
        })?;

        for (name, meta) in &data.collections {
            if meta.name() != name {
                return Err(JsonBaseError::MasterIndex(format!(
                    "Master index entry '{}' carries mismatched name '{}'",
                    name,
                    meta.name()
                )));
            }
        }

        Ok(Some(data))
    }

    pub fn load_or_default(props: &dyn PropertyStore, key: &str) -> Result<Self> {
        Ok(Self::load(props, key)?.unwrap_or_else(Self::new))
    }

    /// Persist the payload under the property key
    pub fn store(&self, props: &dyn PropertyStore, key: &str) -> Result<()> {
        let raw = serde_json::to_string(self)
            .map_err(|e| JsonBaseError::MasterIndex(format!("Serialisation failed: {}", e)))?;
        props.set_property(key, &raw)
    }

    pub fn touch(&mut self) {
        self.last_updated = now_ms();
    }
}

impl Default for MasterIndexData {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry operations over the shared payload
pub struct MasterIndex {
    props: Arc<dyn PropertyStore>,
    lock_service: Arc<LockService>,
    key: String,
}

impl MasterIndex {
    pub fn new(
        props: Arc<dyn PropertyStore>,
        lock_service: Arc<LockService>,
        key: &str,
    ) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(JsonBaseError::InvalidArgument(
                "masterIndexKey must be a non-empty string".to_string(),
            ));
        }
        Ok(MasterIndex {
            props,
            lock_service,
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// True iff the property-store entry exists
    pub fn is_initialised(&self) -> Result<bool> {
        Ok(self.props.get_property(&self.key)?.is_some())
    }

    /// Write an empty payload; fails if one already exists
    pub fn initialise_empty(&self) -> Result<()> {
        self.lock_service
            .with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
                if self.props.get_property(&self.key)?.is_some() {
                    return Err(JsonBaseError::MasterIndex(format!(
                        "Master index already exists under key '{}'",
                        self.key
                    )));
                }
                MasterIndexData::new().store(&*self.props, &self.key)
            })
    }

    /// Current payload; fails when absent or corrupt
    pub fn load_data(&self) -> Result<MasterIndexData> {
        MasterIndexData::load(&*self.props, &self.key)?.ok_or_else(|| {
            JsonBaseError::MasterIndex(format!(
                "Master index not initialised under key '{}'",
                self.key
            ))
        })
    }

    /// Replace the whole payload (used by recovery)
    pub fn replace_data(&self, data: &MasterIndexData) -> Result<()> {
        self.lock_service
            .with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
                data.store(&*self.props, &self.key)
            })
    }

    /// Insert or overwrite a collection entry
    ///
    /// Normalises the record: a missing modification token gets a freshly
    /// generated one. Duplicate names overwrite the previous entry.
    pub fn add_collection(
        &self,
        name: &str,
        metadata: CollectionMetadata,
    ) -> Result<CollectionMetadata> {
        if metadata.name() != name {
            return Err(JsonBaseError::InvalidArgument(format!(
                "Metadata name '{}' does not match collection name '{}'",
                metadata.name(),
                name
            )));
        }

        let mut metadata = metadata;
        if metadata.modification_token().is_none() {
            metadata.set_modification_token(Some(self.generate_modification_token()))?;
        }

        self.lock_service
            .with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
                let mut data = MasterIndexData::load_or_default(&*self.props, &self.key)?;
                data.collections
                    .insert(name.to_string(), metadata.clone());
                data.touch();
                data.store(&*self.props, &self.key)?;
                log_debug!("Registered collection '{}'", name);
                Ok(metadata.clone())
            })
    }

    /// Remove a collection entry (idempotent)
    pub fn remove_collection(&self, name: &str) -> Result<bool> {
        self.lock_service
            .with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
                let mut data = MasterIndexData::load_or_default(&*self.props, &self.key)?;
                let removed = data.collections.remove(name).is_some();
                if removed {
                    data.locks.remove(name);
                    data.touch();
                    data.store(&*self.props, &self.key)?;
                    log_debug!("Removed collection '{}'", name);
                }
                Ok(removed)
            })
    }

    pub fn get_collection(&self, name: &str) -> Result<Option<CollectionMetadata>> {
        let data = MasterIndexData::load_or_default(&*self.props, &self.key)?;
        Ok(data.collections.get(name).cloned())
    }

    /// All registered collections, sorted by name
    pub fn get_collections(&self) -> Result<Vec<CollectionMetadata>> {
        let data = MasterIndexData::load_or_default(&*self.props, &self.key)?;
        let mut collections: Vec<CollectionMetadata> =
            data.collections.into_values().collect();
        collections.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(collections)
    }

    /// Merge changes into one collection's record
    pub fn update_collection_metadata<F>(&self, name: &str, apply: F) -> Result<CollectionMetadata>
    where
        F: FnOnce(&mut CollectionMetadata) -> Result<()>,
    {
        self.lock_service
            .with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
                let mut data = MasterIndexData::load_or_default(&*self.props, &self.key)?;
                let meta = data.collections.get_mut(name).ok_or_else(|| {
                    JsonBaseError::CollectionNotFound(name.to_string())
                })?;

                apply(meta)?;
                let updated = meta.clone();

                data.touch();
                data.store(&*self.props, &self.key)?;
                Ok(updated)
            })
    }

    /// Opaque, unique, non-empty token (UUID v4)
    pub fn generate_modification_token(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryPropertyStore, MemoryScriptLock};

    fn index() -> (Arc<MemoryPropertyStore>, MasterIndex) {
        let props: Arc<MemoryPropertyStore> = Arc::new(MemoryPropertyStore::new());
        let lock_service = Arc::new(
            LockService::new(
                props.clone(),
                Arc::new(MemoryScriptLock::new()),
                DEFAULT_MASTER_INDEX_KEY,
            )
            .unwrap(),
        );
        let idx = MasterIndex::new(props.clone(), lock_service, DEFAULT_MASTER_INDEX_KEY).unwrap();
        (props, idx)
    }

    fn meta(name: &str) -> CollectionMetadata {
        CollectionMetadata::new(name, &format!("{}-file", name)).unwrap()
    }

    #[test]
    fn test_initialise_and_is_initialised() {
        let (_props, idx) = index();
        assert!(!idx.is_initialised().unwrap());

        idx.initialise_empty().unwrap();
        assert!(idx.is_initialised().unwrap());

        // Second initialise fails
        assert!(matches!(
            idx.initialise_empty().unwrap_err(),
            JsonBaseError::MasterIndex(_)
        ));
    }

    #[test]
    fn test_add_and_get_collection() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();

        let stored = idx.add_collection("users", meta("users")).unwrap();
        // Token generated during normalisation
        assert!(stored.modification_token().is_some());

        let loaded = idx.get_collection("users").unwrap().unwrap();
        assert_eq!(loaded.name(), "users");
        assert_eq!(loaded.modification_token(), stored.modification_token());

        assert!(idx.get_collection("ghost").unwrap().is_none());
    }

    #[test]
    fn test_add_collection_name_mismatch() {
        let (_props, idx) = index();
        let err = idx.add_collection("users", meta("posts")).unwrap_err();
        assert!(matches!(err, JsonBaseError::InvalidArgument(_)));
    }

    #[test]
    fn test_add_collection_overwrites_duplicate() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();

        let first = idx.add_collection("users", meta("users")).unwrap();
        let mut second = meta("users");
        second.set_document_count(5);
        idx.add_collection("users", second).unwrap();

        let loaded = idx.get_collection("users").unwrap().unwrap();
        assert_eq!(loaded.document_count(), 5);
        assert_ne!(loaded.file_id(), "");
        // Overwrite replaced the record wholesale
        assert_ne!(
            loaded.modification_token(),
            first.modification_token()
        );
    }

    #[test]
    fn test_remove_collection_idempotent() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();
        idx.add_collection("users", meta("users")).unwrap();

        assert!(idx.remove_collection("users").unwrap());
        assert!(!idx.remove_collection("users").unwrap());
        assert!(idx.get_collection("users").unwrap().is_none());
    }

    #[test]
    fn test_get_collections_sorted() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();
        idx.add_collection("zebra", meta("zebra")).unwrap();
        idx.add_collection("alpha", meta("alpha")).unwrap();

        let names: Vec<String> = idx
            .get_collections()
            .unwrap()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zebra"]);
    }

    #[test]
    fn test_update_collection_metadata() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();
        idx.add_collection("users", meta("users")).unwrap();

        let updated = idx
            .update_collection_metadata("users", |m| {
                m.set_document_count(42);
                m.set_modification_token(Some("tok-next".to_string()))
            })
            .unwrap();
        assert_eq!(updated.document_count(), 42);

        let loaded = idx.get_collection("users").unwrap().unwrap();
        assert_eq!(loaded.document_count(), 42);
        assert_eq!(loaded.modification_token(), Some("tok-next"));
    }

    #[test]
    fn test_update_unknown_collection() {
        let (_props, idx) = index();
        idx.initialise_empty().unwrap();
        let err = idx
            .update_collection_metadata("ghost", |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, JsonBaseError::CollectionNotFound(_)));
    }

    #[test]
    fn test_corrupted_payload_is_master_index_error() {
        let (props, idx) = index();
        props
            .set_property(DEFAULT_MASTER_INDEX_KEY, "{ not json")
            .unwrap();

        assert!(matches!(
            idx.load_data().unwrap_err(),
            JsonBaseError::MasterIndex(_)
        ));
        assert!(matches!(
            idx.get_collection("users").unwrap_err(),
            JsonBaseError::MasterIndex(_)
        ));
    }

    #[test]
    fn test_structural_validation_of_payload() {
        let (props, idx) = index();
        // Entry keyed "users" but carrying name "posts"
        let bad = serde_json::json!({
            "version": 1,
            "collections": {
                "users": {
                    "name": "posts",
                    "fileId": "f1",
                    "documentCount": 0,
                    "modificationToken": "t",
                    "lockStatus": null
                }
            },
            "lastUpdated": crate::date_tag::encode(&now_ms()),
            "locks": {}
        });
        props
            .set_property(DEFAULT_MASTER_INDEX_KEY, &bad.to_string())
            .unwrap();

        assert!(matches!(
            idx.load_data().unwrap_err(),
            JsonBaseError::MasterIndex(_)
        ));
    }

    #[test]
    fn test_generate_modification_token_unique() {
        let (_props, idx) = index();
        let a = idx.generate_modification_token();
        let b = idx.generate_modification_token();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }

    #[test]
    fn test_payload_round_trip_preserves_locks() {
        let (props, _idx) = index();
        let mut data = MasterIndexData::new();
        data.locks.insert(
            "users".to_string(),
            LockStatus::acquired("op-1", 1_000, 30_000),
        );
        data.store(&*props, DEFAULT_MASTER_INDEX_KEY).unwrap();

        let loaded = MasterIndexData::load(&*props, DEFAULT_MASTER_INDEX_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.locks.get("users").unwrap().locked_by.as_deref(), Some("op-1"));
        assert_eq!(loaded.version, MASTER_INDEX_VERSION);
    }
}
