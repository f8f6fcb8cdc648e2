// jsonbase-core/src/database.rs
//! Database facade
//!
//! Owns the master index, the lock service and the collection cache, and
//! wires injected storage backends (blob store, property store, script
//! lock) into everything below. Two `Database` values sharing the same
//! backends behave like two cooperating processes.

use crate::collection::Collection;
use crate::coordinator::CoordinatorConfig;
use crate::error::{JsonBaseError, Result};
use crate::lock_service::LockService;
use crate::logging::{set_log_level, LogLevel};
use crate::master_index::{MasterIndex, MasterIndexData, DEFAULT_MASTER_INDEX_KEY};
use crate::metadata::CollectionMetadata;
use crate::storage::{
    BlobStore, FileBlobStore, FilePropertyStore, FileScriptLock, MemoryBlobStore,
    MemoryPropertyStore, MemoryScriptLock, PropertyStore, ScriptLock,
};
use crate::{log_info, log_warn};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;

/// Characters never allowed in collection names
const FORBIDDEN_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Names reserved for internal use
const RESERVED_NAMES: &[&str] = &["index", "master", "system", "admin"];

/// Database-wide configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Directory (or folder id) holding all blobs for disk-backed databases
    pub root_folder_id: String,
    /// `collection()` provisions missing collections instead of failing
    pub auto_create_collections: bool,
    /// Virtual-lock hold duration and coordinated-operation deadline (ms)
    pub lock_timeout_ms: u64,
    /// Reuse `Collection` instances across `collection()` calls
    pub cache_enabled: bool,
    pub log_level: LogLevel,
    /// Property-store key of the master index payload
    pub master_index_key: String,
    /// Write a backup blob of the master index during `initialise()`
    pub backup_on_initialise: bool,
    /// Strip forbidden characters from collection names instead of rejecting
    pub strip_disallowed_collection_name_characters: bool,
    /// Correctness escape hatch: `false` disables ALL cross-process
    /// locking and token checking. Single-process use only.
    pub coordination_enabled: bool,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            root_folder_id: String::new(),
            auto_create_collections: true,
            lock_timeout_ms: 30_000,
            cache_enabled: true,
            log_level: LogLevel::Warn,
            master_index_key: DEFAULT_MASTER_INDEX_KEY.to_string(),
            backup_on_initialise: false,
            strip_disallowed_collection_name_characters: false,
            coordination_enabled: true,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

/// Entry point: opens or creates the database and provisions collections
pub struct Database {
    config: DatabaseConfig,
    blob_store: Arc<dyn BlobStore>,
    master_index: Arc<MasterIndex>,
    lock_service: Arc<LockService>,
    collections: DashMap<String, Arc<Collection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Wire a database onto injected storage backends
    pub fn new(
        config: DatabaseConfig,
        blob_store: Arc<dyn BlobStore>,
        props: Arc<dyn PropertyStore>,
        script_lock: Arc<dyn ScriptLock>,
    ) -> Result<Self> {
        if config.master_index_key.trim().is_empty() {
            return Err(JsonBaseError::Configuration(
                "masterIndexKey must be a non-empty string".to_string(),
            ));
        }

        set_log_level(config.log_level);

        let lock_service = Arc::new(LockService::new(
            props.clone(),
            script_lock,
            &config.master_index_key,
        )?);
        let master_index = Arc::new(MasterIndex::new(
            props,
            lock_service.clone(),
            &config.master_index_key,
        )?);

        Ok(Database {
            config,
            blob_store,
            master_index,
            lock_service,
            collections: DashMap::new(),
        })
    }

    /// In-memory database (testing and embedding)
    pub fn open_in_memory(config: DatabaseConfig) -> Result<Self> {
        Database::new(
            config,
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryPropertyStore::new()),
            Arc::new(MemoryScriptLock::new()),
        )
    }

    /// Disk-backed database rooted at `config.root_folder_id`
    pub fn open_on_disk(config: DatabaseConfig) -> Result<Self> {
        if config.root_folder_id.trim().is_empty() {
            return Err(JsonBaseError::Configuration(
                "rootFolderId must point at a directory for disk-backed databases".to_string(),
            ));
        }

        let root = std::path::Path::new(&config.root_folder_id);
        let blob_store = Arc::new(FileBlobStore::new(root)?);
        let props = Arc::new(FilePropertyStore::new(root.join("properties.json"))?);
        let script_lock = Arc::new(FileScriptLock::new(root.join("script.lock"))?);
        Database::new(config, blob_store, props, script_lock)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn master_index(&self) -> &Arc<MasterIndex> {
        &self.master_index
    }

    pub fn lock_service(&self) -> &Arc<LockService> {
        &self.lock_service
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Create a fresh master index; fails if one already exists
    pub fn create_database(&self) -> Result<()> {
        self.master_index.initialise_empty()?;
        log_info!(
            "Created database (master index key '{}')",
            self.config.master_index_key
        );
        Ok(())
    }

    /// Open an existing database; fails if the master index is absent or corrupt
    pub fn initialise(&self) -> Result<()> {
        if !self.master_index.is_initialised()? {
            return Err(JsonBaseError::MasterIndex(format!(
                "Master index not found under key '{}'; create the database first",
                self.config.master_index_key
            )));
        }

        // Surfaces corruption before any collection is touched
        let data = self.master_index.load_data()?;

        if self.config.backup_on_initialise {
            let backup_id = self.write_backup(&data)?;
            log_info!("Master index backed up to '{}'", backup_id);
        }

        Ok(())
    }

    /// Write a backup blob of the current master index, returning its id
    pub fn backup_master_index(&self) -> Result<String> {
        let data = self.master_index.load_data()?;
        self.write_backup(&data)
    }

    /// Restore the master index from a backup blob
    pub fn recover_database(&self, backup_file_id: &str) -> Result<()> {
        let payload = self.blob_store.read_file(backup_file_id)?;

        let data: MasterIndexData = serde_json::from_value(payload).map_err(|e| {
            JsonBaseError::MasterIndex(format!("Invalid backup structure: {}", e))
        })?;
        for (name, meta) in &data.collections {
            if meta.name() != name {
                return Err(JsonBaseError::MasterIndex(format!(
                    "Backup entry '{}' carries mismatched name '{}'",
                    name,
                    meta.name()
                )));
            }
        }

        self.master_index.replace_data(&data)?;
        self.collections.clear();
        log_info!(
            "Recovered master index from '{}' ({} collections)",
            backup_file_id,
            data.collections.len()
        );
        Ok(())
    }

    fn write_backup(&self, data: &MasterIndexData) -> Result<String> {
        let id = self.blob_store.create_file("master-index-backup")?;
        let payload = serde_json::to_value(data)
            .map_err(|e| JsonBaseError::MasterIndex(format!("Serialisation failed: {}", e)))?;
        self.blob_store.write_file(&id, &payload)?;
        Ok(id)
    }

    // ========================================================================
    // COLLECTIONS
    // ========================================================================

    /// Fetch a collection, provisioning it when `auto_create_collections`
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        let name = self.validate_collection_name(name)?;

        if self.config.cache_enabled {
            if let Some(cached) = self.collections.get(&name) {
                return Ok(cached.value().clone());
            }
        }

        match self.master_index.get_collection(&name)? {
            Some(meta) => {
                let collection = self.build_collection(&name, meta.file_id())?;
                if self.config.cache_enabled {
                    self.collections.insert(name, collection.clone());
                }
                Ok(collection)
            }
            None if self.config.auto_create_collections => self.create_collection(&name),
            None => Err(JsonBaseError::CollectionNotFound(name)),
        }
    }

    /// Provision a new collection; fails on duplicates
    pub fn create_collection(&self, name: &str) -> Result<Arc<Collection>> {
        let name = self.validate_collection_name(name)?;

        if self.master_index.get_collection(&name)?.is_some() {
            return Err(JsonBaseError::DuplicateKey(format!(
                "Collection '{}' already exists",
                name
            )));
        }

        let file_id = self.blob_store.create_file(&name)?;
        let metadata = self
            .master_index
            .add_collection(&name, CollectionMetadata::new(&name, &file_id)?)?;
        self.blob_store.write_file(
            &file_id,
            &json!({"documents": {}, "metadata": metadata.to_value()}),
        )?;

        let collection = self.build_collection(&name, &file_id)?;
        if self.config.cache_enabled {
            self.collections.insert(name.clone(), collection.clone());
        }
        log_info!("Created collection '{}' (blob '{}')", name, file_id);
        Ok(collection)
    }

    /// Remove a collection and its blob; reports whether it existed
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        let name = self.validate_collection_name(name)?;

        let meta = self.master_index.get_collection(&name)?;
        let removed = self.master_index.remove_collection(&name)?;

        if let Some(meta) = meta {
            match self.blob_store.delete_file(meta.file_id()) {
                Ok(()) => {}
                Err(JsonBaseError::FileNotFound(_)) => {
                    log_warn!("Blob '{}' already gone while dropping '{}'", meta.file_id(), name);
                }
                Err(e) => return Err(e),
            }
        }

        self.collections.remove(&name);
        if removed {
            log_info!("Dropped collection '{}'", name);
        }
        Ok(removed)
    }

    /// Names of all registered collections, sorted
    pub fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self
            .master_index
            .get_collections()?
            .iter()
            .map(|m| m.name().to_string())
            .collect())
    }

    fn build_collection(&self, name: &str, file_id: &str) -> Result<Arc<Collection>> {
        Ok(Arc::new(Collection::new(
            name,
            file_id,
            self.blob_store.clone(),
            self.master_index.clone(),
            self.lock_service.clone(),
            CoordinatorConfig {
                lock_timeout_ms: self.config.lock_timeout_ms,
                retry_attempts: self.config.retry_attempts,
                retry_delay_ms: self.config.retry_delay_ms,
                coordination_enabled: self.config.coordination_enabled,
            },
        )?))
    }

    /// Normalise and validate a collection name
    fn validate_collection_name(&self, name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(JsonBaseError::InvalidArgument(
                "Collection name must be a non-empty string".to_string(),
            ));
        }

        let name = if self.config.strip_disallowed_collection_name_characters {
            let stripped: String = name
                .chars()
                .filter(|c| !FORBIDDEN_NAME_CHARS.contains(c))
                .collect();
            if stripped.trim().is_empty() {
                return Err(JsonBaseError::InvalidArgument(format!(
                    "Collection name '{}' contains only disallowed characters",
                    name
                )));
            }
            stripped
        } else {
            if name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(&c)) {
                return Err(JsonBaseError::InvalidArgument(format!(
                    "Collection name '{}' contains disallowed characters",
                    name
                )));
            }
            name.to_string()
        };

        if RESERVED_NAMES.contains(&name.to_lowercase().as_str()) {
            return Err(JsonBaseError::InvalidArgument(format!(
                "Collection name '{}' is reserved",
                name
            )));
        }

        Ok(name)
    }
}
