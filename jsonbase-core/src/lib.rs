// jsonbase-core/src/lib.rs
// Pure Rust core - no host-platform bindings

#![allow(clippy::result_large_err)]
#![allow(clippy::too_many_arguments)]
// Tests may have helper functions not used in all test cases
#![cfg_attr(test, allow(dead_code))]

pub mod collection;
pub mod coordinator;
pub mod database;
pub mod date_tag;
pub mod error;
pub mod field_path;
pub mod lock_service;
pub mod logging;
pub mod master_index;
pub mod metadata;
pub mod query;
pub mod storage;
pub mod update;
pub mod value_compare;

// Public exports
pub use collection::{
    Collection, DeleteResult, InsertManyResult, InsertOneResult, UpdateResult,
};
pub use coordinator::{Coordinated, Coordinator, CoordinatorConfig};
pub use database::{Database, DatabaseConfig};
pub use error::{JsonBaseError, Result};
pub use lock_service::LockService;
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use master_index::{MasterIndex, MasterIndexData};
pub use metadata::{CollectionMetadata, LockStatus};
pub use query::{QueryConfig, QueryEngine};
pub use storage::{
    BlobStore, FileBlobStore, FilePropertyStore, FileScriptLock, MemoryBlobStore,
    MemoryPropertyStore, MemoryScriptLock, PropertyStore, ScriptLock,
};
pub use update::UpdateEngine;
