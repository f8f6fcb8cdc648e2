// jsonbase-core/src/storage/traits.rs
//! Storage abstraction traits for JsonBase
//!
//! The database core never touches a platform API directly. It talks to
//! three narrow interfaces:
//!
//! ```text
//! BlobStore      - whole-file JSON read/write (one blob per collection)
//!   ├── FileBlobStore   (production, one .json file per blob)
//!   └── MemoryBlobStore (testing, in-memory map)
//! PropertyStore  - small process-wide key/value store (master index home)
//! ScriptLock     - cross-process mutual exclusion primitive
//! ```
//!
//! Implementations must be safe to share behind `Arc` across threads.

use crate::error::Result;
use serde_json::Value;

/// Whole-blob JSON storage
///
/// A blob is addressed by an opaque file id. `read_file` returns the parsed
/// JSON content; `write_file` replaces it with a canonical serialisation.
/// Timestamps inside blobs travel as Date-tagged objects, so a round trip
/// yields timestamp-equal values.
pub trait BlobStore: Send + Sync {
    /// Read and parse a blob
    ///
    /// Fails with `FileNotFound` for unknown ids and `InvalidFileFormat`
    /// for unparseable content.
    fn read_file(&self, id: &str) -> Result<Value>;

    /// Overwrite a blob with the serialised content
    fn write_file(&self, id: &str, content: &Value) -> Result<()>;

    /// Provision a new empty blob, returning its id
    fn create_file(&self, name: &str) -> Result<String>;

    /// Remove a blob
    fn delete_file(&self, id: &str) -> Result<()>;
}

/// Process-wide string key/value store
///
/// Holds the master index payload and any future coordination state. Keys
/// and values are plain strings; structure is the caller's business.
pub trait PropertyStore: Send + Sync {
    fn get_property(&self, key: &str) -> Result<Option<String>>;

    fn set_property(&self, key: &str, value: &str) -> Result<()>;

    fn delete_property(&self, key: &str) -> Result<()>;
}

/// Cross-process mutual exclusion
///
/// `wait_lock` blocks up to the timeout and reports whether the lock was
/// obtained; `release_lock` must only be called after a successful wait.
/// The lock service wraps every acquisition in an RAII guard so release
/// runs on all exit paths.
pub trait ScriptLock: Send + Sync {
    fn wait_lock(&self, timeout_ms: u64) -> Result<bool>;

    fn release_lock(&self);
}
