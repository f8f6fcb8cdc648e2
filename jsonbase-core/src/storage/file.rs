// jsonbase-core/src/storage/file.rs
//! File-backed storage implementations
//!
//! One directory holds everything: a `.json` file per blob, a single
//! properties file for the property store, and a `.lock` file for the
//! cross-process script lock (advisory `flock` on Unix, lock-file creation
//! elsewhere).

use crate::error::{JsonBaseError, Result};
use crate::storage::traits::{BlobStore, PropertyStore, ScriptLock};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Blob store keeping one JSON file per blob under a root directory
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FileBlobStore { root })
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        // File ids are flat names; anything path-like is a caller bug
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(JsonBaseError::InvalidArgument(format!(
                "Invalid file id '{}'",
                id
            )));
        }
        Ok(self.root.join(id))
    }
}

impl BlobStore for FileBlobStore {
    fn read_file(&self, id: &str) -> Result<Value> {
        let path = self.path_for(id)?;
        let raw = fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| {
            JsonBaseError::InvalidFileFormat(format!("Blob '{}' is not valid JSON: {}", id, e))
        })
    }

    fn write_file(&self, id: &str, content: &Value) -> Result<()> {
        let path = self.path_for(id)?;
        let serialised = serde_json::to_string(content)
            .map_err(|e| JsonBaseError::InvalidFileFormat(e.to_string()))?;

        // Write-then-rename keeps readers from seeing a half-written blob
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serialised)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn create_file(&self, name: &str) -> Result<String> {
        let slug: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let id = format!("{}-{}.json", slug, Uuid::new_v4());
        self.write_file(&id, &serde_json::json!({}))?;
        Ok(id)
    }

    fn delete_file(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        fs::remove_file(&path)?;
        Ok(())
    }
}

/// Property store persisted as a single JSON object file
pub struct FilePropertyStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within this process
    guard: Mutex<()>,
}

impl FilePropertyStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(FilePropertyStore {
            path,
            guard: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            JsonBaseError::InvalidFileFormat(format!("Property file is not valid JSON: {}", e))
        })
    }

    fn store(&self, props: &HashMap<String, String>) -> Result<()> {
        let serialised = serde_json::to_string(props)
            .map_err(|e| JsonBaseError::InvalidFileFormat(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serialised)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl PropertyStore for FilePropertyStore {
    fn get_property(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.guard.lock();
        Ok(self.load()?.get(key).cloned())
    }

    fn set_property(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.guard.lock();
        let mut props = self.load()?;
        props.insert(key.to_string(), value.to_string());
        self.store(&props)
    }

    fn delete_property(&self, key: &str) -> Result<()> {
        let _guard = self.guard.lock();
        let mut props = self.load()?;
        props.remove(key);
        self.store(&props)
    }
}

/// Cross-process script lock backed by a lock file
///
/// On Unix the lock is an advisory exclusive `flock`, released explicitly
/// or when the process dies. On other platforms the lock is the existence
/// of the file itself (`create_new`), released by deleting it.
pub struct FileScriptLock {
    path: PathBuf,
    held: Mutex<Option<File>>,
}

impl FileScriptLock {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(FileScriptLock {
            path,
            held: Mutex::new(None),
        })
    }

    #[cfg(unix)]
    fn try_acquire(&self) -> Result<Option<File>> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.path)?;

        let fd = file.as_raw_fd();
        let rc = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            Ok(Some(file))
        } else {
            Ok(None)
        }
    }

    #[cfg(not(unix))]
    fn try_acquire(&self) -> Result<Option<File>> {
        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.path)
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(unix)]
    fn release_file(&self, file: File) {
        use std::os::unix::io::AsRawFd;
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        drop(file);
    }

    #[cfg(not(unix))]
    fn release_file(&self, file: File) {
        drop(file);
        let _ = fs::remove_file(&self.path);
    }
}

impl ScriptLock for FileScriptLock {
    fn wait_lock(&self, timeout_ms: u64) -> Result<bool> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(file) = self.try_acquire()? {
                *self.held.lock() = Some(file);
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    fn release_lock(&self) {
        if let Some(file) = self.held.lock().take() {
            self.release_file(file);
        }
    }
}
