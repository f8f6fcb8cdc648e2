// jsonbase-core/src/coordinator.rs
//! Per-collection operation coordination
//!
//! Every mutating collection operation runs inside [`Coordinator::coordinate`]:
//!
//! ```text
//! Start -> AcquiringLock -> (Retrying | Conflict -> Reload ->) Executing
//!       -> Committing -> Released
//! ```
//!
//! The coordinator takes the collection's virtual lock (with retries),
//! compares the in-memory modification token against the master index
//! (reloading once on mismatch), runs the callback, persists the blob,
//! writes a fresh token to both the collection and the index, and releases
//! the lock on every exit path. Callback errors propagate verbatim after
//! release.

use crate::error::{JsonBaseError, Result};
use crate::lock_service::LockService;
use crate::master_index::MasterIndex;
use crate::{log_debug, log_warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Tuning for coordinated operations
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Virtual-lock hold duration and operation deadline (ms)
    pub lock_timeout_ms: u64,
    /// Additional lock acquisition attempts after the first
    pub retry_attempts: u32,
    /// Sleep between acquisition attempts (ms)
    pub retry_delay_ms: u64,
    /// When false, ALL locking and token checking is bypassed. Safe only
    /// when exactly one process touches the backing store.
    pub coordination_enabled: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            lock_timeout_ms: 30_000,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
            coordination_enabled: true,
        }
    }
}

/// What the coordinator needs from the object it protects
///
/// `Collection` implements this; the coordinator holds no back-reference
/// and receives the target per call.
pub trait Coordinated {
    fn collection_name(&self) -> String;

    /// In-memory modification token
    fn modification_token(&self) -> Option<String>;

    fn set_modification_token(&self, token: Option<String>) -> Result<()>;

    /// Discard in-memory state and re-read blob + index metadata
    fn reload(&self) -> Result<()>;

    /// Write the blob if dirty
    fn persist(&self) -> Result<()>;

    /// Current number of documents held in memory
    fn document_count(&self) -> u64;
}

/// Wraps collection operations in lock acquisition, token validation,
/// conflict resolution and master-index synchronisation
pub struct Coordinator {
    master_index: Arc<MasterIndex>,
    lock_service: Arc<LockService>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        master_index: Arc<MasterIndex>,
        lock_service: Arc<LockService>,
        config: CoordinatorConfig,
    ) -> Self {
        Coordinator {
            master_index,
            lock_service,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Run a mutating operation under full coordination
    pub fn coordinate<T, F>(
        &self,
        target: &dyn Coordinated,
        operation_name: &str,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if !self.config.coordination_enabled {
            log_debug!(
                "Coordination disabled; running '{}' without locks",
                operation_name
            );
            let out = f()?;
            target.persist()?;
            return Ok(out);
        }

        let name = target.collection_name();
        let operation_id = Uuid::new_v4().to_string();

        self.acquire_operation_lock(&name, &operation_id)?;
        log_debug!(
            "Operation '{}' ({}) locked collection '{}'",
            operation_name,
            operation_id,
            name
        );

        let started = Instant::now();
        let deadline = Duration::from_millis(self.config.lock_timeout_ms);
        let result = self.run_locked(target, &name, operation_name, started, deadline, f);

        // Release runs on every exit path; a failed release is logged,
        // the record expires on its own
        if let Err(e) = self
            .lock_service
            .release_collection_lock(&name, &operation_id)
        {
            log_warn!("Failed to release lock on '{}': {}", name, e);
        }

        result
    }

    fn run_locked<T, F>(
        &self,
        target: &dyn Coordinated,
        name: &str,
        operation_name: &str,
        started: Instant,
        deadline: Duration,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.check_modification_token(target, name)?;

        let out = f()?;

        if started.elapsed() > deadline {
            return Err(JsonBaseError::CoordinationTimeout(format!(
                "Operation '{}' on '{}' exceeded {} ms",
                operation_name,
                name,
                deadline.as_millis()
            )));
        }

        self.commit(target, name)?;
        Ok(out)
    }

    /// Lock acquisition with `retry_attempts` extra tries
    fn acquire_operation_lock(&self, name: &str, operation_id: &str) -> Result<()> {
        let attempts = self.config.retry_attempts + 1;

        for attempt in 0..attempts {
            if self.lock_service.acquire_collection_lock(
                name,
                operation_id,
                self.config.lock_timeout_ms,
            )? {
                return Ok(());
            }

            if attempt + 1 < attempts {
                log_debug!(
                    "Lock on '{}' busy, retrying in {} ms ({}/{})",
                    name,
                    self.config.retry_delay_ms,
                    attempt + 1,
                    attempts
                );
                std::thread::sleep(Duration::from_millis(self.config.retry_delay_ms));
            }
        }

        Err(JsonBaseError::LockAcquisitionFailure(format!(
            "Could not lock collection '{}' after {} attempts",
            name, attempts
        )))
    }

    /// Token comparison with reload-once conflict resolution
    fn check_modification_token(&self, target: &dyn Coordinated, name: &str) -> Result<()> {
        let local = target.modification_token();
        let remote = self.index_token(name)?;

        if local == remote {
            return Ok(());
        }

        log_debug!(
            "Token conflict on '{}' (local {:?}, index {:?}); reloading",
            name,
            local,
            remote
        );
        target.reload()?;

        let local = target.modification_token();
        let remote = self.index_token(name)?;
        if local != remote {
            return Err(JsonBaseError::ModificationConflict(format!(
                "Collection '{}' changed concurrently and reload did not converge",
                name
            )));
        }
        Ok(())
    }

    fn index_token(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .master_index
            .get_collection(name)?
            .and_then(|m| m.modification_token().map(String::from)))
    }

    /// Persist the blob and synchronise the master index record
    fn commit(&self, target: &dyn Coordinated, name: &str) -> Result<()> {
        let token = self.master_index.generate_modification_token();

        target.set_modification_token(Some(token.clone()))?;
        target.persist()?;

        let count = target.document_count();
        self.master_index.update_collection_metadata(name, |meta| {
            meta.set_modification_token(Some(token.clone()))?;
            meta.set_document_count(count);
            meta.touch();
            Ok(())
        })?;

        Ok(())
    }
}
