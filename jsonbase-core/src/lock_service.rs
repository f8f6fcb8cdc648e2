// jsonbase-core/src/lock_service.rs
//! Two-tier locking: process exclusion + collection virtual locks
//!
//! The process-level tier wraps the platform script lock in a scoped
//! acquisition (`with_exclusion`) whose release runs on every exit path.
//! The collection-level tier is a set of advisory `LockStatus` records
//! persisted inside the master-index payload; cooperating processes honour
//! them, and expired records are reclaimable by any later acquirer.

use crate::error::{JsonBaseError, Result};
use crate::master_index::MasterIndexData;
use crate::metadata::LockStatus;
use crate::storage::{PropertyStore, ScriptLock};
use crate::{log_debug, log_trace};
use chrono::Utc;
use std::sync::Arc;

/// Ceiling for process-level exclusion waits
///
/// Collection-lock operations wait at most `min(lock_timeout, this)` for
/// the process lock, so exclusion never outlasts the virtual-lock budget.
pub const DEFAULT_EXCLUSION_TIMEOUT_MS: u64 = 10_000;

/// Wraps the shared script lock and the persisted collection locks
pub struct LockService {
    props: Arc<dyn PropertyStore>,
    script_lock: Arc<dyn ScriptLock>,
    master_index_key: String,
}

impl std::fmt::Debug for LockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockService")
            .field("master_index_key", &self.master_index_key)
            .finish_non_exhaustive()
    }
}

struct ExclusionGuard<'a> {
    lock: &'a dyn ScriptLock,
}

impl Drop for ExclusionGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_lock();
    }
}

impl LockService {
    pub fn new(
        props: Arc<dyn PropertyStore>,
        script_lock: Arc<dyn ScriptLock>,
        master_index_key: &str,
    ) -> Result<Self> {
        if master_index_key.trim().is_empty() {
            return Err(JsonBaseError::InvalidArgument(
                "masterIndexKey must be a non-empty string".to_string(),
            ));
        }
        Ok(LockService {
            props,
            script_lock,
            master_index_key: master_index_key.to_string(),
        })
    }

    pub fn master_index_key(&self) -> &str {
        &self.master_index_key
    }

    /// Run `f` under process-wide mutual exclusion
    ///
    /// The underlying lock is released on every exit path, including when
    /// `f` returns an error.
    pub fn with_exclusion<T, F>(&self, timeout_ms: u64, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if timeout_ms == 0 {
            return Err(JsonBaseError::InvalidArgument(
                "Exclusion timeout must be a positive number of milliseconds".to_string(),
            ));
        }

        if !self.script_lock.wait_lock(timeout_ms)? {
            return Err(JsonBaseError::LockTimeout(format!(
                "Could not acquire process lock within {} ms",
                timeout_ms
            )));
        }

        let _guard = ExclusionGuard {
            lock: &*self.script_lock,
        };
        f()
    }

    /// Try to take the virtual lock for a collection
    ///
    /// Succeeds when no lock is recorded, the recorded lock has expired, or
    /// the caller already owns it (re-acquire refreshes the deadline).
    pub fn acquire_collection_lock(
        &self,
        name: &str,
        operation_id: &str,
        timeout_ms: u64,
    ) -> Result<bool> {
        validate_lock_args(name, operation_id)?;
        if timeout_ms == 0 {
            return Err(JsonBaseError::InvalidArgument(
                "Lock timeout must be a positive number of milliseconds".to_string(),
            ));
        }

        let exclusion = timeout_ms.min(DEFAULT_EXCLUSION_TIMEOUT_MS);
        self.with_exclusion(exclusion, || {
            let mut data = MasterIndexData::load_or_default(&*self.props, &self.master_index_key)?;
            let now = Utc::now().timestamp_millis();

            if let Some(existing) = data.locks.get(name) {
                let owned_by_caller = existing.locked_by.as_deref() == Some(operation_id);
                if existing.is_active(now) && !owned_by_caller {
                    log_trace!(
                        "Lock on '{}' held by {:?}, refused for {}",
                        name,
                        existing.locked_by,
                        operation_id
                    );
                    return Ok(false);
                }
            }

            data.locks.insert(
                name.to_string(),
                LockStatus::acquired(operation_id, now, timeout_ms),
            );
            data.touch();
            data.store(&*self.props, &self.master_index_key)?;
            log_debug!("Lock on '{}' acquired by {}", name, operation_id);
            Ok(true)
        })
    }

    /// Release a virtual lock
    ///
    /// Idempotent: a missing lock releases successfully. A lock held by a
    /// different operation is left in place and the call reports `false`.
    pub fn release_collection_lock(&self, name: &str, operation_id: &str) -> Result<bool> {
        validate_lock_args(name, operation_id)?;

        self.with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
            let mut data = MasterIndexData::load_or_default(&*self.props, &self.master_index_key)?;

            match data.locks.get(name) {
                None => Ok(true),
                Some(status) if status.locked_by.as_deref() == Some(operation_id) => {
                    data.locks.remove(name);
                    data.touch();
                    data.store(&*self.props, &self.master_index_key)?;
                    log_debug!("Lock on '{}' released by {}", name, operation_id);
                    Ok(true)
                }
                Some(status) => {
                    log_trace!(
                        "Refusing release of '{}': held by {:?}, not {}",
                        name,
                        status.locked_by,
                        operation_id
                    );
                    Ok(false)
                }
            }
        })
    }

    /// Whether an unexpired virtual lock is recorded for the collection
    pub fn is_collection_locked(&self, name: &str) -> Result<bool> {
        self.with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
            let data = MasterIndexData::load_or_default(&*self.props, &self.master_index_key)?;
            let now = Utc::now().timestamp_millis();
            Ok(data
                .locks
                .get(name)
                .map(|status| status.is_active(now))
                .unwrap_or(false))
        })
    }

    /// Drop every expired lock record
    pub fn cleanup_expired_locks(&self) -> Result<()> {
        self.with_exclusion(DEFAULT_EXCLUSION_TIMEOUT_MS, || {
            let mut data = MasterIndexData::load_or_default(&*self.props, &self.master_index_key)?;
            let now = Utc::now().timestamp_millis();

            let before = data.locks.len();
            data.locks.retain(|_, status| status.is_active(now));

            if data.locks.len() != before {
                log_debug!("Cleaned up {} expired lock(s)", before - data.locks.len());
                data.touch();
                data.store(&*self.props, &self.master_index_key)?;
            }
            Ok(())
        })
    }
}

fn validate_lock_args(name: &str, operation_id: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(JsonBaseError::InvalidArgument(
            "Collection name must be a non-empty string".to_string(),
        ));
    }
    if operation_id.trim().is_empty() {
        return Err(JsonBaseError::InvalidArgument(
            "Operation id must be a non-empty string".to_string(),
        ));
    }
    Ok(())
}
