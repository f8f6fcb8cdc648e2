// jsonbase-core/src/metadata.rs
//! Collection metadata value object
//!
//! One `CollectionMetadata` record exists per collection, both inside the
//! collection blob (snapshot) and inside the master index (authoritative).
//! Construction and every setter validate, so a hydrated record is always
//! internally consistent.

use crate::date_tag;
use crate::error::{JsonBaseError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Current time truncated to millisecond precision
///
/// All persisted timestamps round-trip through epoch milliseconds, so
/// in-memory values are kept at the same precision.
pub(crate) fn now_ms() -> DateTime<Utc> {
    let now = Utc::now();
    match Utc.timestamp_millis_opt(now.timestamp_millis()).single() {
        Some(truncated) => truncated,
        None => now,
    }
}

/// Advisory lock state recorded in the master index
///
/// Invariant: `is_locked` implies `locked_by`, `locked_at` and a positive
/// `lock_timeout` are all present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    pub is_locked: bool,
    pub locked_by: Option<String>,
    /// Epoch milliseconds of acquisition
    pub locked_at: Option<i64>,
    /// Hold duration in milliseconds
    pub lock_timeout: Option<u64>,
}

impl LockStatus {
    /// Status for a freshly acquired lock
    pub fn acquired(operation_id: &str, now_ms: i64, timeout_ms: u64) -> Self {
        LockStatus {
            is_locked: true,
            locked_by: Some(operation_id.to_string()),
            locked_at: Some(now_ms),
            lock_timeout: Some(timeout_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_locked {
            if self.locked_by.as_deref().map(str::is_empty).unwrap_or(true) {
                return Err(JsonBaseError::InvalidArgument(
                    "Locked status requires a non-empty lockedBy".to_string(),
                ));
            }
            if self.locked_at.is_none() {
                return Err(JsonBaseError::InvalidArgument(
                    "Locked status requires lockedAt".to_string(),
                ));
            }
            match self.lock_timeout {
                Some(t) if t > 0 => {}
                _ => {
                    return Err(JsonBaseError::InvalidArgument(
                        "Locked status requires a positive lockTimeout".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// A lock is expired once `now >= locked_at + lock_timeout`
    pub fn is_expired(&self, now_ms: i64) -> bool {
        match (self.locked_at, self.lock_timeout) {
            (Some(at), Some(timeout)) => now_ms >= at + timeout as i64,
            _ => true,
        }
    }

    /// Locked and not yet expired
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.is_locked && !self.is_expired(now_ms)
    }
}

/// Per-collection metadata record
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    name: String,
    file_id: String,
    created: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    document_count: u64,
    modification_token: Option<String>,
    lock_status: Option<LockStatus>,
}

impl CollectionMetadata {
    /// Create metadata for a brand-new collection
    pub fn new(name: &str, file_id: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(JsonBaseError::InvalidArgument(
                "Collection name must be a non-empty string".to_string(),
            ));
        }
        if file_id.trim().is_empty() {
            return Err(JsonBaseError::InvalidArgument(
                "Collection fileId must be a non-empty string".to_string(),
            ));
        }

        let now = now_ms();
        Ok(CollectionMetadata {
            name: name.to_string(),
            file_id: file_id.to_string(),
            created: now,
            last_updated: now,
            document_count: 0,
            modification_token: None,
            lock_status: None,
        })
    }

    /// Construct from identifiers plus an initial attribute mapping
    ///
    /// The explicit `name` and `file_id` win over whatever the mapping
    /// carries.
    pub fn with_initial(name: &str, file_id: &str, initial: &Value) -> Result<Self> {
        let mut patched = initial.clone();
        let map = patched.as_object_mut().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Initial metadata must be an object".to_string())
        })?;
        map.insert("name".to_string(), Value::String(name.to_string()));
        map.insert("fileId".to_string(), Value::String(file_id.to_string()));
        Self::from_value(&patched)
    }

    /// Hydrate metadata from its persisted JSON form
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            JsonBaseError::InvalidArgument("Collection metadata must be an object".to_string())
        })?;

        let name = map
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let file_id = map
            .get("fileId")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let mut meta = CollectionMetadata::new(name, file_id)?;

        if let Some(created) = map.get("created") {
            meta.created = parse_timestamp(created, "created")?;
        }
        if let Some(updated) = map.get("lastUpdated") {
            meta.last_updated = parse_timestamp(updated, "lastUpdated")?;
        }
        if meta.last_updated < meta.created {
            return Err(JsonBaseError::InvalidArgument(
                "lastUpdated must not precede created".to_string(),
            ));
        }

        if let Some(count) = map.get("documentCount") {
            let n = count.as_u64().ok_or_else(|| {
                JsonBaseError::InvalidArgument(
                    "documentCount must be a non-negative integer".to_string(),
                )
            })?;
            meta.document_count = n;
        }

        match map.get("modificationToken") {
            None | Some(Value::Null) => {}
            Some(Value::String(token)) if !token.is_empty() => {
                meta.modification_token = Some(token.clone());
            }
            Some(_) => {
                return Err(JsonBaseError::InvalidArgument(
                    "modificationToken must be null or a non-empty string".to_string(),
                ));
            }
        }

        match map.get("lockStatus") {
            None | Some(Value::Null) => {}
            Some(raw) => {
                let status: LockStatus = serde_json::from_value(raw.clone()).map_err(|e| {
                    JsonBaseError::InvalidArgument(format!("Invalid lockStatus: {}", e))
                })?;
                status.validate()?;
                meta.lock_status = Some(status);
            }
        }

        Ok(meta)
    }

    /// Persisted JSON form (Date-tagged timestamps)
    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "fileId": self.file_id,
            "created": date_tag::encode(&self.created),
            "lastUpdated": date_tag::encode(&self.last_updated),
            "documentCount": self.document_count,
            "modificationToken": self.modification_token,
            "lockStatus": self.lock_status,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn document_count(&self) -> u64 {
        self.document_count
    }

    pub fn modification_token(&self) -> Option<&str> {
        self.modification_token.as_deref()
    }

    pub fn set_modification_token(&mut self, token: Option<String>) -> Result<()> {
        if let Some(ref t) = token {
            if t.is_empty() {
                return Err(JsonBaseError::InvalidArgument(
                    "modificationToken must be null or a non-empty string".to_string(),
                ));
            }
        }
        self.modification_token = token;
        Ok(())
    }

    pub fn lock_status(&self) -> Option<&LockStatus> {
        self.lock_status.as_ref()
    }

    pub fn set_lock_status(&mut self, status: Option<LockStatus>) -> Result<()> {
        if let Some(ref s) = status {
            s.validate()?;
        }
        self.lock_status = status;
        Ok(())
    }

    /// Bump `lastUpdated` to now
    pub fn touch(&mut self) {
        self.last_updated = now_ms();
    }

    pub fn increment_document_count(&mut self) {
        self.document_count += 1;
    }

    pub fn decrement_document_count(&mut self) -> Result<()> {
        if self.document_count == 0 {
            return Err(JsonBaseError::InvalidArgument(
                "documentCount cannot drop below zero".to_string(),
            ));
        }
        self.document_count -= 1;
        Ok(())
    }

    pub fn set_document_count(&mut self, count: u64) {
        self.document_count = count;
    }
}

impl PartialEq for CollectionMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.file_id == other.file_id
            && self.created.timestamp_millis() == other.created.timestamp_millis()
            && self.last_updated.timestamp_millis() == other.last_updated.timestamp_millis()
            && self.document_count == other.document_count
            && self.modification_token == other.modification_token
            && self.lock_status == other.lock_status
    }
}

impl Serialize for CollectionMetadata {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CollectionMetadata {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        CollectionMetadata::from_value(&value).map_err(D::Error::custom)
    }
}

fn parse_timestamp(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    date_tag::decode(value).ok_or_else(|| {
        JsonBaseError::InvalidArgument(format!("{} must be a Date-tagged timestamp", field))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates_identifiers() {
        assert!(CollectionMetadata::new("users", "file-1").is_ok());
        assert!(CollectionMetadata::new("", "file-1").is_err());
        assert!(CollectionMetadata::new("  ", "file-1").is_err());
        assert!(CollectionMetadata::new("users", "").is_err());
    }

    #[test]
    fn test_new_defaults() {
        let meta = CollectionMetadata::new("users", "file-1").unwrap();
        assert_eq!(meta.document_count(), 0);
        assert!(meta.modification_token().is_none());
        assert!(meta.lock_status().is_none());
        assert_eq!(
            meta.created().timestamp_millis(),
            meta.last_updated().timestamp_millis()
        );
    }

    #[test]
    fn test_round_trip() {
        let mut meta = CollectionMetadata::new("users", "file-1").unwrap();
        meta.set_modification_token(Some("token-abc".to_string()))
            .unwrap();
        meta.set_document_count(7);
        meta.set_lock_status(Some(LockStatus::acquired("op-1", 1_000, 30_000)))
            .unwrap();

        let restored = CollectionMetadata::from_value(&meta.to_value()).unwrap();
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_with_initial_overrides_identifiers() {
        let initial = serde_json::json!({
            "name": "stale-name",
            "fileId": "stale-file",
            "documentCount": 4,
            "modificationToken": "tok"
        });
        let meta = CollectionMetadata::with_initial("users", "file-9", &initial).unwrap();
        assert_eq!(meta.name(), "users");
        assert_eq!(meta.file_id(), "file-9");
        assert_eq!(meta.document_count(), 4);
        assert_eq!(meta.modification_token(), Some("tok"));

        assert!(CollectionMetadata::with_initial("users", "f", &serde_json::json!(null)).is_err());
    }

    #[test]
    fn test_from_value_rejects_bad_shapes() {
        assert!(CollectionMetadata::from_value(&serde_json::json!(null)).is_err());
        assert!(CollectionMetadata::from_value(&serde_json::json!({"name": "x"})).is_err());
        assert!(CollectionMetadata::from_value(&serde_json::json!({
            "name": "x", "fileId": "f", "documentCount": -3
        }))
        .is_err());
        assert!(CollectionMetadata::from_value(&serde_json::json!({
            "name": "x", "fileId": "f", "modificationToken": ""
        }))
        .is_err());
    }

    #[test]
    fn test_token_setter_validation() {
        let mut meta = CollectionMetadata::new("users", "file-1").unwrap();
        assert!(meta.set_modification_token(Some("".to_string())).is_err());
        assert!(meta.set_modification_token(Some("t".to_string())).is_ok());
        assert_eq!(meta.modification_token(), Some("t"));
        assert!(meta.set_modification_token(None).is_ok());
        assert!(meta.modification_token().is_none());
    }

    #[test]
    fn test_document_count_bounds() {
        let mut meta = CollectionMetadata::new("users", "file-1").unwrap();
        meta.increment_document_count();
        meta.increment_document_count();
        assert_eq!(meta.document_count(), 2);
        meta.decrement_document_count().unwrap();
        meta.decrement_document_count().unwrap();
        assert!(meta.decrement_document_count().is_err());
        assert_eq!(meta.document_count(), 0);
    }

    #[test]
    fn test_touch_moves_last_updated() {
        let mut meta = CollectionMetadata::new("users", "file-1").unwrap();
        let before = meta.last_updated();
        meta.touch();
        assert!(meta.last_updated() >= before);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = CollectionMetadata::new("users", "file-1").unwrap();
        let copy = original.clone();
        original.set_document_count(99);
        assert_eq!(copy.document_count(), 0);
    }

    #[test]
    fn test_lock_status_invariants() {
        let ok = LockStatus::acquired("op-1", 100, 5_000);
        assert!(ok.validate().is_ok());

        let bad = LockStatus {
            is_locked: true,
            locked_by: None,
            locked_at: Some(100),
            lock_timeout: Some(5_000),
        };
        assert!(bad.validate().is_err());

        let zero_timeout = LockStatus {
            is_locked: true,
            locked_by: Some("op".to_string()),
            locked_at: Some(100),
            lock_timeout: Some(0),
        };
        assert!(zero_timeout.validate().is_err());

        let unlocked = LockStatus {
            is_locked: false,
            locked_by: None,
            locked_at: None,
            lock_timeout: None,
        };
        assert!(unlocked.validate().is_ok());
    }

    #[test]
    fn test_lock_expiry() {
        let status = LockStatus::acquired("op-1", 1_000, 500);
        assert!(status.is_active(1_400));
        assert!(!status.is_expired(1_499));
        assert!(status.is_expired(1_500));
        assert!(!status.is_active(1_500));
    }

    #[test]
    fn test_lock_status_wire_names() {
        let status = LockStatus::acquired("op-1", 42, 1_000);
        let wire = serde_json::to_value(&status).unwrap();
        assert_eq!(wire["isLocked"], serde_json::json!(true));
        assert_eq!(wire["lockedBy"], serde_json::json!("op-1"));
        assert_eq!(wire["lockedAt"], serde_json::json!(42));
        assert_eq!(wire["lockTimeout"], serde_json::json!(1_000));
    }
}
