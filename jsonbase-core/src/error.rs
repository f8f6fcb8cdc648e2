// jsonbase-core/src/error.rs
//! Error types for JsonBase
//!
//! Every failure class carries a stable machine-readable code (see
//! [`JsonBaseError::code`]) plus a human-readable message. Callback errors
//! passing through the coordinator are re-raised verbatim, so variants must
//! survive round trips untouched.

use thiserror::Error;

/// All errors produced by JsonBase
#[derive(Debug, Error)]
pub enum JsonBaseError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    #[error("Lock acquisition failed: {0}")]
    LockAcquisitionFailure(String),

    #[error("Modification conflict: {0}")]
    ModificationConflict(String),

    #[error("Coordinated operation timed out: {0}")]
    CoordinationTimeout(String),

    #[error("File I/O error: {0}")]
    FileIo(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Master index error: {0}")]
    MasterIndex(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Operation error: {0}")]
    Operation(String),
}

impl JsonBaseError {
    /// Stable error code, safe to match on across versions
    pub fn code(&self) -> &'static str {
        match self {
            JsonBaseError::InvalidArgument(_) => "INVALID_ARGUMENT",
            JsonBaseError::InvalidQuery(_) => "INVALID_QUERY",
            JsonBaseError::DocumentNotFound(_) => "DOCUMENT_NOT_FOUND",
            JsonBaseError::DuplicateKey(_) => "DUPLICATE_KEY",
            JsonBaseError::CollectionNotFound(_) => "COLLECTION_NOT_FOUND",
            JsonBaseError::LockTimeout(_) => "LOCK_TIMEOUT",
            JsonBaseError::LockAcquisitionFailure(_) => "LOCK_ACQUISITION_FAILURE",
            JsonBaseError::ModificationConflict(_) => "MODIFICATION_CONFLICT",
            JsonBaseError::CoordinationTimeout(_) => "COORDINATION_TIMEOUT",
            JsonBaseError::FileIo(_) => "FILE_IO_ERROR",
            JsonBaseError::FileNotFound(_) => "FILE_NOT_FOUND",
            JsonBaseError::PermissionDenied(_) => "PERMISSION_DENIED",
            JsonBaseError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            JsonBaseError::InvalidFileFormat(_) => "INVALID_FILE_FORMAT",
            JsonBaseError::MasterIndex(_) => "MASTER_INDEX_ERROR",
            JsonBaseError::Configuration(_) => "CONFIGURATION_ERROR",
            JsonBaseError::Operation(_) => "OPERATION_ERROR",
        }
    }
}

impl From<std::io::Error> for JsonBaseError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => JsonBaseError::FileNotFound(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                JsonBaseError::PermissionDenied(err.to_string())
            }
            _ => JsonBaseError::FileIo(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for JsonBaseError {
    fn from(err: serde_json::Error) -> Self {
        JsonBaseError::InvalidFileFormat(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, JsonBaseError>;
