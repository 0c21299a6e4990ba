//! Error type for storage operations.

use thiserror::Error;

/// Errors from the EHR store and transcript log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed store file or unserializable record
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Patient lookup failed
    #[error("Patient {0} not found")]
    PatientNotFound(String),
}
