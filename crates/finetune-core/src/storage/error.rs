//! Error types for the storage layer.

use rusqlite::ffi;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection or statement error.
    #[error("Database error: {0}")]
    Connection(rusqlite::Error),

    /// A `UNIQUE` constraint rejected the write.
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    /// Item not found in storage.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid data error.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The shared connection lock was poisoned by a panicking holder.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this is a unique-constraint failure on the given `table.column`.
    #[must_use]
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, Self::UniqueViolation(msg) if msg.contains(column))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            if code.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE {
                return Self::UniqueViolation(
                    message.clone().unwrap_or_else(|| "UNIQUE constraint failed".to_string()),
                );
            }
        }
        Self::Connection(err)
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
