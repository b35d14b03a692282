//! Error types for snapshot persistence.

use thiserror::Error;

/// Errors that can occur while saving or loading snapshots.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// I/O error (file operations, disk I/O)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Format error (invalid magic bytes, version mismatch, truncation)
    #[error("format error: {0}")]
    Format(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Checksum mismatch (data corruption detected)
    #[error("checksum mismatch: expected {expected:#018x}, got {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
