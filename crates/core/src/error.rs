//! Error types for the registry engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Storage drivers only ever produce three kinds of failure that callers act on:
//! a missing key (`NotFound`), a failed conditional write (`WriteConflict`), and
//! everything else. Domain errors (`CodecNotFound`, `IncompatibleSchema`, ...)
//! are produced by the group logic above the tables.

use std::io;
use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the registry engine
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write observed a version other than the expected one
    ///
    /// The caller read stale state. Re-read and try again.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    /// Codec is not registered in the group
    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    /// Entity exists but is in a state that does not permit the operation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A stored value does not match the value type its key is paired with
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected value kind
        expected: &'static str,
        /// Actual value kind found
        actual: &'static str,
    },

    /// Schema rejected by the group's compatibility policy
    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// Schema does not satisfy the group's properties
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Incomplete entry at the end of a log file
    ///
    /// Expected after a crash during a write; not corruption.
    #[error("Incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// Byte offset of the entry
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Invalid operation or argument
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    StorageError(String),
}

impl Error {
    /// Whether the operation failed on a conditional write and may succeed after a re-read
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::WriteConflict(_))
    }

    /// Whether the operation failed because the entity does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::IoError(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_display_write_conflict() {
        let err = Error::WriteConflict("etag moved".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Write conflict"));
        assert!(msg.contains("etag moved"));
    }

    #[test]
    fn test_error_display_type_mismatch() {
        let err = Error::TypeMismatch {
            expected: "SchemaRecord",
            actual: "EtagRecord",
        };
        let msg = err.to_string();
        assert!(msg.contains("SchemaRecord"));
        assert!(msg.contains("EtagRecord"));
    }

    #[test]
    fn test_error_display_incomplete_entry() {
        let err = Error::IncompleteEntry {
            offset: 200,
            have: 3,
            needed: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("Incomplete entry"));
        assert!(msg.contains("200"));
    }

    #[test]
    fn test_error_classification() {
        assert!(Error::WriteConflict("x".into()).is_conflict());
        assert!(!Error::NotFound("x".into()).is_conflict());
        assert!(Error::NotFound("x".into()).is_not_found());
        assert!(!Error::CodecNotFound("x".into()).is_not_found());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_error_from_bincode() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = bincode::deserialize(&invalid_data).map_err(|e| e.into());
        assert!(matches!(result, Err(Error::SerializationError(_))));
    }
}
