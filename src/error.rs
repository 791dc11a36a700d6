//! Error types for UnbloatDB
//!
//! Provides a unified error type for all operations. A missing record is not
//! an error: lookups return `Option` and removals return `bool`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using UnbloatError
pub type Result<T> = std::result::Result<T, UnbloatError>;

/// Unified error type for UnbloatDB operations
#[derive(Debug, Error)]
pub enum UnbloatError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Index corruption in {}: {reason}", path.display())]
    IndexCorruption { path: PathBuf, reason: String },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    // -------------------------------------------------------------------------
    // Reference Errors
    // -------------------------------------------------------------------------
    #[error("Dangling reference: {group}/{key} does not exist")]
    DanglingReference { group: String, key: String },

    #[error("Record {group}/{key} is still referenced by {count} record(s)")]
    StillReferenced {
        group: String,
        key: String,
        count: usize,
    },

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl UnbloatError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        UnbloatError::IndexCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for UnbloatError {
    fn from(e: serde_json::Error) -> Self {
        UnbloatError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for UnbloatError {
    fn from(e: bincode::Error) -> Self {
        UnbloatError::Serialization(e.to_string())
    }
}
