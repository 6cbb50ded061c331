//! Storage error types for tracebase-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage
//! layer. Compile and validation errors are local and unrecoverable for the
//! request that produced them; backend errors propagate as-is (retry policy
//! belongs to the connection-management layer above, not here). Nothing is
//! swallowed silently, and a failed insert never produces partial results.

use thiserror::Error;

use tracebase_core::CoreError;

use crate::compile::CompileError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An expression failed to compile to SQL. Always caught before any
    /// query executes.
    #[error("query compile error: {0}")]
    Compile(#[from] CompileError),

    /// A caller-supplied id or digest reference failed boundary validation.
    #[error("validation error: {0}")]
    Validation(#[from] CoreError),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The embedded backend reported an error (connection, constraint,
    /// statement execution).
    #[error("backend error: {0}")]
    Backend(#[from] rusqlite::Error),

    /// A data integrity violation was detected (malformed stored row,
    /// manifest referencing missing rows, non-nullable column missing).
    #[error("integrity error: {reason}")]
    Integrity { reason: String },
}
