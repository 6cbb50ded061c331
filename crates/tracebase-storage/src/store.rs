//! Store construction and table bootstrap.
//!
//! [`TraceStore`] owns a backend and exposes the domain operations: the
//! object version store lives in [`crate::objects`], the table row store in
//! [`crate::rows`]. Construction bootstraps the schema (idempotent DDL), so
//! a fresh database is usable immediately.

use tracing::info;

use crate::error::StorageError;
use crate::schema;
use crate::sqlite::SqliteBackend;
use crate::traits::QueryBackend;

/// The storage engine facade over one backend.
pub struct TraceStore<B: QueryBackend> {
    backend: B,
}

impl<B: QueryBackend> TraceStore<B> {
    /// Wraps a backend, creating any missing tables.
    pub fn new(backend: B) -> Result<Self, StorageError> {
        for table in schema::all_tables() {
            backend.create_table(&table)?;
        }
        info!(kind = ?backend.kind(), "trace store initialized");
        Ok(TraceStore { backend })
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl TraceStore<SqliteBackend> {
    /// Opens a store over a private in-memory SQLite database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        TraceStore::new(SqliteBackend::open_in_memory()?)
    }

    /// Opens a store over a SQLite database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        TraceStore::new(SqliteBackend::open(path)?)
    }
}
