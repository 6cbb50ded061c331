//! The backend seam.
//!
//! [`QueryBackend`] is the complete contract between the domain layer and a
//! SQL engine: execute a prepared select, insert, or delete, and create
//! tables. The domain layer never sees a connection type, which keeps the
//! columnar and embedded backends swappable (and lets tests run everything
//! against in-memory SQLite).

use crate::error::StorageError;
use crate::dialect::DatabaseKind;
use crate::param::ParamValue;
use crate::table::{PreparedDelete, PreparedInsert, PreparedSelect, Table};

/// A SQL execution backend.
pub trait QueryBackend {
    /// The dialect statements must be prepared in for this backend.
    fn kind(&self) -> DatabaseKind;

    /// Runs a prepared select, returning result tuples in statement column
    /// order.
    fn select(&self, stmt: &PreparedSelect) -> Result<Vec<Vec<ParamValue>>, StorageError>;

    /// Runs a prepared insert atomically; a failure inserts nothing.
    /// Returns the number of rows actually stored (dedup may skip some).
    fn insert(&self, stmt: &PreparedInsert) -> Result<usize, StorageError>;

    /// Runs a prepared delete, returning the number of rows removed.
    fn execute(&self, stmt: &PreparedDelete) -> Result<usize, StorageError>;

    /// Creates a table if it does not already exist.
    fn create_table(&self, table: &Table) -> Result<(), StorageError>;
}
