//! Storage/query engine for immutable, content-addressed trace data.
//!
//! Persists objects and table rows addressed by content digest, tracks
//! their versions, and compiles the backend-agnostic expression AST from
//! `tracebase-core` into parameterized SQL for two dialects: a columnar
//! analytical store (production) and embedded SQLite (local/tests).
//!
//! # Architecture
//!
//! The engine layers, leaves first:
//! - [`digest`]: deterministic SHA-256 content hashing
//! - [`param`]: collision-free, deduplicating named-parameter allocation
//! - [`dialect`]: the per-backend rendering rules the compiler depends on
//! - [`compile`]: expression AST -> SQL fragments + referenced columns
//! - [`table`]: typed column/table descriptors, DDL, Select/Insert builders
//! - [`schema`]: concrete table descriptors and SQLite bootstrap
//! - [`traits`]: the [`QueryBackend`] contract all backends implement
//! - [`sqlite`]: the embedded backend over rusqlite
//! - [`store`], [`objects`], [`rows`]: the thin domain layer (object
//!   version store, table row store) assembling the primitives above
//!
//! Everything is synchronous and per-call stateless: a query build is a
//! pure function of its inputs plus one backend round-trip. Content
//! addressing makes concurrent identical writes converge without
//! coordination; "latest version" is recomputed per read, never stored.

pub mod compile;
pub mod dialect;
pub mod digest;
pub mod error;
pub mod objects;
pub mod param;
pub mod rows;
pub mod schema;
pub mod sqlite;
pub mod store;
pub mod table;
pub mod traits;

// Re-export key types for ergonomic use.
pub use compile::{compile_order_by, compile_query, CompileError, CompiledExpr, FieldContext};
pub use dialect::{DatabaseKind, Dialect};
pub use digest::{
    bytes_digest, compute_file_digest, compute_object_digest, compute_row_digest,
    compute_table_digest, str_digest,
};
pub use error::StorageError;
pub use objects::{
    NewObjectVersion, ObjectKind, ObjectVersionFilter, ObjectVersionRecord, ObjectVersionRow,
};
pub use param::{ParamBuilder, ParamValue};
pub use rows::{TableRowRecord, TableStats};
pub use sqlite::SqliteBackend;
pub use store::TraceStore;
pub use table::{
    tuple_to_row, Column, ColumnType, Insert, Join, JoinKind, PreparedDelete, PreparedInsert,
    PreparedSelect, Select, Table,
};
pub use traits::QueryBackend;
