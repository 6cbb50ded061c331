//! Core data model for the tracebase storage engine.
//!
//! Defines the backend-agnostic pieces shared by clients and the storage
//! layer: the filter/sort expression AST ([`Query`]), object addressing
//! (digest/version shorthands, object-id validation), and the core error
//! type. This crate is pure data -- no I/O, no SQL -- so clients can build
//! and serialize queries without linking any backend.
//!
//! # Modules
//!
//! - [`query`]: the expression AST and its JSON wire format
//! - [`version`]: digest refs (`latest`, `v<N>`, exact digest) and id rules
//! - [`error`]: CoreError enum with all failure modes

pub mod error;
pub mod query;
pub mod version;

// Re-export commonly used types
pub use error::CoreError;
pub use query::{CastTo, ContainsSpec, ConvertSpec, Literal, Operand, Operation, Query};
pub use query::{SortBy, SortDirection};
pub use version::{validate_object_id, DigestRef};
