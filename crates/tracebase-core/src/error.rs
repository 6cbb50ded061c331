//! Core error types for tracebase-core.
//!
//! Uses `thiserror` for structured, matchable error variants. These are
//! boundary validation errors: they fire before any query is built or any
//! backend is touched.

use thiserror::Error;

/// Core errors produced by the tracebase-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A digest/version shorthand could not be parsed.
    ///
    /// Valid forms: `latest`, `v<N>` with decimal digits, or an exact
    /// digest (non-empty, `[0-9a-zA-Z_-]` only).
    #[error("invalid digest reference: '{value}'")]
    InvalidDigestRef { value: String },

    /// An object id failed validation.
    #[error("invalid object id '{id}': {reason}")]
    InvalidObjectId { id: String, reason: String },
}
