//! Deterministic content hashing for objects, rows, tables, and files.
//!
//! All digests are lowercase-hex SHA-256. Object and row digests hash a
//! canonical JSON serialization; table digests hash the concatenation of
//! row digests streamed in row order, which makes them sensitive to row
//! order and enables natural-order retrieval. Digests are derived state,
//! never assigned -- identical logical content always produces an identical
//! digest regardless of call site, so clients may precompute them.
//!
//! # Determinism
//!
//! - `serde_json::Value` objects are BTreeMap-backed (the `preserve_order`
//!   feature is not enabled anywhere in this workspace), so serializing a
//!   `Value` yields stable key order with no extra whitespace. That
//!   serialization is the canonical form.
//! - Table digests never hash collection iteration order: the caller's row
//!   order is the order.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::StorageError;

/// Computes the lowercase-hex SHA-256 of raw bytes.
pub fn bytes_digest(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Computes the lowercase-hex SHA-256 of a string's UTF-8 bytes.
pub fn str_digest(data: &str) -> String {
    bytes_digest(data.as_bytes())
}

/// Computes the digest of an object payload.
///
/// The value must already be normalized (ref extraction and class tagging
/// happen upstream); this hashes its canonical JSON serialization.
pub fn compute_object_digest(val: &Value) -> Result<String, StorageError> {
    Ok(str_digest(&serde_json::to_string(val)?))
}

/// Computes the digest of one table row's canonical JSON.
pub fn compute_row_digest(row: &Value) -> Result<String, StorageError> {
    Ok(str_digest(&serde_json::to_string(row)?))
}

/// Computes a table digest by streaming row digests, in row order, through
/// one hash accumulator.
///
/// An empty sequence yields the SHA-256 of zero accumulator updates.
pub fn compute_table_digest<'a>(row_digests: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for digest in row_digests {
        hasher.update(digest.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Computes the digest of a file's raw bytes.
pub fn compute_file_digest(data: &[u8]) -> String {
    bytes_digest(data)
}
