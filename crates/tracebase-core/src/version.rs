//! Object addressing: digest/version shorthands and object-id rules.
//!
//! Callers address a stored object version either by its exact content
//! digest, by the `latest` shorthand, or by a zero-based version index
//! shorthand (`v0`, `v1`, ...). Parsing happens at the API boundary so the
//! storage layer only ever sees well-formed [`DigestRef`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Maximum accepted object id length, in bytes.
pub const MAX_OBJECT_ID_LEN: usize = 128;

/// A reference to one version of an object series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestRef {
    /// An exact content digest.
    Exact(String),
    /// The latest (most recent, deletion-marker-aware) version.
    Latest,
    /// A zero-based chronological version index.
    Version(i64),
}

impl DigestRef {
    /// Parses a digest/version shorthand.
    ///
    /// `latest` and `v<digits>` are recognized shorthands; anything else
    /// must look like a digest (non-empty, `[0-9a-zA-Z_-]` only). `'v'` is
    /// not a hex digit, so no real digest starts with it: a `v` prefix
    /// commits to the version-index grammar and anything malformed after
    /// it is rejected rather than read as a digest.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        if value == "latest" {
            return Ok(DigestRef::Latest);
        }
        if let Some(rest) = value.strip_prefix('v') {
            if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoreError::InvalidDigestRef {
                    value: value.to_string(),
                });
            }
            let index = rest.parse::<i64>().map_err(|_| CoreError::InvalidDigestRef {
                value: value.to_string(),
            })?;
            return Ok(DigestRef::Version(index));
        }
        let digest_like = !value.is_empty()
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if digest_like {
            Ok(DigestRef::Exact(value.to_string()))
        } else {
            Err(CoreError::InvalidDigestRef {
                value: value.to_string(),
            })
        }
    }
}

impl fmt::Display for DigestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestRef::Exact(d) => write!(f, "{d}"),
            DigestRef::Latest => write!(f, "latest"),
            DigestRef::Version(n) => write!(f, "v{n}"),
        }
    }
}

/// Validates a caller-supplied object id.
///
/// Ids are embedded in URI-shaped refs by upstream clients, so the accepted
/// alphabet is restricted to `[A-Za-z0-9._-]` with a length cap.
pub fn validate_object_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::InvalidObjectId {
            id: id.to_string(),
            reason: "must not be empty".to_string(),
        });
    }
    if id.len() > MAX_OBJECT_ID_LEN {
        return Err(CoreError::InvalidObjectId {
            id: id.to_string(),
            reason: format!("longer than {MAX_OBJECT_ID_LEN} bytes"),
        });
    }
    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(CoreError::InvalidObjectId {
            id: id.to_string(),
            reason: format!("contains disallowed character '{bad}'"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latest() {
        assert_eq!(DigestRef::parse("latest").unwrap(), DigestRef::Latest);
    }

    #[test]
    fn test_parse_version_index() {
        assert_eq!(DigestRef::parse("v0").unwrap(), DigestRef::Version(0));
        assert_eq!(DigestRef::parse("v23").unwrap(), DigestRef::Version(23));
    }

    #[test]
    fn test_parse_exact_digest() {
        let digest = "4fe175f2a4e8a3f1b0d2c5e6a7b8c9d0e1f2a3b4c5d6e7f8091a2b3c4d5e6f70";
        assert_eq!(
            DigestRef::parse(digest).unwrap(),
            DigestRef::Exact(digest.to_string())
        );
    }

    #[test]
    fn test_parse_rejects_malformed_refs() {
        for bad in ["", "v", "v1x2", "dig est", "a/b", "d%41"] {
            assert!(
                matches!(
                    DigestRef::parse(bad),
                    Err(CoreError::InvalidDigestRef { .. })
                ),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_display_round_trips() {
        for raw in ["latest", "v7", "abc123"] {
            let parsed = DigestRef::parse(raw).unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn test_validate_object_id() {
        assert!(validate_object_id("my-model.v2_final").is_ok());
        assert!(validate_object_id("").is_err());
        assert!(validate_object_id("has space").is_err());
        assert!(validate_object_id("has/slash").is_err());
        assert!(validate_object_id(&"x".repeat(MAX_OBJECT_ID_LEN + 1)).is_err());
    }
}
