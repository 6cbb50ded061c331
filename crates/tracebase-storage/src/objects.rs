//! The object version store.
//!
//! Object versions are append-only rows addressed by content digest.
//! Publishing the same content twice appends a duplicate physical row but
//! never a new logical version: reads dedup per digest before computing
//! version metadata. Deletion is soft, expressed as an appended marker row
//! that copies the original `created_at` and sets `deleted_at`; when a
//! marker and the row it shadows tie on `created_at`, the marker wins.
//!
//! Version metadata (`version_index`, `version_count`, `is_latest`) is
//! recomputed on every read with window functions over the deduped rows,
//! never stored, so it cannot go stale under concurrent writers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use tracebase_core::query::SortBy;
use tracebase_core::{validate_object_id, DigestRef};

use crate::compile::{compile_order_by, FieldContext};
use crate::digest::compute_object_digest;
use crate::error::StorageError;
use crate::param::{ParamBuilder, ParamValue};
use crate::schema;
use crate::store::TraceStore;
use crate::table::{Column, ColumnType, PreparedSelect};
use crate::traits::QueryBackend;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp as fixed-width RFC 3339 UTC text, so lexicographic
/// and chronological order coincide.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::Integrity {
            reason: format!("malformed stored timestamp: {text}"),
        })
}

/// Whether a version row holds a user object or a saved op definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Object,
    Op,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::Object => "object",
            ObjectKind::Op => "op",
        }
    }

    fn parse(text: &str) -> Result<Self, StorageError> {
        match text {
            "object" => Ok(ObjectKind::Object),
            "op" => Ok(ObjectKind::Op),
            other => Err(StorageError::Integrity {
                reason: format!("unknown object kind in stored row: {other}"),
            }),
        }
    }
}

/// Input to [`TraceStore::create_object`]: everything but the derived
/// digest and timestamps.
#[derive(Debug, Clone)]
pub struct NewObjectVersion {
    pub project_id: String,
    pub kind: ObjectKind,
    pub object_id: String,
    /// Type tag assigned by upstream payload normalization.
    pub base_class: Option<String>,
    /// Normalized payload; its canonical JSON is what gets digested.
    pub val: Value,
    /// Outgoing references extracted from the payload.
    pub refs: Vec<String>,
    /// Authenticated principal attribution, when known.
    pub created_by: Option<String>,
}

/// A fully-specified physical version row, timestamps included.
///
/// The low-level shape used by [`TraceStore::insert_object_version`];
/// deletion markers are rows with `deleted_at` set.
#[derive(Debug, Clone)]
pub struct ObjectVersionRow {
    pub project_id: String,
    pub kind: ObjectKind,
    pub object_id: String,
    pub digest: String,
    pub base_class: Option<String>,
    pub val: Value,
    pub refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
}

/// One logical version as returned by queries, with computed metadata.
#[derive(Debug, Clone)]
pub struct ObjectVersionRecord {
    pub project_id: String,
    pub kind: ObjectKind,
    pub object_id: String,
    pub digest: String,
    pub base_class: Option<String>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub refs: Vec<String>,
    /// `None` under the metadata-only projection.
    pub val: Option<Value>,
    /// Zero-based, dense, ascending by creation time within the series.
    pub version_index: i64,
    pub version_count: i64,
    pub is_latest: bool,
}

/// Structural filters for [`TraceStore::query_objects`].
#[derive(Debug, Clone, Default)]
pub struct ObjectVersionFilter {
    pub object_ids: Option<Vec<String>>,
    pub kind: Option<ObjectKind>,
    /// Allow-list of upstream type tags.
    pub base_classes: Option<Vec<String>>,
    /// Digest/version shorthands; any match qualifies a row.
    pub digest_refs: Option<Vec<DigestRef>>,
    pub latest_only: bool,
    /// Include versions whose surviving row is a deletion marker.
    pub include_deleted: bool,
    /// Skip payload retrieval and decoding.
    pub metadata_only: bool,
}

impl<B: QueryBackend> TraceStore<B> {
    /// Publishes an object payload, returning its content digest.
    ///
    /// Idempotent at the logical level: re-publishing identical content
    /// yields the same digest and no new version.
    pub fn create_object(&self, new: NewObjectVersion) -> Result<String, StorageError> {
        validate_object_id(&new.object_id)?;
        let digest = compute_object_digest(&new.val)?;
        let row = ObjectVersionRow {
            project_id: new.project_id,
            kind: new.kind,
            object_id: new.object_id,
            digest: digest.clone(),
            base_class: new.base_class,
            val: new.val,
            refs: new.refs,
            created_at: Utc::now(),
            deleted_at: None,
            created_by: new.created_by,
        };
        self.insert_object_version(&row)?;
        Ok(digest)
    }

    /// Appends one physical version row exactly as given.
    pub fn insert_object_version(&self, row: &ObjectVersionRow) -> Result<(), StorageError> {
        let kind = self.backend().kind();
        let table = schema::object_versions();
        let deleted_at = match &row.deleted_at {
            Some(ts) => ParamValue::Str(format_timestamp(ts)),
            None => ParamValue::Null,
        };
        let opt_str = |value: &Option<String>| match value {
            Some(text) => ParamValue::Str(text.clone()),
            None => ParamValue::Null,
        };
        let stmt = table
            .insert()
            .row(vec![
                ParamValue::Str(row.project_id.clone()),
                ParamValue::Str(row.kind.as_str().to_string()),
                ParamValue::Str(row.object_id.clone()),
                ParamValue::Str(row.digest.clone()),
                opt_str(&row.base_class),
                ParamValue::Str(format_timestamp(&row.created_at)),
                deleted_at,
                opt_str(&row.created_by),
                ParamValue::Str(serde_json::to_string(&row.refs)?),
                ParamValue::Str(serde_json::to_string(&row.val)?),
            ])
            .prepare(kind);
        debug!(
            project_id = %row.project_id,
            object_id = %row.object_id,
            digest = %row.digest,
            marker = row.deleted_at.is_some(),
            "insert object version"
        );
        self.backend().insert(&stmt)?;
        Ok(())
    }

    /// Soft-deletes versions of one object by appending marker rows.
    ///
    /// With `digests` given, only those versions are marked; otherwise every
    /// live version is. Markers copy the shadowed row's `created_at` so the
    /// version series keeps its shape. Returns the number of versions
    /// marked.
    pub fn delete_objects(
        &self,
        project_id: &str,
        kind: ObjectKind,
        object_id: &str,
        digests: Option<&[String]>,
    ) -> Result<usize, StorageError> {
        validate_object_id(object_id)?;
        let filter = ObjectVersionFilter {
            object_ids: Some(vec![object_id.to_string()]),
            kind: Some(kind),
            digest_refs: digests
                .map(|ds| ds.iter().cloned().map(DigestRef::Exact).collect()),
            ..Default::default()
        };
        let live = self.query_objects(project_id, &filter, &[], None, None)?;
        let deleted_at = Utc::now();
        let mut marked = 0;
        for record in live {
            let val = record.val.ok_or_else(|| StorageError::Integrity {
                reason: format!("version {} returned without payload", record.digest),
            })?;
            self.insert_object_version(&ObjectVersionRow {
                project_id: record.project_id,
                kind: record.kind,
                object_id: record.object_id,
                digest: record.digest,
                base_class: record.base_class,
                val,
                refs: record.refs,
                created_at: record.created_at,
                deleted_at: Some(deleted_at),
                created_by: record.created_by,
            })?;
            marked += 1;
        }
        debug!(project_id, object_id, marked, "delete objects");
        Ok(marked)
    }

    /// Queries logical versions with computed version metadata.
    ///
    /// Three nested levels: dedup physical rows per digest (keeping the
    /// most recent, marker-preferred row), compute version metadata with
    /// window functions, then apply filters, ordering, and pagination.
    pub fn query_objects(
        &self,
        project_id: &str,
        filter: &ObjectVersionFilter,
        sorts: &[SortBy],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<ObjectVersionRecord>, StorageError> {
        // An explicitly empty shorthand set can match nothing.
        if matches!(&filter.digest_refs, Some(refs) if refs.is_empty()) {
            return Ok(Vec::new());
        }
        let stmt = self.build_version_query(project_id, filter, sorts, limit, offset)?;
        debug!(project_id, sql = %stmt.sql, "query objects");
        let tuples = self.backend().select(&stmt)?;
        tuples
            .iter()
            .map(|tuple| decode_version_tuple(tuple, filter.metadata_only))
            .collect()
    }

    fn build_version_query(
        &self,
        project_id: &str,
        filter: &ObjectVersionFilter,
        sorts: &[SortBy],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<PreparedSelect, StorageError> {
        let kind = self.backend().kind();
        let mut pb = ParamBuilder::new(kind);
        let project_ph = pb.add_param(ParamValue::Str(project_id.to_string()));

        // Level 1: per-digest dedup. The surviving row for each digest is
        // the most recent one, markers preferred on created_at ties.
        let deduped = format!(
            "SELECT project_id, kind, object_id, digest, base_class, created_at, deleted_at, \
             created_by, refs_dump, val_dump, \
             ROW_NUMBER() OVER (\
             PARTITION BY project_id, kind, object_id, digest \
             ORDER BY created_at DESC, (deleted_at IS NULL) ASC) AS rn \
             FROM object_versions WHERE project_id = {project_ph}"
        );

        // Level 2: version metadata over surviving rows. Deleted versions
        // drop out here (not before dedup, which would resurrect shadowed
        // rows) so indices stay dense over what the caller can see.
        let visibility = if filter.include_deleted {
            ""
        } else {
            " AND deleted_at IS NULL"
        };
        let versioned = format!(
            "SELECT project_id, kind, object_id, digest, base_class, created_at, deleted_at, \
             created_by, refs_dump, val_dump, \
             ROW_NUMBER() OVER (\
             PARTITION BY project_id, kind, object_id \
             ORDER BY created_at ASC, digest ASC) - 1 AS version_index, \
             COUNT(*) OVER (PARTITION BY project_id, kind, object_id) AS version_count, \
             CASE WHEN ROW_NUMBER() OVER (\
             PARTITION BY project_id, kind, object_id \
             ORDER BY created_at DESC, (deleted_at IS NULL) ASC, digest DESC) = 1 \
             THEN 1 ELSE 0 END AS is_latest \
             FROM ({deduped}) AS deduped WHERE rn = 1{visibility}"
        );

        // Level 3: structural filters, ordering, pagination.
        let mut conditions: Vec<String> = Vec::new();
        if let Some(object_ids) = &filter.object_ids {
            let phs: Vec<String> = object_ids
                .iter()
                .map(|id| pb.add_param(ParamValue::Str(id.clone())))
                .collect();
            conditions.push(format!("object_id IN ({})", phs.join(", ")));
        }
        if let Some(object_kind) = filter.kind {
            let ph = pb.add_param(ParamValue::Str(object_kind.as_str().to_string()));
            conditions.push(format!("kind = {ph}"));
        }
        if let Some(base_classes) = &filter.base_classes {
            let phs: Vec<String> = base_classes
                .iter()
                .map(|class| pb.add_param(ParamValue::Str(class.clone())))
                .collect();
            conditions.push(format!("base_class IN ({})", phs.join(", ")));
        }
        if let Some(refs) = &filter.digest_refs {
            let mut alternatives: Vec<String> = Vec::new();
            let mut exact: Vec<String> = Vec::new();
            for digest_ref in refs {
                match digest_ref {
                    DigestRef::Exact(digest) => {
                        exact.push(pb.add_param(ParamValue::Str(digest.clone())));
                    }
                    DigestRef::Latest => alternatives.push("is_latest = 1".to_string()),
                    DigestRef::Version(index) => {
                        let ph = pb.add_param(ParamValue::Int(*index));
                        alternatives.push(format!("version_index = {ph}"));
                    }
                }
            }
            if !exact.is_empty() {
                alternatives.push(format!("digest IN ({})", exact.join(", ")));
            }
            conditions.push(if alternatives.len() == 1 {
                alternatives.remove(0)
            } else {
                format!("({})", alternatives.join(" OR "))
            });
        }
        if filter.latest_only {
            conditions.push("is_latest = 1".to_string());
        }

        let mut projection = vec![
            "project_id",
            "kind",
            "object_id",
            "digest",
            "base_class",
            "created_at",
            "deleted_at",
            "created_by",
            "refs_dump",
            "version_index",
            "version_count",
            "is_latest",
        ];
        if !filter.metadata_only {
            projection.push("val_dump");
        }
        let mut sql = format!(
            "SELECT {} FROM ({versioned}) AS versioned",
            projection.join(", ")
        );
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        if sorts.is_empty() {
            sql.push_str(" ORDER BY created_at ASC, digest ASC");
        } else {
            let meta = version_meta_table();
            let ctx = FieldContext::single(&meta);
            let order = compile_order_by(sorts, &ctx, &mut pb)?;
            sql.push_str(&format!(" ORDER BY {}", order.sql));
        }

        let effective_limit = match (limit, offset) {
            (Some(l), _) => Some(l),
            (None, Some(_)) => Some(match kind {
                crate::dialect::DatabaseKind::Sqlite => -1,
                crate::dialect::DatabaseKind::Columnar => i64::MAX,
            }),
            (None, None) => None,
        };
        if let Some(l) = effective_limit {
            let ph = pb.add_param(ParamValue::Int(l));
            sql.push_str(&format!(" LIMIT {ph}"));
        }
        if let Some(o) = offset {
            let ph = pb.add_param(ParamValue::Int(o));
            sql.push_str(&format!(" OFFSET {ph}"));
        }

        Ok(PreparedSelect {
            sql,
            parameters: pb.into_params(),
            fields: projection.iter().map(|f| f.to_string()).collect(),
        })
    }
}

/// The outer query's column namespace: the physical columns plus the
/// computed version metadata, so callers can sort by any of them.
fn version_meta_table() -> crate::table::Table {
    let mut table = schema::object_versions();
    table.columns.push(Column::new("version_index", ColumnType::Int));
    table.columns.push(Column::new("version_count", ColumnType::Int));
    table.columns.push(Column::new("is_latest", ColumnType::Int));
    table
}

fn tuple_str(tuple: &[ParamValue], index: usize) -> Result<&str, StorageError> {
    match tuple.get(index) {
        Some(ParamValue::Str(s)) => Ok(s),
        other => Err(StorageError::Integrity {
            reason: format!("expected text at column {index}, got {other:?}"),
        }),
    }
}

fn tuple_int(tuple: &[ParamValue], index: usize) -> Result<i64, StorageError> {
    match tuple.get(index) {
        Some(ParamValue::Int(i)) => Ok(*i),
        other => Err(StorageError::Integrity {
            reason: format!("expected integer at column {index}, got {other:?}"),
        }),
    }
}

fn tuple_opt_str(tuple: &[ParamValue], index: usize) -> Result<Option<String>, StorageError> {
    match tuple.get(index) {
        Some(ParamValue::Null) => Ok(None),
        Some(ParamValue::Str(s)) => Ok(Some(s.clone())),
        other => Err(StorageError::Integrity {
            reason: format!("expected nullable text at column {index}, got {other:?}"),
        }),
    }
}

fn decode_version_tuple(
    tuple: &[ParamValue],
    metadata_only: bool,
) -> Result<ObjectVersionRecord, StorageError> {
    let deleted_at = tuple_opt_str(tuple, 6)?
        .map(|text| parse_timestamp(&text))
        .transpose()?;
    let val = if metadata_only {
        None
    } else {
        Some(serde_json::from_str(tuple_str(tuple, 12)?)?)
    };
    Ok(ObjectVersionRecord {
        project_id: tuple_str(tuple, 0)?.to_string(),
        kind: ObjectKind::parse(tuple_str(tuple, 1)?)?,
        object_id: tuple_str(tuple, 2)?.to_string(),
        digest: tuple_str(tuple, 3)?.to_string(),
        base_class: tuple_opt_str(tuple, 4)?,
        created_at: parse_timestamp(tuple_str(tuple, 5)?)?,
        deleted_at,
        created_by: tuple_opt_str(tuple, 7)?,
        refs: serde_json::from_str(tuple_str(tuple, 8)?)?,
        val,
        version_index: tuple_int(tuple, 9)?,
        version_count: tuple_int(tuple, 10)?,
        is_latest: tuple_int(tuple, 11)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timestamp_format_round_trips_and_sorts() {
        use chrono::TimeZone;
        // Microsecond precision: the stored form is exact at this grain.
        let early = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123456);
        let late = early + chrono::Duration::microseconds(1);
        let (a, b) = (format_timestamp(&early), format_timestamp(&late));
        assert!(a < b, "lexicographic order must follow time: {a} vs {b}");
        assert_eq!(parse_timestamp(&a).unwrap(), early);
    }

    #[test]
    fn test_object_kind_wire_names() {
        assert_eq!(serde_json::to_value(ObjectKind::Op).unwrap(), json!("op"));
        assert_eq!(ObjectKind::parse("object").unwrap(), ObjectKind::Object);
        assert!(ObjectKind::parse("widget").is_err());
    }

    #[test]
    fn test_create_object_returns_content_digest() {
        let store = TraceStore::open_in_memory().unwrap();
        let val = json!({"model": "m", "temperature": 0.2});
        let digest = store
            .create_object(NewObjectVersion {
                project_id: "p1".to_string(),
                kind: ObjectKind::Object,
                object_id: "cfg".to_string(),
                base_class: Some("Model".to_string()),
                val: val.clone(),
                refs: vec![],
                created_by: None,
            })
            .unwrap();
        assert_eq!(digest, compute_object_digest(&val).unwrap());
    }

    #[test]
    fn test_create_object_rejects_bad_ids() {
        let store = TraceStore::open_in_memory().unwrap();
        let result = store.create_object(NewObjectVersion {
            project_id: "p1".to_string(),
            kind: ObjectKind::Object,
            object_id: "bad id".to_string(),
            base_class: None,
            val: json!({}),
            refs: vec![],
            created_by: None,
        });
        assert!(matches!(result, Err(StorageError::Validation(_))));
    }

    #[test]
    fn test_empty_digest_ref_set_matches_nothing() {
        let store = TraceStore::open_in_memory().unwrap();
        let filter = ObjectVersionFilter {
            digest_refs: Some(vec![]),
            ..Default::default()
        };
        let records = store.query_objects("p1", &filter, &[], None, None).unwrap();
        assert!(records.is_empty());
    }
}
