//! The table row store.
//!
//! Rows are content-addressed: writing a batch stores each distinct payload
//! once per project and returns the per-row digests in input order. A table
//! is an ordered manifest of row digests; its own digest is the streamed
//! hash of that list, so two tables with the same rows in the same order
//! share one manifest.
//!
//! Natural-order reads paginate over the manifest in application code
//! (reverse for descending, then slice) and fetch only the sliced digests
//! with an IN restriction, preserving each row's original manifest index.
//! Filtered reads push the compiled WHERE/ORDER BY into SQL over the
//! manifest's distinct digests, then re-expand duplicate manifest entries
//! afterwards.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::debug;

use tracebase_core::query::{Operand, Operation, Query, SortBy, SortDirection};

use crate::digest::{compute_row_digest, compute_table_digest};
use crate::error::StorageError;
use crate::schema;
use crate::store::TraceStore;
use crate::param::ParamValue;
use crate::traits::QueryBackend;

/// One row as returned by table reads.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRowRecord {
    pub digest: String,
    /// The row's index in the manifest (original order, even when reading
    /// descending or filtered).
    pub row_index: i64,
    pub val: Value,
}

/// Aggregate statistics for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Manifest length: duplicate digests count once per occurrence.
    pub row_count: i64,
    /// Bytes of stored payload over the table's distinct rows.
    pub total_storage_bytes: i64,
}

/// Scope filter: rows of one project restricted to a digest set.
fn scope_filter(project_id: &str, digests: &[String], extra: Option<&Query>) -> Query {
    let items = digests
        .iter()
        .map(|d| Operand::literal(d.as_str()))
        .collect();
    let mut children = vec![
        Operand::Operation(Operation::Eq(
            Box::new(Operand::get_field("project_id")),
            Box::new(Operand::literal(project_id)),
        )),
        Operand::Operation(Operation::In(
            Box::new(Operand::get_field("digest")),
            items,
        )),
    ];
    if let Some(query) = extra {
        children.push(query.expr.clone());
    }
    Query::new(Operand::Operation(Operation::And(children)))
}

impl<B: QueryBackend> TraceStore<B> {
    /// Stores a batch of row payloads, returning digests in input order.
    ///
    /// Identical payloads (within the batch or already stored) are written
    /// once per project.
    pub fn write_rows(
        &self,
        project_id: &str,
        rows: &[Value],
    ) -> Result<Vec<String>, StorageError> {
        let table = schema::table_rows();
        let mut digests = Vec::with_capacity(rows.len());
        let mut seen: HashSet<String> = HashSet::new();
        let mut insert = table.insert().or_ignore();
        for row in rows {
            let encoded = serde_json::to_string(row)?;
            let digest = compute_row_digest(row)?;
            if seen.insert(digest.clone()) {
                insert = insert.row(vec![
                    ParamValue::Str(project_id.to_string()),
                    ParamValue::Str(digest.clone()),
                    ParamValue::Str(encoded),
                ]);
            }
            digests.push(digest);
        }
        if !digests.is_empty() {
            let stored = self
                .backend()
                .insert(&insert.prepare(self.backend().kind()))?;
            debug!(project_id, batch = rows.len(), stored, "write rows");
        }
        Ok(digests)
    }

    /// Stores a manifest, returning the table digest it hashes to.
    pub fn write_manifest(
        &self,
        project_id: &str,
        row_digests: Vec<String>,
    ) -> Result<String, StorageError> {
        let table_digest = compute_table_digest(row_digests.iter().map(String::as_str));
        let table = schema::table_manifests();
        let stmt = table
            .insert()
            .or_ignore()
            .row(vec![
                ParamValue::Str(project_id.to_string()),
                ParamValue::Str(table_digest.clone()),
                ParamValue::Str(serde_json::to_string(&row_digests)?),
            ])
            .prepare(self.backend().kind());
        self.backend().insert(&stmt)?;
        debug!(project_id, table_digest = %table_digest, rows = row_digests.len(), "write manifest");
        Ok(table_digest)
    }

    /// Stores rows and their manifest in one call.
    pub fn create_table(
        &self,
        project_id: &str,
        rows: &[Value],
    ) -> Result<(String, Vec<String>), StorageError> {
        let row_digests = self.write_rows(project_id, rows)?;
        let table_digest = self.write_manifest(project_id, row_digests.clone())?;
        Ok((table_digest, row_digests))
    }

    /// Reads rows in manifest order (or its reverse), paginated.
    ///
    /// Pagination is applied to the manifest before any row is fetched;
    /// `row_index` always reports the original manifest position.
    pub fn query_rows_natural(
        &self,
        project_id: &str,
        table_digest: &str,
        limit: Option<i64>,
        offset: Option<i64>,
        direction: SortDirection,
    ) -> Result<Vec<TableRowRecord>, StorageError> {
        let manifest = self.load_manifest(project_id, table_digest)?;
        let mut indexed: Vec<(i64, &String)> = manifest
            .iter()
            .enumerate()
            .map(|(i, d)| (i as i64, d))
            .collect();
        if direction == SortDirection::Desc {
            indexed.reverse();
        }
        let start = offset.unwrap_or(0).max(0) as usize;
        let slice: Vec<(i64, &String)> = indexed
            .into_iter()
            .skip(start)
            .take(limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX))
            .collect();
        if slice.is_empty() {
            return Ok(Vec::new());
        }

        let unique: Vec<String> = dedup_preserving_order(slice.iter().map(|(_, d)| d.as_str()));
        let vals = self.fetch_row_values(project_id, &unique)?;
        slice
            .into_iter()
            .map(|(row_index, digest)| {
                let val = vals.get(digest.as_str()).cloned().ok_or_else(|| {
                    StorageError::Integrity {
                        reason: format!("manifest references missing row {digest}"),
                    }
                })?;
                Ok(TableRowRecord {
                    digest: digest.clone(),
                    row_index,
                    val,
                })
            })
            .collect()
    }

    /// Reads rows through a compiled filter and sort.
    ///
    /// With sort terms, LIMIT/OFFSET apply to distinct stored rows in SQL
    /// and duplicate manifest entries re-expand afterwards (grouped per
    /// digest), each keeping its original index. Without sort terms,
    /// results follow manifest order: matches are re-expanded first, then
    /// paginated over manifest positions in application code.
    pub fn query_rows_filtered(
        &self,
        project_id: &str,
        table_digest: &str,
        filter: Option<&Query>,
        sorts: &[SortBy],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<TableRowRecord>, StorageError> {
        let manifest = self.load_manifest(project_id, table_digest)?;
        if manifest.is_empty() {
            return Ok(Vec::new());
        }
        let mut occurrences: HashMap<&str, Vec<i64>> = HashMap::new();
        for (i, digest) in manifest.iter().enumerate() {
            occurrences.entry(digest.as_str()).or_default().push(i as i64);
        }
        let unique: Vec<String> = dedup_preserving_order(manifest.iter().map(String::as_str));

        let table = schema::table_rows();
        let kind = self.backend().kind();
        let mut select = table
            .select()
            .fields(&["digest", "val"])
            .filter(scope_filter(project_id, &unique, filter));
        if !sorts.is_empty() {
            select = select.order_by(sorts.to_vec());
            // Paginating in SQL is only sound when SQL controls the order;
            // unsorted reads paginate over manifest positions below.
            if let Some(l) = limit {
                select = select.limit(l);
            }
            if let Some(o) = offset {
                select = select.offset(o);
            }
        }
        let stmt = select.prepare(kind, None)?;
        debug!(project_id, table_digest, sql = %stmt.sql, "query rows filtered");
        let tuples = self.backend().select(&stmt)?;

        let mut matched: Vec<(String, Value)> = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            let (digest, encoded) = match (&tuple[0], &tuple[1]) {
                (ParamValue::Str(d), ParamValue::Str(v)) => (d.clone(), v),
                other => {
                    return Err(StorageError::Integrity {
                        reason: format!("malformed row tuple: {other:?}"),
                    })
                }
            };
            matched.push((digest, serde_json::from_str(encoded)?));
        }

        let mut records = Vec::new();
        for (digest, val) in matched {
            let indices = occurrences.get(digest.as_str()).ok_or_else(|| {
                StorageError::Integrity {
                    reason: format!("row {digest} returned outside the manifest"),
                }
            })?;
            for &row_index in indices {
                records.push(TableRowRecord {
                    digest: digest.clone(),
                    row_index,
                    val: val.clone(),
                });
            }
        }
        if sorts.is_empty() {
            // IN gives no order guarantee; restore manifest order with
            // duplicates interleaved at their own positions, then page.
            records.sort_by_key(|r| r.row_index);
            let start = offset.unwrap_or(0).max(0) as usize;
            records = records
                .into_iter()
                .skip(start)
                .take(limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX))
                .collect();
        }
        Ok(records)
    }

    /// Aggregate statistics for one table.
    ///
    /// `row_count` counts manifest entries (duplicates included);
    /// `total_storage_bytes` sums stored payload sizes over distinct rows.
    pub fn table_stats(
        &self,
        project_id: &str,
        table_digest: &str,
    ) -> Result<TableStats, StorageError> {
        let manifest = self.load_manifest(project_id, table_digest)?;
        let row_count = manifest.len() as i64;
        if manifest.is_empty() {
            return Ok(TableStats {
                row_count: 0,
                total_storage_bytes: 0,
            });
        }
        let unique: Vec<String> = dedup_preserving_order(manifest.iter().map(String::as_str));
        let table = schema::table_rows();
        let stmt = table
            .select()
            .raw_field("SUM(LENGTH(val_dump))", "total_bytes")
            .filter(scope_filter(project_id, &unique, None))
            .prepare(self.backend().kind(), None)?;
        let tuples = self.backend().select(&stmt)?;
        let total_storage_bytes = match tuples.first().and_then(|t| t.first()) {
            Some(ParamValue::Int(bytes)) => *bytes,
            Some(ParamValue::Null) | None => 0,
            other => {
                return Err(StorageError::Integrity {
                    reason: format!("unexpected aggregate value: {other:?}"),
                })
            }
        };
        Ok(TableStats {
            row_count,
            total_storage_bytes,
        })
    }

    /// Loads a manifest's ordered digest list; unknown digests and null
    /// payloads coalesce to an empty list.
    fn load_manifest(
        &self,
        project_id: &str,
        table_digest: &str,
    ) -> Result<Vec<String>, StorageError> {
        let table = schema::table_manifests();
        let filter = Query::new(Operand::Operation(Operation::And(vec![
            Operand::Operation(Operation::Eq(
                Box::new(Operand::get_field("project_id")),
                Box::new(Operand::literal(project_id)),
            )),
            Operand::Operation(Operation::Eq(
                Box::new(Operand::get_field("digest")),
                Box::new(Operand::literal(table_digest)),
            )),
        ])));
        let stmt = table
            .select()
            .fields(&["row_digests"])
            .filter(filter)
            .prepare(self.backend().kind(), None)?;
        let tuples = self.backend().select(&stmt)?;
        match tuples.first().and_then(|t| t.first()) {
            Some(ParamValue::Str(encoded)) => {
                let decoded: Option<Vec<String>> = serde_json::from_str(encoded)?;
                Ok(decoded.unwrap_or_default())
            }
            Some(ParamValue::Null) | None => Ok(Vec::new()),
            other => Err(StorageError::Integrity {
                reason: format!("malformed manifest payload: {other:?}"),
            }),
        }
    }

    fn fetch_row_values(
        &self,
        project_id: &str,
        digests: &[String],
    ) -> Result<HashMap<String, Value>, StorageError> {
        let table = schema::table_rows();
        let stmt = table
            .select()
            .fields(&["digest", "val"])
            .filter(scope_filter(project_id, digests, None))
            .prepare(self.backend().kind(), None)?;
        let tuples = self.backend().select(&stmt)?;
        let mut vals = HashMap::with_capacity(tuples.len());
        for tuple in tuples {
            match (&tuple[0], &tuple[1]) {
                (ParamValue::Str(digest), ParamValue::Str(encoded)) => {
                    vals.insert(digest.clone(), serde_json::from_str(encoded)?);
                }
                other => {
                    return Err(StorageError::Integrity {
                        reason: format!("malformed row tuple: {other:?}"),
                    })
                }
            }
        }
        Ok(vals)
    }
}

fn dedup_preserving_order<'a>(digests: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for digest in digests {
        if seen.insert(digest) {
            out.push(digest.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_rows_dedups_within_batch() {
        let store = TraceStore::open_in_memory().unwrap();
        let rows = vec![json!({"x": 1}), json!({"x": 1}), json!({"x": 2})];
        let digests = store.write_rows("p1", &rows).unwrap();
        assert_eq!(digests.len(), 3);
        assert_eq!(digests[0], digests[1]);
        assert_ne!(digests[0], digests[2]);

        let stats_table = schema::table_rows();
        let stmt = stats_table
            .select()
            .fields(&["digest"])
            .prepare(crate::dialect::DatabaseKind::Sqlite, None)
            .unwrap();
        let stored = store.backend().select(&stmt).unwrap();
        assert_eq!(stored.len(), 2, "identical content stored once");
    }

    #[test]
    fn test_unknown_table_digest_reads_as_empty() {
        let store = TraceStore::open_in_memory().unwrap();
        let records = store
            .query_rows_natural("p1", "no-such-digest", None, None, SortDirection::Asc)
            .unwrap();
        assert!(records.is_empty());
        let stats = store.table_stats("p1", "no-such-digest").unwrap();
        assert_eq!(stats.row_count, 0);
        assert_eq!(stats.total_storage_bytes, 0);
    }

    #[test]
    fn test_empty_manifest_digest_is_stable() {
        let store = TraceStore::open_in_memory().unwrap();
        let (digest_a, rows_a) = store.create_table("p1", &[]).unwrap();
        let (digest_b, _) = store.create_table("p1", &[]).unwrap();
        assert!(rows_a.is_empty());
        assert_eq!(digest_a, digest_b);
    }
}
