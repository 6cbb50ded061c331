//! Concrete table descriptors for the trace store.
//!
//! Three tables back the engine:
//!
//! - `object_versions`: append-only version rows, no primary key. A series
//!   may hold several rows per digest (re-publishes, deletion markers);
//!   reads dedup per digest, so duplicate physical rows are harmless.
//! - `table_rows`: content-addressed row payloads, keyed by
//!   `(project_id, digest)`. Identical content in a project stores once.
//! - `table_manifests`: ordered row-digest lists, keyed by
//!   `(project_id, digest)` where the digest is the table digest.
//!
//! All DDL is idempotent, so bootstrap can run unconditionally on startup.

use crate::table::{Column, ColumnType, Table};

/// Descriptor for the object version log.
pub fn object_versions() -> Table {
    Table::new(
        "object_versions",
        vec![
            Column::new("project_id", ColumnType::String),
            Column::new("kind", ColumnType::String),
            Column::new("object_id", ColumnType::String),
            Column::new("digest", ColumnType::String),
            Column::new("base_class", ColumnType::String).nullable(),
            Column::new("created_at", ColumnType::Timestamp),
            Column::new("deleted_at", ColumnType::Timestamp).nullable(),
            Column::new("created_by", ColumnType::String).nullable(),
            Column::new("refs", ColumnType::Json).stored_as("refs_dump"),
            Column::new("val", ColumnType::Json).stored_as("val_dump"),
        ],
    )
    .with_sort_key(&["project_id", "kind", "object_id", "digest"])
}

/// Descriptor for content-addressed table row payloads.
pub fn table_rows() -> Table {
    Table::new(
        "table_rows",
        vec![
            Column::new("project_id", ColumnType::String),
            Column::new("digest", ColumnType::String),
            Column::new("val", ColumnType::Json).stored_as("val_dump"),
        ],
    )
    .with_sort_key(&["project_id", "digest"])
    .with_primary_key(&["project_id", "digest"])
}

/// Descriptor for table manifests (ordered row-digest lists).
pub fn table_manifests() -> Table {
    Table::new(
        "table_manifests",
        vec![
            Column::new("project_id", ColumnType::String),
            Column::new("digest", ColumnType::String),
            Column::new("row_digests", ColumnType::Json).stored_as("row_digests_dump"),
        ],
    )
    .with_sort_key(&["project_id", "digest"])
    .with_primary_key(&["project_id", "digest"])
}

/// Every table the store bootstraps, in creation order.
pub fn all_tables() -> Vec<Table> {
    vec![object_versions(), table_rows(), table_manifests()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DatabaseKind;

    #[test]
    fn test_object_versions_has_no_primary_key() {
        let sql = object_versions().create_sql(DatabaseKind::Sqlite);
        assert!(
            !sql.contains("PRIMARY KEY"),
            "version log must allow duplicate digests: {sql}"
        );
    }

    #[test]
    fn test_row_tables_dedup_on_project_and_digest() {
        for table in [table_rows(), table_manifests()] {
            let sql = table.create_sql(DatabaseKind::Sqlite);
            assert!(
                sql.contains("PRIMARY KEY (project_id, digest)"),
                "{}: {sql}",
                table.name
            );
        }
    }

    #[test]
    fn test_json_columns_use_dump_storage_names() {
        for (table, col) in [
            (object_versions(), "val"),
            (object_versions(), "refs"),
            (table_manifests(), "row_digests"),
        ] {
            let column = table.column(col).unwrap();
            assert!(column.storage_name().ends_with("_dump"), "{col}");
        }
    }

    #[test]
    fn test_ddl_is_idempotent() {
        for table in all_tables() {
            for kind in [DatabaseKind::Sqlite, DatabaseKind::Columnar] {
                assert!(table.create_sql(kind).starts_with("CREATE TABLE IF NOT EXISTS"));
            }
        }
    }
}
