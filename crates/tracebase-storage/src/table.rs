//! Typed table descriptors and query builders.
//!
//! A [`Table`] describes logical columns (name, type, nullability, optional
//! distinct storage name) plus the physical layout hints each backend needs
//! (sort key for the columnar engine, primary key for SQLite). The builders
//! it hands out ([`Select`], [`Insert`], purge) render to prepared statement
//! values; they never touch a connection. LIMIT and OFFSET are always bound
//! parameters.
//!
//! JSON columns are stored under a `_dump` suffix by convention;
//! [`tuple_to_row`] strips the suffix and decodes the dump when marshaling
//! result tuples back into JSON objects.

use serde_json::{Map, Number, Value};

use tracebase_core::query::{Query, SortBy};

use crate::compile::{compile_order_by, compile_query, CompileError, FieldContext};
use crate::dialect::DatabaseKind;
use crate::param::{ParamBuilder, ParamValue};

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Logical column types, mapped to backend types at DDL time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Int,
    Float,
    Bool,
    /// RFC 3339 UTC text in SQLite, DateTime64(6) in the columnar engine.
    Timestamp,
    /// A JSON document, stored as text under the `_dump` storage name.
    Json,
}

impl ColumnType {
    fn sqlite_type(self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Timestamp | ColumnType::Json => "TEXT",
            ColumnType::Int | ColumnType::Bool => "INTEGER",
            ColumnType::Float => "REAL",
        }
    }

    fn columnar_type(self) -> &'static str {
        match self {
            ColumnType::String | ColumnType::Json => "String",
            ColumnType::Int => "Int64",
            ColumnType::Float => "Float64",
            ColumnType::Bool => "UInt8",
            ColumnType::Timestamp => "DateTime64(6)",
        }
    }
}

/// One logical column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    /// Physical column name when it differs from the logical one.
    db_name: Option<String>,
    pub col_type: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Column {
            name: name.into(),
            db_name: None,
            col_type,
            nullable: false,
        }
    }

    /// Sets the physical storage name (e.g. `val` stored as `val_dump`).
    pub fn stored_as(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// The physical column name used in generated SQL.
    pub fn storage_name(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// A table descriptor: columns plus physical layout hints.
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    /// Columnar engine sort key (ORDER BY clause of the table engine).
    pub sort_key: Vec<String>,
    /// SQLite primary key; empty means no PRIMARY KEY constraint.
    pub primary_key: Vec<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Table {
            name: name.into(),
            columns,
            sort_key: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn with_sort_key(mut self, keys: &[&str]) -> Self {
        self.sort_key = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_primary_key(mut self, keys: &[&str]) -> Self {
        self.primary_key = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Looks up a column by logical name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn storage_name_of<'a>(&'a self, logical: &'a str) -> &'a str {
        self.column(logical)
            .map(Column::storage_name)
            .unwrap_or(logical)
    }

    /// Idempotent CREATE TABLE DDL for the given backend.
    pub fn create_sql(&self, kind: DatabaseKind) -> String {
        match kind {
            DatabaseKind::Sqlite => {
                let mut defs: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| {
                        let mut def =
                            format!("{} {}", c.storage_name(), c.col_type.sqlite_type());
                        if !c.nullable {
                            def.push_str(" NOT NULL");
                        }
                        def
                    })
                    .collect();
                if !self.primary_key.is_empty() {
                    let keys: Vec<&str> = self
                        .primary_key
                        .iter()
                        .map(|k| self.storage_name_of(k))
                        .collect();
                    defs.push(format!("PRIMARY KEY ({})", keys.join(", ")));
                }
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
                    self.name,
                    defs.join(",\n    ")
                )
            }
            DatabaseKind::Columnar => {
                let defs: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| {
                        let base = c.col_type.columnar_type();
                        let ty = if c.nullable {
                            format!("Nullable({base})")
                        } else {
                            base.to_string()
                        };
                        format!("{} {}", c.storage_name(), ty)
                    })
                    .collect();
                let order: Vec<&str> = self
                    .sort_key
                    .iter()
                    .map(|k| self.storage_name_of(k))
                    .collect();
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (\n    {}\n) ENGINE = MergeTree ORDER BY ({})",
                    self.name,
                    defs.join(",\n    "),
                    order.join(", ")
                )
            }
        }
    }

    /// Starts a SELECT against this table.
    pub fn select(&self) -> Select<'_> {
        Select {
            table: self,
            fields: Vec::new(),
            raw_fields: Vec::new(),
            joins: Vec::new(),
            filter: None,
            raw_where: Vec::new(),
            sorts: Vec::new(),
            raw_order: None,
            group_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Starts an INSERT into this table.
    pub fn insert(&self) -> Insert<'_> {
        Insert {
            table: self,
            columns: self.columns.iter().map(|c| c.name.clone()).collect(),
            rows: Vec::new(),
            or_ignore: false,
        }
    }

    /// Builds a DELETE restricted by a filter expression.
    pub fn purge(
        &self,
        kind: DatabaseKind,
        filter: &Query,
    ) -> Result<PreparedDelete, CompileError> {
        let ctx = FieldContext::single(self);
        let mut pb = ParamBuilder::new(kind);
        let compiled = compile_query(filter, &ctx, &mut pb)?;
        Ok(PreparedDelete {
            sql: format!("DELETE FROM {} WHERE {}", self.name, compiled.sql),
            parameters: pb.into_params(),
        })
    }
}

// ---------------------------------------------------------------------------
// SELECT
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

/// A join to another table under an alias. The ON condition is an
/// expression compiled against the combined column namespace.
pub struct Join<'a> {
    pub kind: JoinKind,
    pub table: &'a Table,
    pub alias: String,
    pub on: Query,
}

/// A SELECT builder. Renders to a [`PreparedSelect`]; executes nothing.
pub struct Select<'a> {
    table: &'a Table,
    fields: Vec<String>,
    raw_fields: Vec<(String, String)>,
    joins: Vec<Join<'a>>,
    filter: Option<Query>,
    raw_where: Vec<String>,
    sorts: Vec<SortBy>,
    raw_order: Option<String>,
    group_by: Vec<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl<'a> Select<'a> {
    /// Projects the given logical columns (default: all columns).
    pub fn fields(mut self, names: &[&str]) -> Self {
        self.fields = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Appends a raw SQL projection under a result name.
    pub fn raw_field(mut self, sql: impl Into<String>, name: impl Into<String>) -> Self {
        self.raw_fields.push((sql.into(), name.into()));
        self
    }

    pub fn join(mut self, kind: JoinKind, table: &'a Table, alias: &str, on: Query) -> Self {
        self.joins.push(Join {
            kind,
            table,
            alias: alias.to_string(),
            on,
        });
        self
    }

    /// Filters with a compiled expression.
    pub fn filter(mut self, query: Query) -> Self {
        self.filter = Some(query);
        self
    }

    /// Appends an already-rendered boolean fragment (parameters must have
    /// been registered on the builder later passed to [`Select::prepare`]).
    pub fn raw_where(mut self, sql: impl Into<String>) -> Self {
        self.raw_where.push(sql.into());
        self
    }

    pub fn order_by(mut self, sorts: Vec<SortBy>) -> Self {
        self.sorts = sorts;
        self
    }

    /// Replaces compiled ordering with an already-rendered ORDER BY body.
    pub fn raw_order_by(mut self, sql: impl Into<String>) -> Self {
        self.raw_order = Some(sql.into());
        self
    }

    pub fn group_by(mut self, names: &[&str]) -> Self {
        self.group_by = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Renders the statement. Pass a pre-seeded builder when raw fragments
    /// already registered parameters on it; otherwise a fresh one is used.
    pub fn prepare(
        self,
        kind: DatabaseKind,
        builder: Option<ParamBuilder>,
    ) -> Result<PreparedSelect, CompileError> {
        let mut pb = builder.unwrap_or_else(|| ParamBuilder::new(kind));
        let qualified = !self.joins.is_empty();
        let mut ctx = FieldContext::single(self.table);
        for join in &self.joins {
            ctx.add_table(join.alias.clone(), join.table);
        }

        let mut fields = Vec::new();
        let mut projections = Vec::new();
        let logical: Vec<String> = if self.fields.is_empty() && self.raw_fields.is_empty() {
            self.table.columns.iter().map(|c| c.name.clone()).collect()
        } else {
            self.fields.clone()
        };
        for name in &logical {
            let storage = self.table.storage_name_of(name);
            if qualified {
                projections.push(format!("{}.{}", self.table.name, storage));
            } else {
                projections.push(storage.to_string());
            }
            fields.push(name.clone());
        }
        for (sql, name) in &self.raw_fields {
            projections.push(sql.clone());
            fields.push(name.clone());
        }

        let mut sql = format!(
            "SELECT {} FROM {}",
            projections.join(", "),
            self.table.name
        );
        for join in &self.joins {
            let on = compile_query(&join.on, &ctx, &mut pb)?;
            sql.push_str(&format!(
                " {} {} AS {} ON {}",
                join.kind.sql(),
                join.table.name,
                join.alias,
                on.sql
            ));
        }

        let mut conditions = Vec::new();
        if let Some(query) = &self.filter {
            conditions.push(compile_query(query, &ctx, &mut pb)?.sql);
        }
        conditions.extend(self.raw_where.iter().cloned());
        if !conditions.is_empty() {
            sql.push_str(&format!(" WHERE {}", conditions.join(" AND ")));
        }

        if !self.group_by.is_empty() {
            let names: Vec<&str> = self
                .group_by
                .iter()
                .map(|n| self.table.storage_name_of(n))
                .collect();
            sql.push_str(&format!(" GROUP BY {}", names.join(", ")));
        }

        if let Some(raw) = &self.raw_order {
            sql.push_str(&format!(" ORDER BY {raw}"));
        } else if !self.sorts.is_empty() {
            let order = compile_order_by(&self.sorts, &ctx, &mut pb)?;
            sql.push_str(&format!(" ORDER BY {}", order.sql));
        }

        // SQLite has no OFFSET without LIMIT; -1 means unlimited there.
        let effective_limit = match (self.limit, self.offset) {
            (Some(limit), _) => Some(limit),
            (None, Some(_)) => Some(match kind {
                DatabaseKind::Sqlite => -1,
                DatabaseKind::Columnar => i64::MAX,
            }),
            (None, None) => None,
        };
        if let Some(limit) = effective_limit {
            let ph = pb.add_param(ParamValue::Int(limit));
            sql.push_str(&format!(" LIMIT {ph}"));
        }
        if let Some(offset) = self.offset {
            let ph = pb.add_param(ParamValue::Int(offset));
            sql.push_str(&format!(" OFFSET {ph}"));
        }

        Ok(PreparedSelect {
            sql,
            parameters: pb.into_params(),
            fields,
        })
    }
}

/// A rendered SELECT: SQL text, bound parameters, result column names.
#[derive(Debug, Clone)]
pub struct PreparedSelect {
    pub sql: String,
    pub parameters: Vec<(String, ParamValue)>,
    pub fields: Vec<String>,
}

// ---------------------------------------------------------------------------
// INSERT
// ---------------------------------------------------------------------------

/// An INSERT builder accumulating value rows.
pub struct Insert<'a> {
    table: &'a Table,
    columns: Vec<String>,
    rows: Vec<Vec<ParamValue>>,
    or_ignore: bool,
}

impl Insert<'_> {
    /// Restricts the insert to a subset of logical columns.
    pub fn columns(mut self, names: &[&str]) -> Self {
        self.columns = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Skips rows that collide with an existing primary key.
    ///
    /// On the columnar backend dedup is a table-engine property, so this
    /// only changes the generated SQL for SQLite.
    pub fn or_ignore(mut self) -> Self {
        self.or_ignore = true;
        self
    }

    /// Appends one value row, ordered to match the insert columns.
    pub fn row(mut self, values: Vec<ParamValue>) -> Self {
        self.rows.push(values);
        self
    }

    /// Renders the insert for the given backend.
    ///
    /// SQLite gets positional-placeholder SQL executed once per row; the
    /// columnar backend gets no SQL at all (its client takes column names
    /// plus rows natively).
    pub fn prepare(self, kind: DatabaseKind) -> PreparedInsert {
        let column_names: Vec<String> = self
            .columns
            .iter()
            .map(|n| self.table.storage_name_of(n).to_string())
            .collect();
        let sql = if kind.dialect().insert_uses_sql() {
            let placeholders: Vec<String> =
                (1..=column_names.len()).map(|i| format!("?{i}")).collect();
            let verb = if self.or_ignore {
                "INSERT OR IGNORE"
            } else {
                "INSERT"
            };
            Some(format!(
                "{} INTO {} ({}) VALUES ({})",
                verb,
                self.table.name,
                column_names.join(", "),
                placeholders.join(", ")
            ))
        } else {
            None
        };
        PreparedInsert {
            sql,
            table: self.table.name.clone(),
            column_names,
            rows: self.rows,
        }
    }
}

/// A rendered INSERT.
#[derive(Debug, Clone)]
pub struct PreparedInsert {
    /// Per-row SQL for backends that insert via SQL text; `None` for the
    /// columnar backend's native column-names-plus-rows call.
    pub sql: Option<String>,
    pub table: String,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<ParamValue>>,
}

/// A rendered DELETE.
#[derive(Debug, Clone)]
pub struct PreparedDelete {
    pub sql: String,
    pub parameters: Vec<(String, ParamValue)>,
}

// ---------------------------------------------------------------------------
// Result marshaling
// ---------------------------------------------------------------------------

fn param_to_json(value: &ParamValue) -> Value {
    match value {
        ParamValue::Str(s) => Value::String(s.clone()),
        ParamValue::Int(i) => Value::Number((*i).into()),
        ParamValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        ParamValue::Bool(b) => Value::Bool(*b),
        ParamValue::Null => Value::Null,
    }
}

/// Marshals one result tuple into a JSON object keyed by logical names.
///
/// Names carrying the `_dump` storage suffix are mapped back to their
/// logical column and their text decoded as JSON. Names not found in the
/// table (computed projections) pass through unchanged.
pub fn tuple_to_row(
    table: &Table,
    names: &[String],
    values: &[ParamValue],
) -> Result<Value, serde_json::Error> {
    let mut row = Map::new();
    for (name, value) in names.iter().zip(values) {
        let logical = name.strip_suffix("_dump").unwrap_or(name);
        let is_json = table
            .column(logical)
            .map(|c| c.col_type == ColumnType::Json)
            .unwrap_or(false);
        if is_json {
            let decoded = match value {
                ParamValue::Str(text) => serde_json::from_str(text)?,
                _ => Value::Null,
            };
            row.insert(logical.to_string(), decoded);
        } else {
            row.insert(logical.to_string(), param_to_json(value));
        }
    }
    Ok(Value::Object(row))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use tracebase_core::query::{Operand, Operation};

    fn events_table() -> Table {
        Table::new(
            "events",
            vec![
                Column::new("project_id", ColumnType::String),
                Column::new("digest", ColumnType::String),
                Column::new("created_at", ColumnType::Timestamp),
                Column::new("deleted_at", ColumnType::Timestamp).nullable(),
                Column::new("val", ColumnType::Json).stored_as("val_dump"),
            ],
        )
        .with_sort_key(&["project_id", "digest"])
        .with_primary_key(&["project_id", "digest"])
    }

    #[test]
    fn test_sqlite_ddl() {
        let sql = events_table().create_sql(DatabaseKind::Sqlite);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS events"), "got {sql}");
        assert!(sql.contains("project_id TEXT NOT NULL"), "got {sql}");
        assert!(sql.contains("deleted_at TEXT,"), "nullable column: {sql}");
        assert!(sql.contains("val_dump TEXT NOT NULL"), "storage name: {sql}");
        assert!(sql.contains("PRIMARY KEY (project_id, digest)"), "got {sql}");
    }

    #[test]
    fn test_columnar_ddl() {
        let sql = events_table().create_sql(DatabaseKind::Columnar);
        assert!(sql.contains("created_at DateTime64(6)"), "got {sql}");
        assert!(sql.contains("deleted_at Nullable(DateTime64(6))"), "got {sql}");
        assert!(
            sql.ends_with("ENGINE = MergeTree ORDER BY (project_id, digest)"),
            "got {sql}"
        );
    }

    #[test]
    fn test_select_defaults_to_all_columns() {
        let table = events_table();
        let prepared = table
            .select()
            .prepare(DatabaseKind::Sqlite, None)
            .unwrap();
        assert_eq!(
            prepared.fields,
            vec!["project_id", "digest", "created_at", "deleted_at", "val"]
        );
        assert!(prepared.sql.contains("val_dump"), "got {}", prepared.sql);
        assert!(prepared.parameters.is_empty());
    }

    #[test]
    fn test_select_limit_offset_are_bound() {
        let table = events_table();
        let prepared = table
            .select()
            .fields(&["digest"])
            .limit(10)
            .offset(5)
            .prepare(DatabaseKind::Sqlite, None)
            .unwrap();
        assert!(prepared.sql.contains("LIMIT :"), "got {}", prepared.sql);
        assert!(prepared.sql.contains("OFFSET :"), "got {}", prepared.sql);
        assert_eq!(prepared.parameters.len(), 2);
        assert_eq!(prepared.parameters[0].1, ParamValue::Int(10));
        assert_eq!(prepared.parameters[1].1, ParamValue::Int(5));
    }

    #[test]
    fn test_select_offset_without_limit_gets_sentinel_limit() {
        let table = events_table();
        let prepared = table
            .select()
            .fields(&["digest"])
            .offset(3)
            .prepare(DatabaseKind::Sqlite, None)
            .unwrap();
        assert!(prepared.sql.contains("LIMIT"), "got {}", prepared.sql);
        assert_eq!(prepared.parameters[0].1, ParamValue::Int(-1));
    }

    #[test]
    fn test_select_with_filter_and_order() {
        let table = events_table();
        let query: Query = serde_json::from_value(
            json!({"eq_": [{"get_field_": "project_id"}, {"literal_": "p1"}]}),
        )
        .unwrap();
        let prepared = table
            .select()
            .fields(&["digest"])
            .filter(query)
            .order_by(vec![SortBy::desc("created_at")])
            .prepare(DatabaseKind::Sqlite, None)
            .unwrap();
        assert!(prepared.sql.contains("WHERE project_id = :"), "got {}", prepared.sql);
        assert!(
            prepared.sql.contains("ORDER BY created_at DESC"),
            "got {}",
            prepared.sql
        );
    }

    #[test]
    fn test_join_condition_compiles_against_combined_namespace() {
        let events = events_table();
        let manifests = Table::new(
            "manifests",
            vec![
                Column::new("digest", ColumnType::String),
                Column::new("row_digests", ColumnType::Json).stored_as("row_digests_dump"),
            ],
        );
        let on = Query::new(Operand::Operation(Operation::Eq(
            Box::new(Operand::get_field("events.digest")),
            Box::new(Operand::get_field("m.digest")),
        )));
        let prepared = events
            .select()
            .fields(&["digest"])
            .join(JoinKind::Inner, &manifests, "m", on)
            .prepare(DatabaseKind::Sqlite, None)
            .unwrap();
        assert!(
            prepared
                .sql
                .contains("JOIN manifests AS m ON events.digest = m.digest"),
            "got {}",
            prepared.sql
        );
        // Joined selects qualify every projection.
        assert!(prepared.sql.starts_with("SELECT events.digest"), "got {}", prepared.sql);
    }

    #[test]
    fn test_insert_sql_for_sqlite() {
        let table = events_table();
        let prepared = table
            .insert()
            .columns(&["project_id", "digest", "val"])
            .or_ignore()
            .row(vec![
                ParamValue::Str("p1".into()),
                ParamValue::Str("d1".into()),
                ParamValue::Str("{}".into()),
            ])
            .prepare(DatabaseKind::Sqlite);
        assert_eq!(
            prepared.sql.as_deref(),
            Some("INSERT OR IGNORE INTO events (project_id, digest, val_dump) VALUES (?1, ?2, ?3)")
        );
        assert_eq!(prepared.rows.len(), 1);
    }

    #[test]
    fn test_insert_native_for_columnar() {
        let table = events_table();
        let prepared = table
            .insert()
            .columns(&["digest"])
            .row(vec![ParamValue::Str("d1".into())])
            .prepare(DatabaseKind::Columnar);
        assert!(prepared.sql.is_none());
        assert_eq!(prepared.column_names, vec!["digest"]);
    }

    #[test]
    fn test_purge_compiles_filter() {
        let table = events_table();
        let query: Query = serde_json::from_value(
            json!({"eq_": [{"get_field_": "project_id"}, {"literal_": "p1"}]}),
        )
        .unwrap();
        let prepared = table.purge(DatabaseKind::Sqlite, &query).unwrap();
        assert!(
            prepared.sql.starts_with("DELETE FROM events WHERE project_id = :"),
            "got {}",
            prepared.sql
        );
        assert_eq!(prepared.parameters.len(), 1);
    }

    #[test]
    fn test_tuple_to_row_decodes_json_and_strips_suffix() {
        let table = events_table();
        let names = vec![
            "digest".to_string(),
            "val_dump".to_string(),
            "version_index".to_string(),
        ];
        let values = vec![
            ParamValue::Str("d1".into()),
            ParamValue::Str(r#"{"model": "m"}"#.into()),
            ParamValue::Int(2),
        ];
        let row = tuple_to_row(&table, &names, &values).unwrap();
        assert_eq!(row["digest"], json!("d1"));
        assert_eq!(row["val"], json!({"model": "m"}));
        assert_eq!(row["version_index"], json!(2));
    }
}
