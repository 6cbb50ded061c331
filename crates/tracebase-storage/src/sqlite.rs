//! Embedded SQLite backend.
//!
//! Wraps one `rusqlite` connection behind a mutex and implements
//! [`QueryBackend`] over it. Statements are cached by text (parameter
//! builder namespaces make generated SQL vary per call, but the hand-built
//! and DDL statements repeat), inserts run inside a transaction so a batch
//! is all-or-nothing, and the connection is configured with WAL journaling
//! and NORMAL synchronous on open.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, ToSql};
use tracing::debug;

use crate::dialect::DatabaseKind;
use crate::error::StorageError;
use crate::param::ParamValue;
use crate::table::{PreparedDelete, PreparedInsert, PreparedSelect, Table};
use crate::traits::QueryBackend;

impl ToSql for ParamValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            ParamValue::Str(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            ParamValue::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            ParamValue::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            ParamValue::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            ParamValue::Null => ToSqlOutput::Owned(SqlValue::Null),
        })
    }
}

fn value_ref_to_param(value: ValueRef<'_>) -> Result<ParamValue, StorageError> {
    Ok(match value {
        ValueRef::Null => ParamValue::Null,
        ValueRef::Integer(i) => ParamValue::Int(i),
        ValueRef::Real(f) => ParamValue::Float(f),
        ValueRef::Text(bytes) => ParamValue::Str(
            std::str::from_utf8(bytes)
                .map_err(|_| StorageError::Integrity {
                    reason: "non-UTF-8 text in result row".to_string(),
                })?
                .to_string(),
        ),
        ValueRef::Blob(_) => {
            return Err(StorageError::Integrity {
                reason: "unexpected blob column in result row".to_string(),
            })
        }
    })
}

/// [`QueryBackend`] over an embedded SQLite database.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (creating if needed) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::configure(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(SqliteBackend {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Integrity {
            reason: "connection mutex poisoned".to_string(),
        })
    }
}

impl QueryBackend for SqliteBackend {
    fn kind(&self) -> DatabaseKind {
        DatabaseKind::Sqlite
    }

    fn select(&self, stmt: &PreparedSelect) -> Result<Vec<Vec<ParamValue>>, StorageError> {
        let conn = self.lock()?;
        debug!(sql = %stmt.sql, params = stmt.parameters.len(), "select");
        let mut prepared = conn.prepare_cached(&stmt.sql)?;
        // Named parameters bind with the dialect's ':' prefix.
        let names: Vec<String> = stmt
            .parameters
            .iter()
            .map(|(name, _)| format!(":{name}"))
            .collect();
        let bound: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(&stmt.parameters)
            .map(|(name, (_, value))| (name.as_str(), value as &dyn ToSql))
            .collect();
        let mut rows = prepared.query(bound.as_slice())?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let count = row.as_ref().column_count();
            let mut tuple = Vec::with_capacity(count);
            for i in 0..count {
                tuple.push(value_ref_to_param(row.get_ref(i)?)?);
            }
            out.push(tuple);
        }
        Ok(out)
    }

    fn insert(&self, stmt: &PreparedInsert) -> Result<usize, StorageError> {
        let sql = stmt.sql.as_deref().ok_or_else(|| StorageError::Integrity {
            reason: format!("insert into {} prepared without SQL text", stmt.table),
        })?;
        let mut conn = self.lock()?;
        debug!(table = %stmt.table, rows = stmt.rows.len(), "insert");
        let tx = conn.transaction()?;
        let mut stored = 0;
        {
            let mut prepared = tx.prepare_cached(sql)?;
            for row in &stmt.rows {
                stored += prepared.execute(rusqlite::params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;
        Ok(stored)
    }

    fn execute(&self, stmt: &PreparedDelete) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        debug!(sql = %stmt.sql, "execute");
        let names: Vec<String> = stmt
            .parameters
            .iter()
            .map(|(name, _)| format!(":{name}"))
            .collect();
        let bound: Vec<(&str, &dyn ToSql)> = names
            .iter()
            .zip(&stmt.parameters)
            .map(|(name, (_, value))| (name.as_str(), value as &dyn ToSql))
            .collect();
        let mut prepared = conn.prepare_cached(&stmt.sql)?;
        Ok(prepared.execute(bound.as_slice())?)
    }

    fn create_table(&self, table: &Table) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(&table.create_sql(DatabaseKind::Sqlite))?;
        Ok(())
    }
}
