//! Per-backend SQL rendering rules.
//!
//! The expression compiler and the table builders depend only on the
//! [`Dialect`] trait, never on backend identity: placeholder syntax, JSON
//! value/existence functions, null-coercing casts, substring-position
//! search, and the insert strategy are the complete set of differences
//! between the two supported engines.

use tracebase_core::CastTo;

use crate::param::ParamValue;

/// The two supported SQL engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    /// The columnar analytical store used in production.
    Columnar,
    /// Embedded SQLite, used locally and in tests.
    Sqlite,
}

impl DatabaseKind {
    /// The rendering rules for this engine.
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DatabaseKind::Columnar => &ColumnarDialect,
            DatabaseKind::Sqlite => &SqliteDialect,
        }
    }
}

/// Backend-specific rendering rules.
///
/// `expr` arguments are already-rendered SQL fragments; `path_placeholder`
/// is a bound parameter holding a JSON path string (paths are always bound,
/// never interpolated).
pub trait Dialect: Send + Sync {
    /// Renders a parameter placeholder for a named, typed value.
    fn placeholder(&self, name: &str, value: &ParamValue) -> String;

    /// Extracts the value at a JSON path from a JSON document column.
    fn json_value(&self, column: &str, path_placeholder: &str) -> String;

    /// Tests whether a JSON path exists with a non-null type.
    ///
    /// Plain value extraction cannot distinguish null/absent/empty-string
    /// on the columnar engine, so existence gets its own predicate.
    fn json_exists(&self, column: &str, path_placeholder: &str) -> String;

    /// Casts an expression; runtime failures yield NULL, never errors.
    fn cast(&self, expr: &str, to: CastTo) -> String;

    /// 1-indexed substring position; 0 means not found.
    fn string_position(&self, haystack: &str, needle: &str, case_insensitive: bool) -> String;

    /// Whether inserts are expressed as SQL text (true) or as a native
    /// column-names-plus-rows call (false).
    fn insert_uses_sql(&self) -> bool;
}

/// Rendering rules for the columnar analytical engine.
pub struct ColumnarDialect;

impl ColumnarDialect {
    fn param_type(value: &ParamValue) -> &'static str {
        match value {
            ParamValue::Str(_) => "String",
            ParamValue::Int(_) => "Int64",
            ParamValue::Float(_) => "Float64",
            ParamValue::Bool(_) => "Bool",
            ParamValue::Null => "Nullable(String)",
        }
    }
}

impl Dialect for ColumnarDialect {
    fn placeholder(&self, name: &str, value: &ParamValue) -> String {
        format!("{{{}:{}}}", name, Self::param_type(value))
    }

    fn json_value(&self, column: &str, path_placeholder: &str) -> String {
        format!("JSON_VALUE({column}, {path_placeholder})")
    }

    fn json_exists(&self, column: &str, path_placeholder: &str) -> String {
        format!("JSON_EXISTS({column}, {path_placeholder})")
    }

    fn cast(&self, expr: &str, to: CastTo) -> String {
        match to {
            CastTo::Int => format!("toInt64OrNull({expr})"),
            CastTo::Double => format!("toFloat64OrNull({expr})"),
            CastTo::Bool => format!("toUInt8OrNull({expr})"),
            CastTo::String => format!("toString({expr})"),
            CastTo::Exists => format!("({expr} IS NOT NULL)"),
        }
    }

    fn string_position(&self, haystack: &str, needle: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("positionCaseInsensitive({haystack}, {needle})")
        } else {
            format!("position({haystack}, {needle})")
        }
    }

    fn insert_uses_sql(&self) -> bool {
        false
    }
}

/// Rendering rules for embedded SQLite.
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn placeholder(&self, name: &str, _value: &ParamValue) -> String {
        format!(":{name}")
    }

    fn json_value(&self, column: &str, path_placeholder: &str) -> String {
        format!("json_extract({column}, {path_placeholder})")
    }

    fn json_exists(&self, column: &str, path_placeholder: &str) -> String {
        format!(
            "(json_type({column}, {path}) IS NOT NULL AND json_type({column}, {path}) <> 'null')",
            column = column,
            path = path_placeholder
        )
    }

    fn cast(&self, expr: &str, to: CastTo) -> String {
        // SQLite's CAST never fails (non-numeric text becomes 0), so the
        // numeric casts guard on typeof() to coerce failures to NULL.
        match to {
            CastTo::Int => format!(
                "(CASE WHEN typeof({expr}) IN ('integer', 'real') THEN CAST({expr} AS INTEGER) END)"
            ),
            CastTo::Double => format!(
                "(CASE WHEN typeof({expr}) IN ('integer', 'real') THEN CAST({expr} AS REAL) END)"
            ),
            CastTo::Bool => format!("(CASE WHEN typeof({expr}) = 'integer' THEN {expr} END)"),
            CastTo::String => format!("CAST({expr} AS TEXT)"),
            CastTo::Exists => format!("({expr} IS NOT NULL)"),
        }
    }

    fn string_position(&self, haystack: &str, needle: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("instr(lower({haystack}), lower({needle}))")
        } else {
            format!("instr({haystack}, {needle})")
        }
    }

    fn insert_uses_sql(&self) -> bool {
        true
    }
}
