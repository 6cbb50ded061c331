//! Compiles the expression AST into parameterized SQL fragments.
//!
//! The compiler walks the tagged unions from `tracebase-core` with
//! exhaustive matches, resolves dot-separated field paths against a
//! [`FieldContext`] (rewriting paths into JSON column access where the
//! first segment names a JSON column), and registers every literal and
//! JSON path with the caller's [`ParamBuilder`]. All errors here are
//! static: they fire before any query executes, and are never retried.
//!
//! # Sort stability over dynamic fields
//!
//! Ordering by a JSON field never emits a single cast. It emits three
//! terms in fixed priority: existence (descending), numeric-cast value,
//! string-cast value. Rows missing the field sort last, numeric values
//! compare numerically among themselves, and non-numeric values get a
//! deterministic string tiebreak, so ordering stays total across
//! heterogeneously-typed columns.

use std::collections::BTreeSet;

use thiserror::Error;

use tracebase_core::query::{CastTo, Operand, Operation, Query, SortBy};

use crate::param::{ParamBuilder, ParamValue};
use crate::table::{ColumnType, Table};

/// Errors produced while compiling an expression to SQL.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A field path's first segment names no known column.
    #[error("unknown field: {field}")]
    UnknownField { field: String },

    /// A dotted path tried to descend into a non-JSON column.
    #[error("cannot traverse into non-JSON column: {field}")]
    NotTraversable { field: String },

    /// A boolean/membership operation received zero operands. Boolean
    /// identity is never assumed.
    #[error("{op} requires at least one operand")]
    EmptyOperandList { op: &'static str },

    /// An operation received the wrong number of operands.
    #[error("{op} takes exactly {expected} operand(s), got {got}")]
    OperandCount {
        op: &'static str,
        expected: usize,
        got: usize,
    },
}

/// The column namespace an expression compiles against.
///
/// Holds one table per alias; the first entry is the primary table. With a
/// single table, column references render unqualified; once joins add more
/// tables, every reference is alias-qualified.
pub struct FieldContext<'a> {
    tables: Vec<(String, &'a Table)>,
}

impl<'a> FieldContext<'a> {
    /// A context over one table, aliased by its own name.
    pub fn single(table: &'a Table) -> Self {
        FieldContext {
            tables: vec![(table.name.clone(), table)],
        }
    }

    /// Adds a joined table under an alias.
    pub fn add_table(&mut self, alias: impl Into<String>, table: &'a Table) {
        self.tables.push((alias.into(), table));
    }

    fn qualified(&self) -> bool {
        self.tables.len() > 1
    }

    /// Resolves a field path to `(alias, column, remaining path segments)`.
    fn resolve<'f>(
        &self,
        field: &'f str,
    ) -> Result<(&str, &'a crate::table::Column, Vec<&'f str>), CompileError> {
        let parts: Vec<&str> = field.split('.').collect();
        // Alias-qualified reference, e.g. "feedback.payload.note".
        if self.qualified() && parts.len() >= 2 {
            if let Some((alias, table)) = self.tables.iter().find(|(a, _)| a == &parts[0]) {
                if let Some(col) = table.column(parts[1]) {
                    return Ok((alias, col, parts[2..].to_vec()));
                }
            }
        }
        let (alias, primary) = &self.tables[0];
        match primary.column(parts[0]) {
            Some(col) => Ok((alias, col, parts[1..].to_vec())),
            None => Err(CompileError::UnknownField {
                field: field.to_string(),
            }),
        }
    }
}

/// A compiled SQL fragment plus the logical columns it referenced.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub sql: String,
    pub fields: Vec<String>,
}

/// One resolved field reference.
#[derive(Debug, Clone)]
pub struct TransformedField {
    /// Rendered SQL for the reference (column, JSON extraction, or cast).
    pub sql: String,
    /// The logical column the reference is rooted at.
    pub root: String,
    /// Whether the reference targets a JSON (dynamic) column.
    pub dynamic: bool,
}

/// Quotes a dot-path remainder into a JSON path expression.
///
/// Array indices become bracket subscripts; object keys become quoted
/// accessors with `"` and `\` escaped.
fn quote_json_path(parts: &[&str]) -> String {
    let mut path = String::from("$");
    for part in parts {
        if part.bytes().all(|b| b.is_ascii_digit()) && !part.is_empty() {
            path.push_str(&format!("[{part}]"));
        } else {
            let escaped = part.replace('\\', "\\\\").replace('"', "\\\"");
            path.push_str(&format!(".\"{escaped}\""));
        }
    }
    path
}

/// Resolves one field path into a SQL reference, applying an optional cast.
///
/// JSON columns get path extraction with the path bound as a parameter;
/// an `exists` cast becomes the backend's path-existence predicate. A
/// dotted path into a non-JSON column is a compile error.
pub fn transform_field(
    field: &str,
    cast: Option<CastTo>,
    ctx: &FieldContext<'_>,
    pb: &mut ParamBuilder,
) -> Result<TransformedField, CompileError> {
    let dialect = pb.kind().dialect();
    let (alias, column, rest) = ctx.resolve(field)?;
    let base = if ctx.qualified() {
        format!("{}.{}", alias, column.storage_name())
    } else {
        column.storage_name().to_string()
    };
    let root = if ctx.qualified() {
        format!("{}.{}", alias, column.name)
    } else {
        column.name.clone()
    };

    if column.col_type == ColumnType::Json {
        if rest.is_empty() && cast.is_none() {
            return Ok(TransformedField {
                sql: base,
                root,
                dynamic: true,
            });
        }
        let path = quote_json_path(&rest);
        let path_ph = pb.add_param(ParamValue::Str(path));
        let sql = match cast {
            Some(CastTo::Exists) => dialect.json_exists(&base, &path_ph),
            Some(c) => dialect.cast(&dialect.json_value(&base, &path_ph), c),
            None => dialect.json_value(&base, &path_ph),
        };
        return Ok(TransformedField {
            sql,
            root,
            dynamic: true,
        });
    }

    if !rest.is_empty() {
        return Err(CompileError::NotTraversable {
            field: field.to_string(),
        });
    }
    let sql = match cast {
        Some(CastTo::Exists) => format!("({base} IS NOT NULL)"),
        Some(c) => dialect.cast(&base, c),
        None => base,
    };
    Ok(TransformedField {
        sql,
        root,
        dynamic: false,
    })
}

/// Compiles a complete filter expression into a boolean SQL fragment.
pub fn compile_query(
    query: &Query,
    ctx: &FieldContext<'_>,
    pb: &mut ParamBuilder,
) -> Result<CompiledExpr, CompileError> {
    let mut compiler = ExprCompiler {
        ctx,
        pb,
        fields: BTreeSet::new(),
    };
    let sql = compiler.operand(&query.expr)?;
    Ok(CompiledExpr {
        sql,
        fields: compiler.fields.into_iter().collect(),
    })
}

/// Compiles sort terms into an ORDER BY body (without the keyword).
///
/// Plain columns yield one term each; JSON columns yield the three-term
/// expansion described in the module docs. Cast terms carry NULLS LAST so
/// both backends agree that unconvertible values trail convertible ones.
pub fn compile_order_by(
    sorts: &[SortBy],
    ctx: &FieldContext<'_>,
    pb: &mut ParamBuilder,
) -> Result<CompiledExpr, CompileError> {
    let mut terms = Vec::new();
    let mut fields = BTreeSet::new();
    for sort in sorts {
        let direction = sort.direction.sql();
        let probe = transform_field(&sort.field, None, ctx, pb)?;
        fields.insert(probe.root.clone());
        if probe.dynamic {
            let exists = transform_field(&sort.field, Some(CastTo::Exists), ctx, pb)?;
            let numeric = transform_field(&sort.field, Some(CastTo::Double), ctx, pb)?;
            let string = transform_field(&sort.field, Some(CastTo::String), ctx, pb)?;
            terms.push(format!("{} DESC", exists.sql));
            terms.push(format!("{} {} NULLS LAST", numeric.sql, direction));
            terms.push(format!("{} {} NULLS LAST", string.sql, direction));
        } else {
            terms.push(format!("{} {}", probe.sql, direction));
        }
    }
    Ok(CompiledExpr {
        sql: terms.join(", "),
        fields: fields.into_iter().collect(),
    })
}

struct ExprCompiler<'a, 'b> {
    ctx: &'a FieldContext<'a>,
    pb: &'b mut ParamBuilder,
    fields: BTreeSet<String>,
}

impl ExprCompiler<'_, '_> {
    fn operand(&mut self, operand: &Operand) -> Result<String, CompileError> {
        match operand {
            Operand::Literal { literal_ } => {
                Ok(self.pb.add_param(ParamValue::from_literal(literal_)))
            }
            Operand::GetField { get_field_ } => {
                let t = transform_field(get_field_, None, self.ctx, self.pb)?;
                self.fields.insert(t.root);
                Ok(t.sql)
            }
            Operand::Convert { convert_ } => self.convert(&convert_.input, convert_.to),
            Operand::Operation(op) => self.operation(op),
        }
    }

    fn convert(&mut self, input: &Operand, to: CastTo) -> Result<String, CompileError> {
        // Field conversions fold the cast into path resolution so `exists`
        // can use the native existence predicate.
        if let Operand::GetField { get_field_ } = input {
            let t = transform_field(get_field_, Some(to), self.ctx, self.pb)?;
            self.fields.insert(t.root);
            return Ok(t.sql);
        }
        let inner = self.operand(input)?;
        Ok(self.pb.kind().dialect().cast(&inner, to))
    }

    fn operation(&mut self, op: &Operation) -> Result<String, CompileError> {
        match op {
            Operation::And(children) => self.boolean("and_", "AND", children),
            Operation::Or(children) => self.boolean("or_", "OR", children),
            Operation::Not(children) => {
                if children.len() != 1 {
                    return Err(CompileError::OperandCount {
                        op: "not_",
                        expected: 1,
                        got: children.len(),
                    });
                }
                let inner = self.operand(&children[0])?;
                Ok(format!("(NOT ({inner}))"))
            }
            Operation::Eq(lhs, rhs) => self.comparison("=", lhs, rhs),
            Operation::Gt(lhs, rhs) => self.comparison(">", lhs, rhs),
            Operation::Gte(lhs, rhs) => self.comparison(">=", lhs, rhs),
            Operation::In(lhs, rhs) => {
                if rhs.is_empty() {
                    return Err(CompileError::EmptyOperandList { op: "in_" });
                }
                let lhs_sql = self.operand(lhs)?;
                let items: Vec<String> = rhs
                    .iter()
                    .map(|item| self.operand(item))
                    .collect::<Result<_, _>>()?;
                Ok(format!("{} IN ({})", lhs_sql, items.join(", ")))
            }
            Operation::Contains(spec) => {
                let haystack = self.operand(&spec.input)?;
                let needle = self.operand(&spec.substr)?;
                let position = self.pb.kind().dialect().string_position(
                    &haystack,
                    &needle,
                    spec.case_insensitive,
                );
                Ok(format!("{position} > 0"))
            }
        }
    }

    fn boolean(
        &mut self,
        op: &'static str,
        keyword: &str,
        children: &[Operand],
    ) -> Result<String, CompileError> {
        match children {
            [] => Err(CompileError::EmptyOperandList { op }),
            // A single child degrades to itself: no redundant parentheses.
            [only] => self.operand(only),
            many => {
                let parts: Vec<String> = many
                    .iter()
                    .map(|child| self.operand(child))
                    .collect::<Result<_, _>>()?;
                Ok(format!("({})", parts.join(&format!(" {keyword} "))))
            }
        }
    }

    fn comparison(
        &mut self,
        op: &str,
        lhs: &Operand,
        rhs: &Operand,
    ) -> Result<String, CompileError> {
        let lhs_sql = self.operand(lhs)?;
        let rhs_sql = self.operand(rhs)?;
        Ok(format!("{lhs_sql} {op} {rhs_sql}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::dialect::DatabaseKind;
    use crate::table::{Column, Table};

    fn calls_table() -> Table {
        Table::new(
            "calls",
            vec![
                Column::new("id", ColumnType::String),
                Column::new("name", ColumnType::String),
                Column::new("attrs", ColumnType::Json).stored_as("attrs_dump"),
            ],
        )
    }

    fn parse(wire: serde_json::Value) -> Query {
        serde_json::from_value(wire).unwrap()
    }

    #[test]
    fn test_eq_compiles_to_single_bound_param() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [{"get_field_": "id"}, {"literal_": "abc"}]}));

        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        let params = pb.into_params();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].1, ParamValue::Str("abc".to_string()));
        assert_eq!(compiled.sql, format!("id = :{}", params[0].0));
        assert_eq!(compiled.fields, vec!["id".to_string()]);
    }

    #[test]
    fn test_backends_differ_only_in_placeholder_syntax() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [{"get_field_": "id"}, {"literal_": "abc"}]}));

        let mut pb = ParamBuilder::new(DatabaseKind::Columnar);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        let params = pb.into_params();
        assert_eq!(params.len(), 1);
        assert_eq!(
            compiled.sql,
            format!("id = {{{}:String}}", params[0].0),
            "columnar placeholders carry a type"
        );
    }

    #[test]
    fn test_single_child_boolean_degrades() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"and_": [
            {"eq_": [{"get_field_": "id"}, {"literal_": "x"}]}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(
            !compiled.sql.contains('('),
            "single-child and_ must not add parentheses: {}",
            compiled.sql
        );
    }

    #[test]
    fn test_multi_child_boolean_parenthesizes() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"or_": [
            {"eq_": [{"get_field_": "id"}, {"literal_": "x"}]},
            {"eq_": [{"get_field_": "name"}, {"literal_": "y"}]}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(compiled.sql.starts_with('('), "got {}", compiled.sql);
        assert!(compiled.sql.contains(" OR "), "got {}", compiled.sql);
    }

    #[test]
    fn test_not_wraps_child() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"not_": [
            {"eq_": [{"get_field_": "id"}, {"literal_": "x"}]}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(compiled.sql.starts_with("(NOT ("), "got {}", compiled.sql);
    }

    #[test]
    fn test_empty_boolean_is_compile_error() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        for wire in [json!({"and_": []}), json!({"or_": []})] {
            let query = parse(wire);
            let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
            assert!(matches!(
                compile_query(&query, &ctx, &mut pb),
                Err(CompileError::EmptyOperandList { .. })
            ));
        }
    }

    #[test]
    fn test_empty_in_is_compile_error() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"in_": [{"get_field_": "id"}, []]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        assert!(matches!(
            compile_query(&query, &ctx, &mut pb),
            Err(CompileError::EmptyOperandList { op: "in_" })
        ));
    }

    #[test]
    fn test_unknown_field_is_compile_error() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [{"get_field_": "nope"}, {"literal_": 1}]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        assert!(matches!(
            compile_query(&query, &ctx, &mut pb),
            Err(CompileError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_json_path_rewriting() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [
            {"get_field_": "attrs.model.0.name"},
            {"literal_": "gpt"}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(
            compiled.sql.contains("json_extract(attrs_dump, :"),
            "got {}",
            compiled.sql
        );
        let params = pb.into_params();
        let path = params
            .iter()
            .find(|(_, v)| matches!(v, ParamValue::Str(s) if s.starts_with('$')))
            .expect("path parameter registered");
        assert_eq!(path.1, ParamValue::Str("$.\"model\"[0].\"name\"".to_string()));
    }

    #[test]
    fn test_exists_cast_uses_native_predicate() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [
            {"convert_": {"input": {"get_field_": "attrs.x"}, "to": "exists"}},
            {"literal_": true}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(compiled.sql.contains("json_type("), "got {}", compiled.sql);

        let mut pb = ParamBuilder::new(DatabaseKind::Columnar);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(compiled.sql.contains("JSON_EXISTS("), "got {}", compiled.sql);
    }

    #[test]
    fn test_contains_compiles_to_position_test() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"contains_": {
            "input": {"get_field_": "name"},
            "substr": {"literal_": "LLM"},
            "case_insensitive": true
        }}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled = compile_query(&query, &ctx, &mut pb).unwrap();
        assert!(
            compiled.sql.starts_with("instr(lower(name), lower(:"),
            "got {}",
            compiled.sql
        );
        assert!(compiled.sql.ends_with(" > 0"), "got {}", compiled.sql);
    }

    #[test]
    fn test_dotted_path_into_plain_column_fails() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"eq_": [{"get_field_": "id.sub"}, {"literal_": 1}]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        assert!(matches!(
            compile_query(&query, &ctx, &mut pb),
            Err(CompileError::NotTraversable { .. })
        ));
    }

    #[test]
    fn test_order_by_plain_column_single_term() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled =
            compile_order_by(&[SortBy::desc("name")], &ctx, &mut pb).unwrap();
        assert_eq!(compiled.sql, "name DESC");
    }

    #[test]
    fn test_order_by_dynamic_field_three_terms() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let compiled =
            compile_order_by(&[SortBy::asc("attrs.latency")], &ctx, &mut pb).unwrap();
        let sql = &compiled.sql;
        let exists_at = sql.find("json_type").expect("existence term present");
        let numeric_at = sql.find("AS REAL").expect("numeric term present");
        let string_at = sql.find("AS TEXT").expect("string term present");
        assert!(exists_at < numeric_at && numeric_at < string_at, "got {sql}");
        assert_eq!(sql.matches("NULLS LAST").count(), 2, "got {sql}");
        assert!(sql.contains("DESC"), "existence sorts present-first: {sql}");
        // All three terms share one bound path parameter.
        let path_params = pb
            .into_params()
            .into_iter()
            .filter(|(_, v)| matches!(v, ParamValue::Str(s) if s.starts_with('$')))
            .count();
        assert_eq!(path_params, 1);
    }

    #[test]
    fn test_value_dedup_across_expression() {
        let table = calls_table();
        let ctx = FieldContext::single(&table);
        let query = parse(json!({"or_": [
            {"eq_": [{"get_field_": "id"}, {"literal_": "same"}]},
            {"eq_": [{"get_field_": "name"}, {"literal_": "same"}]}
        ]}));
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        compile_query(&query, &ctx, &mut pb).unwrap();
        assert_eq!(pb.into_params().len(), 1, "identical literals share a param");
    }
}
