//! Named-parameter allocation for generated SQL.
//!
//! [`ParamBuilder`] hands out backend-specific placeholders and registers
//! the bound values under fresh, namespaced names. Hashable values are
//! deduplicated within one builder instance: the same value bound twice
//! yields the same parameter name, which keeps bound-parameter counts low
//! and query text stable for caching and logging. Builders are single-use
//! and single-threaded; each query-building call path owns its own
//! instance. The random namespace prefix only exists so that nested
//! builders (joins) cannot collide.

use std::collections::HashMap;

use tracebase_core::Literal;
use uuid::Uuid;

use crate::dialect::DatabaseKind;

/// A value bound to a generated SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl ParamValue {
    /// Converts a query-AST literal into a bindable value.
    pub fn from_literal(literal: &Literal) -> ParamValue {
        match literal {
            Literal::Null => ParamValue::Null,
            Literal::Bool(b) => ParamValue::Bool(*b),
            Literal::Int(i) => ParamValue::Int(*i),
            Literal::Float(f) => ParamValue::Float(*f),
            Literal::Str(s) => ParamValue::Str(s.clone()),
        }
    }

    /// Stable dedup key for hashable values. Floats are not deduplicated.
    fn dedup_key(&self) -> Option<String> {
        match self {
            ParamValue::Str(s) => Some(format!("s:{s}")),
            ParamValue::Int(i) => Some(format!("i:{i}")),
            ParamValue::Bool(b) => Some(format!("b:{b}")),
            ParamValue::Null => Some("n".to_string()),
            ParamValue::Float(_) => None,
        }
    }
}

/// Allocates namespaced, deduplicated parameter names for one query build.
#[derive(Debug)]
pub struct ParamBuilder {
    kind: DatabaseKind,
    prefix: String,
    next_index: usize,
    params: Vec<(String, ParamValue)>,
    seen: HashMap<String, String>,
}

impl ParamBuilder {
    /// Creates a builder for the given backend with a fresh namespace.
    pub fn new(kind: DatabaseKind) -> Self {
        let prefix = format!("pb_{}_", &Uuid::new_v4().simple().to_string()[..6]);
        ParamBuilder {
            kind,
            prefix,
            next_index: 0,
            params: Vec::new(),
            seen: HashMap::new(),
        }
    }

    /// The backend this builder renders placeholders for.
    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    /// Registers a value and returns its placeholder text.
    ///
    /// Identical hashable values reuse the first registration's name.
    pub fn add_param(&mut self, value: ParamValue) -> String {
        if let Some(key) = value.dedup_key() {
            if let Some(existing) = self.seen.get(&key) {
                return self.kind.dialect().placeholder(existing, &value);
            }
            let name = self.fresh_name();
            self.seen.insert(key, name.clone());
            let placeholder = self.kind.dialect().placeholder(&name, &value);
            self.params.push((name, value));
            return placeholder;
        }
        let name = self.fresh_name();
        let placeholder = self.kind.dialect().placeholder(&name, &value);
        self.params.push((name, value));
        placeholder
    }

    /// Consumes the builder, yielding `(name, value)` pairs in registration
    /// order.
    pub fn into_params(self) -> Vec<(String, ParamValue)> {
        self.params
    }

    fn fresh_name(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next_index);
        self.next_index += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_placeholder_syntax() {
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let ph = pb.add_param(ParamValue::Str("abc".to_string()));
        assert!(ph.starts_with(":pb_"), "got placeholder {ph}");
    }

    #[test]
    fn test_columnar_placeholder_carries_type() {
        let mut pb = ParamBuilder::new(DatabaseKind::Columnar);
        let ph = pb.add_param(ParamValue::Int(7));
        assert!(ph.starts_with("{pb_"), "got placeholder {ph}");
        assert!(ph.ends_with(":Int64}"), "got placeholder {ph}");
    }

    #[test]
    fn test_identical_values_deduplicate() {
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let a = pb.add_param(ParamValue::Str("x".to_string()));
        let b = pb.add_param(ParamValue::Str("x".to_string()));
        assert_eq!(a, b);
        assert_eq!(pb.into_params().len(), 1);
    }

    #[test]
    fn test_distinct_values_get_distinct_names() {
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        let a = pb.add_param(ParamValue::Str("x".to_string()));
        let b = pb.add_param(ParamValue::Int(0));
        assert_ne!(a, b);
        assert_eq!(pb.into_params().len(), 2);
    }

    #[test]
    fn test_floats_never_deduplicate() {
        let mut pb = ParamBuilder::new(DatabaseKind::Sqlite);
        pb.add_param(ParamValue::Float(1.5));
        pb.add_param(ParamValue::Float(1.5));
        assert_eq!(pb.into_params().len(), 2);
    }

    #[test]
    fn test_builders_use_distinct_namespaces() {
        let mut a = ParamBuilder::new(DatabaseKind::Sqlite);
        let mut b = ParamBuilder::new(DatabaseKind::Sqlite);
        // Collisions between nested builders would alias unrelated values.
        assert_ne!(
            a.add_param(ParamValue::Int(1)),
            b.add_param(ParamValue::Int(2))
        );
    }
}
