//! The filter/sort expression AST and its JSON wire format.
//!
//! A [`Query`] is a tree of [`Operand`]s: boolean/comparison operations
//! (`and_`, `or_`, `not_`, `eq_`, `gt_`, `gte_`, `in_`, `contains_`) over
//! leaf operands (`literal_`, `get_field_`, `convert_`). The JSON encoding
//! uses exactly those keys; that shape is the system's external wire
//! contract and must round-trip through serde unchanged.
//!
//! This module is pure data. Compilation to SQL lives in the storage crate,
//! which consumes these enums with exhaustive matches -- adding a variant
//! here forces every compiler branch to be handled.
//!
//! # Examples
//!
//! ```
//! use tracebase_core::query::{Query, Operand, Operation, Literal};
//!
//! let query: Query = serde_json::from_value(serde_json::json!(
//!     {"eq_": [{"get_field_": "id"}, {"literal_": "abc"}]}
//! )).unwrap();
//! match &query.expr {
//!     Operand::Operation(Operation::Eq(lhs, _)) => {
//!         assert_eq!(**lhs, Operand::get_field("id"));
//!     }
//!     other => panic!("unexpected operand: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};

/// A complete filter expression: a single root operand.
///
/// Serializes transparently as the root operand's JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    /// Root of the expression tree.
    pub expr: Operand,
}

impl Query {
    /// Wraps an operand as a complete query.
    pub fn new(expr: Operand) -> Self {
        Query { expr }
    }
}

/// A node in the expression tree: a leaf or a nested operation.
///
/// Untagged on the wire: each variant is distinguished by its single key
/// (`literal_`, `get_field_`, `convert_`) or by the operation's own key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// A constant value, bound as a query parameter at compile time.
    Literal { literal_: Literal },
    /// A dot-separated field path resolved against the table's columns.
    ///
    /// If the first segment names a JSON column, the remainder is rewritten
    /// into a JSON path expression by the compiler.
    GetField { get_field_: String },
    /// A type conversion applied to an inner operand.
    Convert { convert_: Box<ConvertSpec> },
    /// A nested operation.
    Operation(Operation),
}

impl Operand {
    /// Builds a `literal_` operand.
    pub fn literal(value: impl Into<Literal>) -> Self {
        Operand::Literal {
            literal_: value.into(),
        }
    }

    /// Builds a `get_field_` operand.
    pub fn get_field(path: impl Into<String>) -> Self {
        Operand::GetField {
            get_field_: path.into(),
        }
    }

    /// Builds a `convert_` operand.
    pub fn convert(input: Operand, to: CastTo) -> Self {
        Operand::Convert {
            convert_: Box::new(ConvertSpec { input, to }),
        }
    }
}

/// A boolean or comparison operation over operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Logical conjunction. One child degrades to the child itself;
    /// zero children is a compile error.
    #[serde(rename = "and_")]
    And(Vec<Operand>),
    /// Logical disjunction. Same degradation rules as `and_`.
    #[serde(rename = "or_")]
    Or(Vec<Operand>),
    /// Logical negation of exactly one child.
    #[serde(rename = "not_")]
    Not(Vec<Operand>),
    /// Equality comparison.
    #[serde(rename = "eq_")]
    Eq(Box<Operand>, Box<Operand>),
    /// Strictly-greater-than comparison.
    #[serde(rename = "gt_")]
    Gt(Box<Operand>, Box<Operand>),
    /// Greater-than-or-equal comparison.
    #[serde(rename = "gte_")]
    Gte(Box<Operand>, Box<Operand>),
    /// Membership test: a field operand against a list of literals.
    /// An empty list is a compile error.
    #[serde(rename = "in_")]
    In(Box<Operand>, Vec<Operand>),
    /// Substring containment, optionally case-insensitive.
    #[serde(rename = "contains_")]
    Contains(ContainsSpec),
}

/// Payload of a `contains_` operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainsSpec {
    /// The haystack operand (usually a field).
    pub input: Box<Operand>,
    /// The needle operand (usually a literal).
    pub substr: Box<Operand>,
    /// Case-insensitive matching (simple codepoint folding, no
    /// locale-aware normalization).
    #[serde(default)]
    pub case_insensitive: bool,
}

/// Payload of a `convert_` operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertSpec {
    /// The operand being converted.
    pub input: Operand,
    /// Target conversion.
    pub to: CastTo,
}

/// Target of a `convert_` cast.
///
/// Runtime cast failures coerce to the backend's NULL rather than raising,
/// preserving filter semantics over mixed-type dynamic columns. `Exists`
/// is not a value cast: it compiles to the backend's path-existence
/// predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastTo {
    Int,
    Double,
    Bool,
    String,
    Exists,
}

/// A constant value carried by a `literal_` operand.
///
/// Untagged: plain JSON scalars on the wire. Parameter placeholder types
/// are inferred from the variant at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Str(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Str(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

/// One sort term: a field path plus a direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    /// Field path, same resolution rules as `get_field_`.
    pub field: String,
    /// Sort direction.
    pub direction: SortDirection,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        SortBy {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        SortBy {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Sort direction for a [`SortBy`] term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    /// The SQL keyword for this direction.
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}
