//! Record trait and index value types for the generic [`crate::store::Store`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed value usable for secondary-index lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            IndexValue::String(_) => "string",
            IndexValue::Int(_) => "int",
            IndexValue::Bool(_) => "bool",
        }
    }

    pub(crate) fn to_sql_text(&self) -> String {
        match self {
            IndexValue::String(s) => s.clone(),
            IndexValue::Int(i) => i.to_string(),
            IndexValue::Bool(b) => b.to_string(),
        }
    }
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql_text())
    }
}

/// Comparison operator for a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

/// A single secondary-index filter used by [`crate::store::Store::list`].
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value,
        }
    }

    pub fn new(field: impl Into<String>, op: FilterOp, value: IndexValue) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub(crate) fn sql_op(&self) -> &'static str {
        match self.op {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// A persistable record. Every collection stored by [`crate::store::Store`] implements this.
pub trait Record: Serialize + for<'de> Deserialize<'de> + Clone {
    /// Stable identity within the collection.
    fn id(&self) -> &str;

    /// Last-modified timestamp (Unix milliseconds); used to order JSONL replay.
    fn updated_at(&self) -> i64;

    /// Collection/table name. Fixed per type.
    fn collection_name() -> &'static str
    where
        Self: Sized;

    /// Fields to project into the secondary index for [`Filter`]-based lookups.
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
