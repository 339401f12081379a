//! A small, ordinal-aligned value representation, independent of whichever
//! MySQL driver decoded it. `replicators` and `data-iterator` both convert
//! into this type at their respective edges so the rest of the pipeline
//! (and the `WriteTarget`) never has to know which producer a row came
//! from.

use std::fmt;

/// One column value. Deliberately small: the pipeline copies and compares
/// rows, it doesn't evaluate expressions over them, so there's no need for
/// the full numeric-coercion machinery a query engine would want.
#[derive(Debug, Clone, PartialEq)]
pub enum DfValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    /// UTF-8 text, including `DECIMAL` and `JSON` columns rendered as their
    /// canonical text form (MySQL accepts both as bind parameters).
    Text(String),
    Bytes(Vec<u8>),
    /// Seconds since the Unix epoch, UTC (the session is always pinned to
    /// `time_zone = '+00:00'` before these are written, see `WriteTarget`).
    Timestamp(i64),
}

impl fmt::Display for DfValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfValue::Null => write!(f, "NULL"),
            DfValue::Int(v) => write!(f, "{v}"),
            DfValue::UInt(v) => write!(f, "{v}"),
            DfValue::Float(v) => write!(f, "{v}"),
            DfValue::Text(v) => write!(f, "{v}"),
            DfValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            DfValue::Timestamp(v) => write!(f, "@{v}"),
        }
    }
}

/// An ordered tuple of column values, ordinal-aligned with a [`crate::TableSchema`].
pub type RowValue = Vec<DfValue>;
