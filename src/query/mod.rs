//! Query execution
//!
//! The embedded SQLite instance is the SQL executor; every catalog entry is
//! exposed to it as a read-only virtual table backed by the streaming store
//! and the B-tree indexes. Trivial query shapes are intercepted before
//! SQLite sees them.

pub mod engine;
pub mod fast_path;
pub mod vtab;

pub use engine::{SourceHandle, SqlEngine};
pub use fast_path::QueryShape;

use crate::data::Value;

/// Number of virtual columns appended after the real columns:
/// `_source`, `_rowid`, `_offset`, `_data`.
pub const VIRTUAL_COLUMNS: usize = 4;

/// Map a value onto the storage class SQLite binds for it.
pub(crate) fn to_sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Int8(v) => Sql::Integer(*v as i64),
        Value::Int16(v) => Sql::Integer(*v as i64),
        Value::Int32(v) => Sql::Integer(*v as i64),
        Value::Int64(v) => Sql::Integer(*v),
        Value::UInt8(v) => Sql::Integer(*v as i64),
        Value::UInt16(v) => Sql::Integer(*v as i64),
        Value::UInt32(v) => Sql::Integer(*v as i64),
        Value::UInt64(v) => Sql::Integer(*v as i64),
        Value::Float32(v) => Sql::Real(*v as f64),
        Value::Float64(v) => Sql::Real(*v),
        Value::Str(s) => Sql::Text(s.clone()),
        Value::Bytes(b) => Sql::Blob(b.clone()),
    }
}

/// Map a SQLite result cell back into the value domain.
pub(crate) fn from_sql_ref(value: rusqlite::types::ValueRef<'_>) -> Value {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int64(v),
        ValueRef::Real(v) => Value::Float64(v),
        ValueRef::Text(t) => Value::Str(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

pub(crate) fn from_sql_value(value: rusqlite::types::Value) -> Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => Value::Null,
        Sql::Integer(v) => Value::Int64(v),
        Sql::Real(v) => Value::Float64(v),
        Sql::Text(t) => Value::Str(t),
        Sql::Blob(b) => Value::Bytes(b),
    }
}
