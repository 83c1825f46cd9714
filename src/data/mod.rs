//! Data model: typed values, file identifiers and query results

mod column;
mod schema;

pub use column::{ColumnDef, DatabaseSchema, TableDef};
pub use schema::SchemaParser;

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Value types supported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Null,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    String,
    Bytes,
}

/// A value that can be stored, indexed and queried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Get the type tag for this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int8(_) => ValueType::Int8,
            Value::Int16(_) => ValueType::Int16,
            Value::Int32(_) => ValueType::Int32,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt8(_) => ValueType::UInt8,
            Value::UInt16(_) => ValueType::UInt16,
            Value::UInt32(_) => ValueType::UInt32,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Float32(_) => ValueType::Float32,
            Value::Float64(_) => ValueType::Float64,
            Value::Str(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant ordinal used for cross-type ordering
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int8(_) => 2,
            Value::Int16(_) => 3,
            Value::Int32(_) => 4,
            Value::Int64(_) => 5,
            Value::UInt8(_) => 6,
            Value::UInt16(_) => 7,
            Value::UInt32(_) => 8,
            Value::UInt64(_) => 9,
            Value::Float32(_) => 10,
            Value::Float64(_) => 11,
            Value::Str(_) => 12,
            Value::Bytes(_) => 13,
        }
    }

    /// Narrow a value to a column's declared type.
    ///
    /// SQLite hands parameters back as Int64/Float64/Text/Blob storage
    /// classes; index keys were built from the extractor's statically-typed
    /// values. A probe must match the stored variant exactly, so integers and
    /// floats are narrowed before the index lookup. Values that do not fit
    /// the target type are returned unchanged (they cannot equal any stored
    /// key of that type).
    pub fn coerce_to(&self, target: ValueType) -> Value {
        match (self, target) {
            (Value::Int64(v), ValueType::Bool) => Value::Bool(*v != 0),
            (Value::Int64(v), ValueType::Int8) => i8::try_from(*v).map(Value::Int8).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::Int16) => i16::try_from(*v).map(Value::Int16).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::Int32) => i32::try_from(*v).map(Value::Int32).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::UInt8) => u8::try_from(*v).map(Value::UInt8).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::UInt16) => u16::try_from(*v).map(Value::UInt16).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::UInt32) => u32::try_from(*v).map(Value::UInt32).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::UInt64) => u64::try_from(*v).map(Value::UInt64).unwrap_or_else(|_| self.clone()),
            (Value::Int64(v), ValueType::Float32) => Value::Float32(*v as f32),
            (Value::Int64(v), ValueType::Float64) => Value::Float64(*v as f64),
            (Value::Float64(v), ValueType::Float32) => Value::Float32(*v as f32),
            _ => self.clone(),
        }
    }

    /// Widen a value to the storage class SQLite would report for it.
    ///
    /// Fast-path rows must be indistinguishable from rows produced by the SQL
    /// executor, which only knows NULL/INTEGER/REAL/TEXT/BLOB.
    pub fn normalize_storage(self) -> Value {
        match self {
            Value::Bool(b) => Value::Int64(b as i64),
            Value::Int8(v) => Value::Int64(v as i64),
            Value::Int16(v) => Value::Int64(v as i64),
            Value::Int32(v) => Value::Int64(v as i64),
            Value::UInt8(v) => Value::Int64(v as i64),
            Value::UInt16(v) => Value::Int64(v as i64),
            Value::UInt32(v) => Value::Int64(v as i64),
            Value::UInt64(v) => Value::Int64(v as i64),
            Value::Float32(v) => Value::Float64(v as f64),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Bytes(b) => {
                write!(f, "x'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

/// Total order over the value domain.
///
/// Null sorts before everything; different non-null variants compare by
/// variant ordinal; within a variant, numeric types use natural ordering,
/// strings and byte sequences compare lexicographically, booleans
/// false < true. Float comparisons with NaN collapse to Equal.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    if a.is_null() {
        return if b.is_null() { Ordering::Equal } else { Ordering::Less };
    }
    if b.is_null() {
        return Ordering::Greater;
    }

    let (ra, rb) = (a.rank(), b.rank());
    if ra != rb {
        return ra.cmp(&rb);
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int8(x), Value::Int8(y)) => x.cmp(y),
        (Value::Int16(x), Value::Int16(y)) => x.cmp(y),
        (Value::Int32(x), Value::Int32(y)) => x.cmp(y),
        (Value::Int64(x), Value::Int64(y)) => x.cmp(y),
        (Value::UInt8(x), Value::UInt8(y)) => x.cmp(y),
        (Value::UInt16(x), Value::UInt16(y)) => x.cmp(y),
        (Value::UInt32(x), Value::UInt32(y)) => x.cmp(y),
        (Value::UInt64(x), Value::UInt64(y)) => x.cmp(y),
        (Value::Float32(x), Value::Float32(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Float64(x), Value::Float64(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        _ => unreachable!("equal ranks imply equal variants"),
    }
}

/// A 4-byte ASCII file identifier carried at bytes 4..8 of every record
/// payload. Routes the record to a catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId(pub [u8; 4]);

impl FileId {
    pub const EMPTY: FileId = FileId([0; 4]);

    /// Read the identifier out of a record payload. Payloads shorter than
    /// 8 bytes have no identifier.
    pub fn extract(payload: &[u8]) -> FileId {
        if payload.len() >= 8 {
            FileId([payload[4], payload[5], payload[6], payload[7]])
        } else {
            FileId::EMPTY
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0 == [0; 4]
    }
}

impl From<&str> for FileId {
    /// Zero-pads identifiers shorter than 4 bytes; longer ones are truncated.
    fn from(s: &str) -> Self {
        let mut id = [0u8; 4];
        for (i, b) in s.bytes().take(4).enumerate() {
            id[i] = b;
        }
        FileId(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.iter().take_while(|&&b| b != 0) {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

/// Query result: column names plus rows of values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}
