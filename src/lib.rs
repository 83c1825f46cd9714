//! StreamBase Core Engine
//!
//! An embedded analytical query engine layered over a streaming, append-only
//! log of self-describing record blobs. Records are never re-serialised; the
//! engine builds secondary B-tree indexes during ingest and exposes every
//! logical table to an embedded SQLite instance as a virtual table backed by
//! those indexes.

pub mod crypto;
pub mod data;
pub mod database;
pub mod index;
pub mod query;
pub mod storage;
pub mod table;

// Re-export main types
pub use data::{ColumnDef, DatabaseSchema, FileId, QueryResult, TableDef, Value, ValueType};
pub use database::{Database, TableStats};
pub use index::BTreeIndex;
pub use storage::{RecordInfo, StoredRecord, StreamingStore};
pub use table::{BatchExtractor, FastFieldExtractor, FieldExtractor, TableStore};

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Source already registered: {0}")]
    DuplicateSource(String),

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    TruncatedFrame { needed: usize, available: usize },

    #[error("Invalid offset: {0}")]
    InvalidOffset(u64),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("Encryption key not set")]
    CryptoUnavailable,

    #[error("Schema parse error: {0}")]
    SchemaParseError(String),
}

impl From<rusqlite::Error> for StreamError {
    fn from(err: rusqlite::Error) -> Self {
        StreamError::Sql(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
