//! Storage module - streaming append-only record log
//!
//! The raw log stream is the persistent form: `export` emits exactly the
//! framed byte stream and `load_and_rebuild` consumes it.

pub mod stream;

pub use stream::{RecordInfo, StoredRecord, StreamingStore};
