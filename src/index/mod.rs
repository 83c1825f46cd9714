//! Index module - B-tree secondary indexes over the record log

mod btree;

pub use btree::{BTreeIndex, IndexEntry};
