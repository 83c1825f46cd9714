//! Table catalog entries
//!
//! A [`TableStore`] manages the per-table view over the shared streaming
//! store: the bound file identifier, the B-tree indexes built during ingest,
//! the table's own record-info vector, its tombstone set and the installed
//! field extractors. Source twins (`table@source`) are separate entries
//! sharing the store but nothing else.

use crate::data::{FileId, TableDef, Value};
use crate::index::BTreeIndex;
use crate::storage::{RecordInfo, StoredRecord, StreamingStore};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Extracts a named field out of an opaque record payload.
///
/// The only way the engine reads structured fields; supplied by the caller
/// who knows the payload format.
pub type FieldExtractor = Arc<dyn Fn(&[u8], &str) -> Value + Send + Sync>;

/// Hot-path extractor that writes a column straight into the SQL executor's
/// result context, bypassing `Value` construction. Returns `Ok(false)` to
/// fall back to the plain extractor. A raw function pointer so the per-column
/// path pays no dynamic dispatch.
pub type FastFieldExtractor =
    fn(data: &[u8], column: usize, ctx: &mut rusqlite::vtab::Context) -> rusqlite::Result<bool>;

/// Extracts all columns of a record in one call.
pub type BatchExtractor = fn(data: &[u8], out: &mut Vec<Value>);

/// The extractor capability slots of a catalog entry
#[derive(Clone, Default)]
pub struct ExtractorSet {
    pub field: Option<FieldExtractor>,
    pub fast: Option<FastFieldExtractor>,
    pub batch: Option<BatchExtractor>,
}

/// Shared handles used by cursors and the fast path
pub type SharedIndexes = Arc<AHashMap<String, Arc<RwLock<BTreeIndex>>>>;
pub type SharedTombstones = Arc<RwLock<HashSet<u64>>>;
pub type SharedExtractors = Arc<RwLock<ExtractorSet>>;
pub type SharedRecordInfos = Arc<RwLock<Vec<RecordInfo>>>;

/// Per-table catalog entry.
///
/// Created at startup from the parsed schema and never destroyed. Owns its
/// indexes and tombstones; holds a non-owning handle to the store.
pub struct TableStore {
    table_def: Arc<TableDef>,
    file_id: FileId,
    store: Arc<RwLock<StreamingStore>>,
    indexes: SharedIndexes,
    record_infos: SharedRecordInfos,
    tombstones: SharedTombstones,
    extractors: SharedExtractors,
    record_count: u64,
    source_name: Option<String>,
}

impl TableStore {
    pub fn new(table_def: Arc<TableDef>, store: Arc<RwLock<StreamingStore>>) -> Self {
        let mut indexes = AHashMap::new();
        for col in &table_def.columns {
            if col.indexed || col.primary_key {
                indexes.insert(
                    col.name.clone(),
                    Arc::new(RwLock::new(BTreeIndex::new(&col.name))),
                );
            }
        }

        Self {
            table_def,
            file_id: FileId::EMPTY,
            store,
            indexes: Arc::new(indexes),
            record_infos: Arc::new(RwLock::new(Vec::new())),
            tombstones: Arc::new(RwLock::new(HashSet::new())),
            extractors: Arc::new(RwLock::new(ExtractorSet::default())),
            record_count: 0,
            source_name: None,
        }
    }

    /// Twin entry for a registered source: shares the store and schema, gets
    /// fresh indexes, record infos and tombstones, and copies of the current
    /// extractors and file-id binding.
    pub fn clone_for_source(&self, source: &str) -> Self {
        let mut twin = TableStore::new(self.table_def.clone(), self.store.clone());
        twin.file_id = self.file_id;
        twin.source_name = Some(source.to_string());
        *twin.extractors.write() = self.extractors.read().clone();
        twin
    }

    /// Drop all derived state (counts, record infos, indexes, tombstones) so
    /// a reloaded stream can rebuild it from scratch.
    pub fn reset(&mut self) {
        self.record_count = 0;
        self.record_infos.write().clear();
        for index in self.indexes.values() {
            index.write().clear();
        }
        self.tombstones.write().clear();
    }

    /// Streaming index builder, invoked for each record as it arrives.
    ///
    /// Without a field extractor the record is stored and counted but not
    /// indexed.
    pub fn on_ingest(&mut self, data: &[u8], sequence: u64, offset: u64) {
        self.record_count += 1;
        self.record_infos.write().push(RecordInfo { offset, sequence });

        let extractors = self.extractors.read();
        let extractor = match &extractors.field {
            Some(f) => f,
            None => return,
        };

        for (col_name, index) in self.indexes.iter() {
            let key = extractor(data, col_name);
            index
                .write()
                .insert(key, offset, data.len() as u32, sequence);
        }
    }

    /// Find by indexed column. Falls back to an extractor scan when the
    /// column carries no index. Indexed hits are minimal records (offset,
    /// length and sequence only, no payload copy).
    pub fn find_by_index(&self, column: &str, value: &Value) -> Vec<StoredRecord> {
        let index = match self.indexes.get(column) {
            Some(idx) => idx,
            None => {
                return self.scan_filtered(|extractor, data| {
                    crate::data::compare_values(&extractor(data, column), value)
                        == Ordering::Equal
                })
            }
        };

        let mut results = Vec::new();
        if let Some(entry) = index.read().search_first(value) {
            results.push(StoredRecord {
                sequence: entry.sequence,
                file_id: self.file_id,
                offset: entry.offset,
                length: entry.length,
                data: Vec::new(),
            });
        }
        results
    }

    /// Find by range on an indexed column, inclusive on both ends.
    pub fn find_by_range(&self, column: &str, min: &Value, max: &Value) -> Vec<StoredRecord> {
        let index = match self.indexes.get(column) {
            Some(idx) => idx,
            None => {
                return self.scan_filtered(|extractor, data| {
                    let v = extractor(data, column);
                    crate::data::compare_values(&v, min) != Ordering::Less
                        && crate::data::compare_values(&v, max) != Ordering::Greater
                })
            }
        };

        let entries = index.read().range(min, max);
        let store = self.store.read();
        let mut results = Vec::new();
        for entry in entries {
            if let Ok(data) = store.data_at_offset(entry.offset) {
                results.push(StoredRecord {
                    sequence: entry.sequence,
                    file_id: self.file_id,
                    offset: entry.offset,
                    length: entry.length,
                    data: data.to_vec(),
                });
            }
        }
        results
    }

    /// Full table scan in ingest order, via this entry's record-info vector.
    pub fn scan_all(&self) -> Vec<StoredRecord> {
        let infos = self.record_infos.read();
        let store = self.store.read();
        let mut results = Vec::with_capacity(infos.len());
        for info in infos.iter() {
            if let Ok(data) = store.data_at_offset(info.offset) {
                results.push(StoredRecord {
                    sequence: info.sequence,
                    file_id: self.file_id,
                    offset: info.offset,
                    length: data.len() as u32,
                    data: data.to_vec(),
                });
            }
        }
        results
    }

    fn scan_filtered(
        &self,
        pred: impl Fn(&FieldExtractor, &[u8]) -> bool,
    ) -> Vec<StoredRecord> {
        let extractor = match self.extractors.read().field.clone() {
            Some(f) => f,
            None => return Vec::new(),
        };
        self.scan_all()
            .into_iter()
            .filter(|rec| pred(&extractor, &rec.data))
            .collect()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn table_def(&self) -> &Arc<TableDef> {
        &self.table_def
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    pub fn set_file_id(&mut self, file_id: FileId) {
        self.file_id = file_id;
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn source_name(&self) -> Option<&str> {
        self.source_name.as_deref()
    }

    pub fn index(&self, column: &str) -> Option<Arc<RwLock<BTreeIndex>>> {
        self.indexes.get(column).cloned()
    }

    pub fn indexes(&self) -> SharedIndexes {
        self.indexes.clone()
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indexes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn record_infos(&self) -> SharedRecordInfos {
        self.record_infos.clone()
    }

    pub fn tombstones(&self) -> SharedTombstones {
        self.tombstones.clone()
    }

    pub fn extractors(&self) -> SharedExtractors {
        self.extractors.clone()
    }

    pub fn set_field_extractor(&self, extractor: FieldExtractor) {
        self.extractors.write().field = Some(extractor);
    }

    pub fn set_fast_field_extractor(&self, extractor: FastFieldExtractor) {
        self.extractors.write().fast = Some(extractor);
    }

    pub fn set_batch_extractor(&self, extractor: BatchExtractor) {
        self.extractors.write().batch = Some(extractor);
    }

    // ========================================================================
    // Tombstones
    // ========================================================================

    pub fn mark_deleted(&self, sequence: u64) {
        self.tombstones.write().insert(sequence);
    }

    pub fn deleted_count(&self) -> usize {
        self.tombstones.read().len()
    }

    pub fn clear_tombstones(&self) {
        self.tombstones.write().clear();
    }
}
