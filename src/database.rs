//! Database facade
//!
//! Ties the streaming store, the catalog, the ingest routing and the SQL
//! engine together behind the public API. All operations run synchronously on
//! the caller's thread.

use crate::crypto::EncryptionContext;
use crate::data::{DatabaseSchema, FileId, QueryResult, SchemaParser, TableDef, Value};
use crate::query::engine::{SourceHandle, SqlEngine};
use crate::storage::{StoredRecord, StreamingStore};
use crate::table::{BatchExtractor, FastFieldExtractor, FieldExtractor, TableStore};
use crate::{Result, StreamError};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-table statistics
#[derive(Debug, Clone, PartialEq)]
pub struct TableStats {
    pub table_name: String,
    pub file_id: String,
    pub record_count: u64,
    pub indexes: Vec<String>,
}

/// SQL interface over streaming record storage.
///
/// Supports streaming ingest of raw size-prefixed records; file identifiers
/// route each record to the catalog entry that indexes it.
pub struct Database {
    schema: DatabaseSchema,
    store: Arc<RwLock<StreamingStore>>,
    tables: BTreeMap<String, TableStore>,
    file_id_to_table: AHashMap<FileId, String>,
    source_file_id_to_table: AHashMap<(String, FileId), String>,
    registered_sources: Vec<String>,
    engine: SqlEngine,
    encryption: Arc<RwLock<Option<EncryptionContext>>>,
}

fn route_plain(
    tables: &mut BTreeMap<String, TableStore>,
    map: &AHashMap<FileId, String>,
    file_id: FileId,
    data: &[u8],
    sequence: u64,
    offset: u64,
) {
    match map.get(&file_id) {
        Some(name) => {
            if let Some(table) = tables.get_mut(name) {
                table.on_ingest(data, sequence, offset);
            }
        }
        // Unknown identifier: the record is stored but not indexed
        None => log::debug!("ingest: no table bound to file id \"{}\"", file_id),
    }
}

fn route_sourced(
    tables: &mut BTreeMap<String, TableStore>,
    map: &AHashMap<(String, FileId), String>,
    source: &str,
    file_id: FileId,
    data: &[u8],
    sequence: u64,
    offset: u64,
) {
    match map.get(&(source.to_string(), file_id)) {
        Some(name) => {
            if let Some(table) = tables.get_mut(name) {
                table.on_ingest(data, sequence, offset);
            }
        }
        None => log::debug!(
            "ingest: no table bound to (source \"{}\", file id \"{}\")",
            source,
            file_id
        ),
    }
}

impl Database {
    /// Create from an already-parsed schema
    pub fn new(schema: DatabaseSchema) -> Result<Self> {
        let store = Arc::new(RwLock::new(StreamingStore::new()));
        let mut tables = BTreeMap::new();
        for table_def in &schema.tables {
            tables.insert(
                table_def.name.clone(),
                TableStore::new(Arc::new(table_def.clone()), store.clone()),
            );
        }

        Ok(Self {
            schema,
            store,
            tables,
            file_id_to_table: AHashMap::new(),
            source_file_id_to_table: AHashMap::new(),
            registered_sources: Vec::new(),
            engine: SqlEngine::new()?,
            encryption: Arc::new(RwLock::new(None)),
        })
    }

    /// Create from schema source text (IDL or JSON Schema)
    pub fn from_schema(source: &str, db_name: &str) -> Result<Self> {
        Self::new(SchemaParser::parse(source, db_name)?)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Bind a 4-byte file identifier to a table. Re-registering an identifier
    /// rebinds it; the newest binding wins.
    pub fn register_file_id(&mut self, file_id: &str, table_name: &str) -> Result<()> {
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?;

        let id = FileId::from(file_id);
        table.set_file_id(id);
        if let Some(previous) = self.file_id_to_table.insert(id, table_name.to_string()) {
            if previous != table_name {
                log::warn!(
                    "file id \"{}\" rebound from \"{}\" to \"{}\"",
                    id,
                    previous,
                    table_name
                );
            }
        }
        Ok(())
    }

    /// Install the field extractor for a table. Required before records can
    /// be indexed; reaches already-registered virtual tables through the
    /// shared extractor slot.
    pub fn set_field_extractor(&mut self, table_name: &str, extractor: FieldExtractor) -> Result<()> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?
            .set_field_extractor(extractor);
        Ok(())
    }

    pub fn set_fast_field_extractor(
        &mut self,
        table_name: &str,
        extractor: FastFieldExtractor,
    ) -> Result<()> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?
            .set_fast_field_extractor(extractor);
        Ok(())
    }

    pub fn set_batch_extractor(&mut self, table_name: &str, extractor: BatchExtractor) -> Result<()> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?
            .set_batch_extractor(extractor);
        Ok(())
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Stream raw size-prefixed records. Returns (bytes consumed, records
    /// ingested); a partial trailing frame is left for the caller to resend.
    pub fn ingest(&mut self, bytes: &[u8]) -> (usize, u64) {
        let tables = &mut self.tables;
        let map = &self.file_id_to_table;
        self.store.write().ingest(bytes, |file_id, data, seq, offset| {
            route_plain(tables, map, file_id, data, seq, offset)
        })
    }

    /// Stream records into a registered source's tables.
    pub fn ingest_with_source(&mut self, bytes: &[u8], source: &str) -> (usize, u64) {
        let tables = &mut self.tables;
        let map = &self.source_file_id_to_table;
        self.store.write().ingest(bytes, |file_id, data, seq, offset| {
            route_sourced(tables, map, source, file_id, data, seq, offset)
        })
    }

    /// Ingest a single unframed payload; the file identifier is read from
    /// bytes 4..8. Returns the assigned sequence.
    pub fn ingest_one(&mut self, payload: &[u8]) -> u64 {
        let tables = &mut self.tables;
        let map = &self.file_id_to_table;
        self.store.write().ingest_bare(payload, |file_id, data, seq, offset| {
            route_plain(tables, map, file_id, data, seq, offset)
        })
    }

    /// Ingest a single unframed payload into a registered source.
    pub fn ingest_one_with_source(&mut self, payload: &[u8], source: &str) -> u64 {
        let tables = &mut self.tables;
        let map = &self.source_file_id_to_table;
        self.store.write().ingest_bare(payload, |file_id, data, seq, offset| {
            route_sourced(tables, map, source, file_id, data, seq, offset)
        })
    }

    /// Load an exported stream and rebuild all indexes. Derived per-table
    /// state is dropped first, so reloading into a live database cannot
    /// double-count records.
    pub fn load_and_rebuild(&mut self, bytes: &[u8]) {
        for table in self.tables.values_mut() {
            table.reset();
        }
        let tables = &mut self.tables;
        let map = &self.file_id_to_table;
        self.store
            .write()
            .load_and_rebuild(bytes, |file_id, data, seq, offset| {
                route_plain(tables, map, file_id, data, seq, offset)
            });
    }

    // ========================================================================
    // Queries
    // ========================================================================

    fn handle_for(&self, name: &str, table: &TableStore) -> SourceHandle {
        SourceHandle {
            name: name.to_string(),
            source_label: table.source_name().unwrap_or("").to_string(),
            store: self.store.clone(),
            table_def: table.table_def().clone(),
            file_id: table.file_id(),
            extractors: table.extractors(),
            indexes: table.indexes(),
            tombstones: table.tombstones(),
            record_infos: table.record_infos(),
            encryption: self.encryption.clone(),
        }
    }

    /// Register every table with a bound file identifier as a virtual table.
    /// Idempotent; called before each query so late bindings are picked up.
    fn ensure_sql_registered(&mut self) -> Result<()> {
        let pending: Vec<String> = self
            .tables
            .iter()
            .filter(|(name, table)| {
                !table.file_id().is_empty()
                    && !self.engine.has_source(name)
                    && !self.engine.is_unified_view(name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in pending {
            let handle = self.handle_for(&name, &self.tables[&name]);
            self.engine.register_source(handle)?;
        }
        Ok(())
    }

    /// Execute SQL and return the full result.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.query_with_params(sql, &[])
    }

    /// Execute SQL with positional `?` parameters.
    pub fn query_with_params(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.ensure_sql_registered()?;
        self.engine.execute(sql, params)
    }

    /// Execute SQL and count rows without materialising them.
    pub fn query_count(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_sql_registered()?;
        self.engine.execute_count(sql, params)
    }

    // ========================================================================
    // Direct index access
    // ========================================================================

    /// Find by indexed column; unindexed columns fall back to a scan.
    pub fn find_by_index(&self, table_name: &str, column: &str, value: &Value) -> Vec<StoredRecord> {
        match self.tables.get(table_name) {
            Some(table) => table.find_by_index(column, value),
            None => Vec::new(),
        }
    }

    /// Single index probe, no payload copy.
    pub fn find_one_by_index(
        &self,
        table_name: &str,
        column: &str,
        value: &Value,
    ) -> Option<StoredRecord> {
        let table = self.tables.get(table_name)?;
        let index = table.index(column)?;
        let entry = index.read().search_first(value)?;
        Some(StoredRecord {
            sequence: entry.sequence,
            file_id: table.file_id(),
            offset: entry.offset,
            length: entry.length,
            data: Vec::new(),
        })
    }

    /// Point lookup returning the raw payload. String and Int64 keys take the
    /// specialised probes that skip entry-vector allocation.
    pub fn find_raw_by_index(
        &self,
        table_name: &str,
        column: &str,
        value: &Value,
    ) -> Option<(Vec<u8>, u32, u64)> {
        let table = self.tables.get(table_name)?;
        let index = table.index(column)?;

        let (offset, length, sequence) = match value {
            Value::Str(s) => index.read().search_first_str(s),
            Value::Int64(v) => index.read().search_first_int64(*v),
            other => index
                .read()
                .search_first(other)
                .map(|e| (e.offset, e.length, e.sequence)),
        }?;

        let store = self.store.read();
        let data = store.data_at_offset(offset).ok()?;
        Some((data.to_vec(), length, sequence))
    }

    /// Walk a table's records in ingest order.
    pub fn iterate_all(&self, table_name: &str, mut cb: impl FnMut(&[u8], u64)) {
        if let Some(table) = self.tables.get(table_name) {
            let infos = table.record_infos();
            let infos = infos.read();
            let store = self.store.read();
            for info in infos.iter() {
                if let Ok(data) = store.data_at_offset(info.offset) {
                    cb(data, info.sequence);
                }
            }
        }
    }

    // ========================================================================
    // Sources and unified views
    // ========================================================================

    /// Register a named source: every base table gets a `table@source` twin
    /// sharing the store but with its own record-info view, indexes and
    /// tombstones.
    pub fn register_source(&mut self, source: &str) -> Result<()> {
        if self.registered_sources.iter().any(|s| s == source) {
            return Err(StreamError::DuplicateSource(source.to_string()));
        }
        self.registered_sources.push(source.to_string());

        let base_names: Vec<String> = self.schema.tables.iter().map(|t| t.name.clone()).collect();
        for base_name in base_names {
            let base = match self.tables.get(&base_name) {
                Some(t) => t,
                None => continue,
            };
            let twin = base.clone_for_source(source);
            let twin_name = format!("{}@{}", base_name, source);

            if !twin.file_id().is_empty() {
                self.source_file_id_to_table
                    .insert((source.to_string(), twin.file_id()), twin_name.clone());
            }
            self.tables.insert(twin_name, twin);
        }

        log::info!("registered source \"{}\"", source);
        Ok(())
    }

    /// For every base table with registered sources, create a `UNION ALL`
    /// view under the base name spanning all of its source twins.
    pub fn create_unified_views(&mut self) -> Result<()> {
        if self.registered_sources.is_empty() {
            return Ok(());
        }
        self.ensure_sql_registered()?;

        let base_names: Vec<String> = self.schema.tables.iter().map(|t| t.name.clone()).collect();
        for base_name in base_names {
            let members: Vec<String> = self
                .registered_sources
                .iter()
                .map(|s| format!("{}@{}", base_name, s))
                .filter(|m| self.engine.has_source(m))
                .collect();
            if !members.is_empty() {
                self.engine.create_unified_view(&base_name, &members)?;
            }
        }
        Ok(())
    }

    pub fn list_sources(&self) -> Vec<String> {
        self.registered_sources.clone()
    }

    // ========================================================================
    // Tombstones
    // ========================================================================

    /// Mark a sequence deleted in a table (or `table@source` twin). The
    /// record stays in the log; cursors skip it until the tombstone is
    /// cleared.
    pub fn mark_deleted(&mut self, table_name: &str, sequence: u64) -> Result<()> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?
            .mark_deleted(sequence);
        Ok(())
    }

    pub fn deleted_count(&self, table_name: &str) -> usize {
        self.tables
            .get(table_name)
            .map(|t| t.deleted_count())
            .unwrap_or(0)
    }

    /// Drop all tombstones for a table (after out-of-band compaction).
    pub fn clear_tombstones(&mut self, table_name: &str) -> Result<()> {
        self.tables
            .get(table_name)
            .ok_or_else(|| StreamError::TableNotFound(table_name.to_string()))?
            .clear_tombstones();
        Ok(())
    }

    // ========================================================================
    // Encryption and authentication
    // ========================================================================

    /// Install the master key. Every encrypted column must carry a non-zero
    /// field id.
    pub fn set_encryption_key(&mut self, key: &[u8]) -> Result<()> {
        for table in &self.schema.tables {
            for col in &table.columns {
                if col.encrypted && col.field_id == 0 {
                    return Err(StreamError::SchemaMismatch(format!(
                        "encrypted column \"{}\".\"{}\" has field id 0",
                        table.name, col.name
                    )));
                }
            }
        }
        *self.encryption.write() = Some(EncryptionContext::new(key));
        Ok(())
    }

    pub fn has_encrypted_fields(&self) -> bool {
        self.schema
            .tables
            .iter()
            .any(|t| t.columns.iter().any(|c| c.encrypted))
    }

    pub fn compute_hmac(&self, buf: &[u8]) -> Result<[u8; 32]> {
        match self.encryption.read().as_ref() {
            Some(ctx) => Ok(ctx.compute_hmac(buf)),
            None => Err(StreamError::CryptoUnavailable),
        }
    }

    pub fn verify_hmac(&self, buf: &[u8], mac: &[u8]) -> Result<bool> {
        match self.encryption.read().as_ref() {
            Some(ctx) => Ok(ctx.verify_hmac(buf, mac)),
            None => Err(StreamError::CryptoUnavailable),
        }
    }

    // ========================================================================
    // Introspection and export
    // ========================================================================

    /// Copy of the raw log stream; framed records in ingest order.
    pub fn export(&self) -> Vec<u8> {
        self.store.read().export()
    }

    pub fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn table_def(&self, table_name: &str) -> Option<&TableDef> {
        self.tables.get(table_name).map(|t| t.table_def().as_ref())
    }

    pub fn stats(&self) -> Vec<TableStats> {
        self.tables
            .iter()
            .map(|(name, table)| TableStats {
                table_name: name.clone(),
                file_id: table.file_id().to_string(),
                record_count: table.record_count(),
                indexes: table.index_names(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests;
