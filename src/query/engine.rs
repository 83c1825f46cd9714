//! Embedded SQL host
//!
//! Owns the in-memory SQLite connection, registers one virtual-table module
//! per catalog entry, builds `UNION ALL` unified views across sources, and
//! materialises query results. Prepared statements are cached per SQL string
//! with a bounded capacity; SQLite finalises them on connection teardown.

use crate::crypto::EncryptionContext;
use crate::data::{FileId, QueryResult, TableDef, Value};
use crate::query::fast_path::{self, QueryShape, ShapeCache};
use crate::query::vtab::StreamVTab;
use crate::query::{from_sql_ref, to_sql_value};
use crate::storage::StreamingStore;
use crate::table::{SharedExtractors, SharedIndexes, SharedRecordInfos, SharedTombstones};
use crate::{Result, StreamError};
use ahash::AHashMap;
use parking_lot::RwLock;
use rusqlite::vtab::read_only_module;
use rusqlite::Connection;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

const STMT_CACHE_CAPACITY: usize = 100;
const SHAPE_CACHE_CAPACITY: usize = 256;

/// Everything a virtual table or the fast path needs to serve one catalog
/// entry. All handles are shared with the owning [`crate::table::TableStore`],
/// so late extractor installation and tombstone changes are visible without
/// re-registration.
#[derive(Clone)]
pub struct SourceHandle {
    /// Registered table name (`users` or `users@A`)
    pub name: String,
    /// Value of the `_source` virtual column: the source name for twins,
    /// empty for plain tables
    pub source_label: String,
    pub store: Arc<RwLock<StreamingStore>>,
    pub table_def: Arc<TableDef>,
    pub file_id: FileId,
    pub extractors: SharedExtractors,
    pub indexes: SharedIndexes,
    pub tombstones: SharedTombstones,
    /// This entry's own record-info vector (source-specific view)
    pub record_infos: SharedRecordInfos,
    pub encryption: Arc<RwLock<Option<EncryptionContext>>>,
}

impl SourceHandle {
    pub fn has_encrypted_columns(&self) -> bool {
        self.table_def.columns.iter().any(|c| c.encrypted)
    }
}

/// SQLite wrapper managing virtual tables, views and execution
pub struct SqlEngine {
    conn: Connection,
    sources: BTreeMap<String, SourceHandle>,
    unified_views: HashSet<String>,
    /// Case-folded table name -> registered source key
    name_cache: RefCell<AHashMap<String, Option<String>>>,
    /// Parsed fast-path shapes keyed by the raw SQL string
    shape_cache: RefCell<ShapeCache>,
}

impl SqlEngine {
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.set_prepared_statement_cache_capacity(STMT_CACHE_CAPACITY);
        Ok(Self {
            conn,
            sources: BTreeMap::new(),
            unified_views: HashSet::new(),
            name_cache: RefCell::new(AHashMap::new()),
            shape_cache: RefCell::new(ShapeCache::new(SHAPE_CACHE_CAPACITY)),
        })
    }

    /// Register a catalog entry as a virtual table under `handle.name`.
    pub fn register_source(&mut self, handle: SourceHandle) -> Result<()> {
        let name = handle.name.clone();
        if self.sources.contains_key(&name) {
            return Err(StreamError::DuplicateSource(name));
        }

        self.conn
            .create_module(name.as_str(), read_only_module::<StreamVTab>(), Some(handle.clone()))?;
        self.conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE \"{0}\" USING \"{0}\"()",
            name
        ))?;

        log::debug!("registered virtual table \"{}\"", name);
        self.sources.insert(name, handle);
        self.name_cache.borrow_mut().clear();
        Ok(())
    }

    pub fn has_source(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn is_unified_view(&self, name: &str) -> bool {
        self.unified_views.contains(name)
    }

    /// Create (or replace) a `UNION ALL` view over previously registered
    /// member tables. Member schemas must agree on column count.
    pub fn create_unified_view(&mut self, view_name: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Err(StreamError::Sql(
                "cannot create unified view with no sources".into(),
            ));
        }

        let base_def = self
            .sources
            .get(&members[0])
            .ok_or_else(|| StreamError::TableNotFound(members[0].clone()))?
            .table_def
            .clone();
        for member in &members[1..] {
            let handle = self
                .sources
                .get(member)
                .ok_or_else(|| StreamError::TableNotFound(member.clone()))?;
            if handle.table_def.columns.len() != base_def.columns.len() {
                return Err(StreamError::SchemaMismatch(format!(
                    "source \"{}\" has {} columns, expected {}",
                    member,
                    handle.table_def.columns.len(),
                    base_def.columns.len()
                )));
            }
        }

        let mut column_list = String::new();
        for col in &base_def.columns {
            column_list.push('"');
            column_list.push_str(&col.name);
            column_list.push_str("\", ");
        }
        column_list.push_str("\"_source\", \"_rowid\", \"_offset\", \"_data\"");

        let mut sql = format!(
            "DROP TABLE IF EXISTS \"{0}\"; DROP VIEW IF EXISTS \"{0}\"; CREATE VIEW \"{0}\" AS ",
            view_name
        );
        for (i, member) in members.iter().enumerate() {
            if i > 0 {
                sql.push_str(" UNION ALL ");
            }
            sql.push_str(&format!("SELECT {} FROM \"{}\"", column_list, member));
        }
        self.conn.execute_batch(&sql)?;

        // The view now owns the name; a stale source handle under it would
        // feed the fast path from the wrong record set
        self.sources.remove(view_name);
        self.unified_views.insert(view_name.to_string());
        self.name_cache.borrow_mut().clear();
        log::debug!("created unified view \"{}\" over {} members", view_name, members.len());
        Ok(())
    }

    /// Execute a query, trying the fast path before SQLite.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        if let Some(result) = fast_path::try_fast_path(self, sql, params) {
            return Ok(result);
        }

        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let n = columns.len();

        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(to_sql_value)))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(n);
            for i in 0..n {
                values.push(from_sql_ref(row.get_ref(i)?));
            }
            out.push(values);
        }

        Ok(QueryResult { columns, rows: out })
    }

    /// Step through a query counting rows, without materialising a result.
    pub fn execute_count(&self, sql: &str, params: &[Value]) -> Result<u64> {
        if let Some(count) = fast_path::try_fast_path_count(self, sql, params) {
            return Ok(count);
        }

        let mut stmt = self.conn.prepare_cached(sql)?;
        let n = stmt.column_count();
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(to_sql_value)))?;
        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            // Touch every column so the cursor's extraction path runs
            for i in 0..n {
                let _ = row.get_ref(i)?;
            }
            count += 1;
        }
        Ok(count)
    }

    /// Cached fast-path shape for a SQL string.
    pub(crate) fn shape_for(&self, sql: &str) -> QueryShape {
        let mut cache = self.shape_cache.borrow_mut();
        if let Some(shape) = cache.get(sql) {
            return shape;
        }
        let shape = fast_path::parse_shape(sql);
        cache.insert(sql.to_string(), shape.clone());
        shape
    }

    /// Case-insensitive source resolution with a per-engine cache.
    pub(crate) fn find_source(&self, lower_name: &str) -> Option<SourceHandle> {
        if let Some(cached) = self.name_cache.borrow().get(lower_name) {
            return cached
                .as_ref()
                .and_then(|key| self.sources.get(key))
                .cloned();
        }

        let key = if self.sources.contains_key(lower_name) {
            Some(lower_name.to_string())
        } else {
            self.sources
                .keys()
                .find(|k| k.to_lowercase() == lower_name)
                .cloned()
        };
        self.name_cache
            .borrow_mut()
            .insert(lower_name.to_string(), key.clone());
        key.and_then(|k| self.sources.get(&k)).cloned()
    }

    /// True when any unified view's name case-folds to `lower_name`.
    pub(crate) fn is_unified_view_ci(&self, lower_name: &str) -> bool {
        self.unified_views
            .iter()
            .any(|v| v.to_lowercase() == lower_name)
    }
}
