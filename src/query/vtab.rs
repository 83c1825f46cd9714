//! Virtual-table adaptor
//!
//! Exposes a catalog entry to SQLite as a read-only virtual table. The
//! planner strategy is encoded into `idx_num` as `strategy | (column << 8)`:
//!
//! | strategy | meaning                              |
//! |----------|--------------------------------------|
//! | 0        | full scan over the record-info vector|
//! | 1        | rowid (sequence) equality            |
//! | 2        | index equality on `column`           |
//! | 3        | index dump, SQLite re-checks range   |
//!
//! Cursors resolve their `SourceHandle` once at open and take short-lived
//! store read locks per callback; tombstoned sequences are filtered here.

use crate::data::Value;
use crate::index::IndexEntry;
use crate::query::engine::SourceHandle;
use crate::table::FastFieldExtractor;
use rusqlite::ffi;
use rusqlite::types::Null;
use rusqlite::vtab::{
    Context, CreateVTab, IndexConstraintOp, IndexInfo, VTab, VTabConnection, VTabCursor, VTabKind,
    Values,
};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::os::raw::c_int;

const STRATEGY_FULL_SCAN: i32 = 0;
const STRATEGY_ROWID: i32 = 1;
const STRATEGY_INDEX_EQ: i32 = 2;
const STRATEGY_INDEX_RANGE: i32 = 3;

const FULL_SCAN_COST: f64 = 1_000_000.0;
const ROWID_COST: f64 = 1.0;
const INDEX_EQ_COST: f64 = 10.0;
const INDEX_RANGE_COST: f64 = 100.0;

fn sql_type_name(vt: crate::data::ValueType) -> &'static str {
    use crate::data::ValueType::*;
    match vt {
        Bool | Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 => "INTEGER",
        Float32 | Float64 => "REAL",
        String => "TEXT",
        Bytes => "BLOB",
        Null => "TEXT",
    }
}

/// Virtual table over one catalog entry
#[repr(C)]
pub struct StreamVTab {
    base: ffi::sqlite3_vtab,
    handle: SourceHandle,
}

unsafe impl<'vtab> VTab<'vtab> for StreamVTab {
    type Aux = SourceHandle;
    type Cursor = StreamCursor<'vtab>;

    fn connect(
        _db: &mut VTabConnection,
        aux: Option<&Self::Aux>,
        _args: &[&[u8]],
    ) -> rusqlite::Result<(String, Self)> {
        let handle = aux
            .ok_or_else(|| rusqlite::Error::ModuleError("missing source handle".to_owned()))?
            .clone();

        let mut sql = String::from("CREATE TABLE x(");
        for (i, col) in handle.table_def.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('"');
            sql.push_str(&col.name);
            sql.push_str("\" ");
            sql.push_str(sql_type_name(col.value_type));
            if !col.nullable {
                sql.push_str(" NOT NULL");
            }
        }
        sql.push_str(", \"_source\" TEXT, \"_rowid\" INTEGER, \"_offset\" INTEGER, \"_data\" BLOB)");

        Ok((
            sql,
            StreamVTab {
                base: ffi::sqlite3_vtab::default(),
                handle,
            },
        ))
    }

    fn best_index(&self, info: &mut IndexInfo) -> rusqlite::Result<()> {
        let columns = &self.handle.table_def.columns;
        let n_real = columns.len() as i32;

        // (constraint position, strategy, column index)
        let mut rowid_eq: Option<usize> = None;
        let mut index_eq: Option<(usize, i32)> = None;
        let mut index_range: Option<i32> = None;

        for (i, constraint) in info.constraints().enumerate() {
            if !constraint.is_usable() {
                continue;
            }
            let col = constraint.column();

            if col == -1 {
                if constraint.operator() == IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ {
                    rowid_eq.get_or_insert(i);
                }
                continue;
            }
            // Virtual columns are re-checked by SQLite, never planned here
            if col >= n_real {
                continue;
            }
            if !self.handle.indexes.contains_key(&columns[col as usize].name) {
                continue;
            }

            match constraint.operator() {
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_EQ => {
                    if index_eq.is_none() {
                        index_eq = Some((i, col));
                    }
                }
                IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GT
                | IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_GE
                | IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LT
                | IndexConstraintOp::SQLITE_INDEX_CONSTRAINT_LE => {
                    if index_range.is_none() {
                        index_range = Some(col);
                    }
                }
                _ => {}
            }
        }

        let record_count = self.handle.store.read().record_count() as i64;

        if let Some(pos) = rowid_eq {
            let mut usage = info.constraint_usage(pos);
            usage.set_argv_index(1);
            usage.set_omit(true);
            info.set_idx_num(STRATEGY_ROWID);
            info.set_estimated_cost(ROWID_COST);
            info.set_estimated_rows(1);
        } else if let Some((pos, col)) = index_eq {
            let mut usage = info.constraint_usage(pos);
            usage.set_argv_index(1);
            usage.set_omit(true);
            info.set_idx_num(STRATEGY_INDEX_EQ | (col << 8));
            info.set_estimated_cost(INDEX_EQ_COST);
            let rows = if columns[col as usize].primary_key { 1 } else { 10 };
            info.set_estimated_rows(rows);
        } else if let Some(col) = index_range {
            // The bound itself is re-applied by SQLite row by row
            info.set_idx_num(STRATEGY_INDEX_RANGE | (col << 8));
            info.set_estimated_cost(INDEX_RANGE_COST);
            info.set_estimated_rows((record_count / 10).max(1));
        } else {
            info.set_idx_num(STRATEGY_FULL_SCAN);
            info.set_estimated_cost(FULL_SCAN_COST);
            info.set_estimated_rows(record_count.max(1));
        }

        Ok(())
    }

    fn open(&'vtab mut self) -> rusqlite::Result<Self::Cursor> {
        Ok(StreamCursor::new(self.handle.clone()))
    }
}

impl<'vtab> CreateVTab<'vtab> for StreamVTab {
    const KIND: VTabKind = VTabKind::Default;
}

#[derive(Clone, Copy, PartialEq)]
enum ScanKind {
    FullScan,
    RowidLookup,
    IndexSingleLookup,
    IndexEquality,
    IndexRange,
}

#[derive(Default)]
struct ColumnCache {
    values: Vec<Value>,
    valid: bool,
}

/// Cursor over one virtual table
#[repr(C)]
pub struct StreamCursor<'vtab> {
    base: ffi::sqlite3_vtab_cursor,
    handle: SourceHandle,

    // Current record
    current_offset: u64,
    current_sequence: u64,
    at_eof: bool,

    scan: ScanKind,

    // Index-based scans
    index_results: Vec<IndexEntry>,
    index_pos: usize,

    // Full scan over the record-info vector
    scan_pos: usize,
    has_tombstones: bool,

    // Per-row column cache, populated lazily in column()
    cache: RefCell<ColumnCache>,

    n_real_columns: usize,
    fast_extractor: Option<FastFieldExtractor>,

    phantom: PhantomData<&'vtab StreamVTab>,
}

impl StreamCursor<'_> {
    fn new(handle: SourceHandle) -> Self {
        let n_real_columns = handle.table_def.columns.len();
        // The direct-write path cannot decrypt, so it is disabled whenever an
        // encryption context is installed
        let fast_extractor = if handle.encryption.read().is_some() {
            None
        } else {
            handle.extractors.read().fast
        };

        StreamCursor {
            base: ffi::sqlite3_vtab_cursor::default(),
            handle,
            current_offset: 0,
            current_sequence: 0,
            at_eof: true,
            scan: ScanKind::FullScan,
            index_results: Vec::new(),
            index_pos: 0,
            scan_pos: 0,
            has_tombstones: false,
            cache: RefCell::new(ColumnCache::default()),
            n_real_columns,
            fast_extractor,
            phantom: PhantomData,
        }
    }

    fn is_tombstoned(&self, sequence: u64) -> bool {
        self.has_tombstones && self.handle.tombstones.read().contains(&sequence)
    }

    /// Position on `scan_pos`, skipping tombstones. Sets EOF past the end.
    fn settle_scan(&mut self) {
        let infos_handle = self.handle.record_infos.clone();
        let infos = infos_handle.read();
        while self.scan_pos < infos.len() {
            let info = infos[self.scan_pos];
            if !self.is_tombstoned(info.sequence) {
                self.current_offset = info.offset;
                self.current_sequence = info.sequence;
                return;
            }
            self.scan_pos += 1;
        }
        self.at_eof = true;
    }

    /// Position on `index_pos`. A record whose offset no longer resolves
    /// marks EOF instead of propagating an error.
    fn settle_index(&mut self) {
        if self.index_pos >= self.index_results.len() {
            self.at_eof = true;
            return;
        }
        let entry = &self.index_results[self.index_pos];
        if self.handle.store.read().data_at_offset(entry.offset).is_err() {
            self.at_eof = true;
            return;
        }
        self.current_offset = entry.offset;
        self.current_sequence = entry.sequence;
    }

    fn set_current(&mut self, offset: u64, sequence: u64) {
        self.current_offset = offset;
        self.current_sequence = sequence;
    }

    fn populate_cache(&self, data: &[u8]) {
        let mut cache = self.cache.borrow_mut();
        cache.values.clear();

        let extractors = self.handle.extractors.read();
        if let Some(batch) = extractors.batch {
            batch(data, &mut cache.values);
            cache.values.resize(self.n_real_columns, Value::Null);
        } else if let Some(field) = &extractors.field {
            for col in &self.handle.table_def.columns {
                cache.values.push(field(data, &col.name));
            }
        } else {
            cache.values.resize(self.n_real_columns, Value::Null);
        }
        drop(extractors);

        if let Some(ctx) = self.handle.encryption.read().as_ref() {
            for (i, col) in self.handle.table_def.columns.iter().enumerate() {
                if col.encrypted {
                    ctx.decrypt_value(&mut cache.values[i], col.value_type, col.field_id);
                }
            }
        }

        cache.valid = true;
    }
}

fn set_result_value(ctx: &mut Context, value: &Value) -> rusqlite::Result<()> {
    match value {
        Value::Null => ctx.set_result(&Null),
        Value::Bool(b) => ctx.set_result(&(*b as i64)),
        Value::Int8(v) => ctx.set_result(&(*v as i64)),
        Value::Int16(v) => ctx.set_result(&(*v as i64)),
        Value::Int32(v) => ctx.set_result(&(*v as i64)),
        Value::Int64(v) => ctx.set_result(v),
        Value::UInt8(v) => ctx.set_result(&(*v as i64)),
        Value::UInt16(v) => ctx.set_result(&(*v as i64)),
        Value::UInt32(v) => ctx.set_result(&(*v as i64)),
        Value::UInt64(v) => ctx.set_result(&(*v as i64)),
        Value::Float32(v) => ctx.set_result(&(*v as f64)),
        Value::Float64(v) => ctx.set_result(v),
        Value::Str(s) => ctx.set_result(s),
        Value::Bytes(b) => ctx.set_result(b),
    }
}

unsafe impl VTabCursor for StreamCursor<'_> {
    fn filter(
        &mut self,
        idx_num: c_int,
        _idx_str: Option<&str>,
        args: &Values<'_>,
    ) -> rusqlite::Result<()> {
        // Reset cursor state
        self.at_eof = false;
        self.index_results.clear();
        self.index_pos = 0;
        self.scan_pos = 0;
        self.cache.borrow_mut().valid = false;
        self.has_tombstones = !self.handle.tombstones.read().is_empty();

        let strategy = idx_num & 0xFF;
        let col_idx = (idx_num >> 8) as usize;

        match strategy {
            STRATEGY_FULL_SCAN => {
                self.scan = ScanKind::FullScan;
                self.settle_scan();
            }

            STRATEGY_ROWID => {
                self.scan = ScanKind::RowidLookup;
                if args.len() == 0 {
                    self.at_eof = true;
                    return Ok(());
                }
                let rowid = match args.get::<rusqlite::types::Value>(0)? {
                    rusqlite::types::Value::Integer(v) => v,
                    _ => {
                        self.at_eof = true;
                        return Ok(());
                    }
                };
                let sequence = rowid as u64;
                if self.is_tombstoned(sequence) {
                    self.at_eof = true;
                    return Ok(());
                }
                let store = self.handle.store.read();
                match store.offset_for_sequence(sequence) {
                    Some(offset) if store.data_at_offset(offset).is_ok() => {
                        drop(store);
                        self.set_current(offset, sequence);
                    }
                    _ => self.at_eof = true,
                }
            }

            STRATEGY_INDEX_EQ => {
                if args.len() == 0 || col_idx >= self.n_real_columns {
                    self.at_eof = true;
                    return Ok(());
                }
                let (col_name, col_type, col_pk) = {
                    let col = &self.handle.table_def.columns[col_idx];
                    (col.name.clone(), col.value_type, col.primary_key)
                };
                let index = match self.handle.indexes.get(&col_name) {
                    Some(idx) => idx.clone(),
                    None => {
                        self.at_eof = true;
                        return Ok(());
                    }
                };

                let raw = args.get::<rusqlite::types::Value>(0)?;
                let key = crate::query::from_sql_value(raw).coerce_to(col_type);
                // Equality against NULL never matches, and SQLite does not
                // re-check omitted constraints
                if key.is_null() {
                    self.at_eof = true;
                    return Ok(());
                }

                if col_pk {
                    // Unique lookup: keep the single hit without building an
                    // entry vector
                    self.scan = ScanKind::IndexSingleLookup;
                    match index.read().search_first(&key) {
                        Some(entry) if !self.is_tombstoned(entry.sequence) => {
                            if self
                                .handle
                                .store
                                .read()
                                .data_at_offset(entry.offset)
                                .is_ok()
                            {
                                self.set_current(entry.offset, entry.sequence);
                            } else {
                                self.at_eof = true;
                            }
                        }
                        _ => self.at_eof = true,
                    }
                } else {
                    self.scan = ScanKind::IndexEquality;
                    let mut results = index.read().search(&key);
                    if self.has_tombstones {
                        results.retain(|e| !self.handle.tombstones.read().contains(&e.sequence));
                    }
                    self.index_results = results;
                    self.settle_index();
                }
            }

            STRATEGY_INDEX_RANGE => {
                self.scan = ScanKind::IndexRange;
                if col_idx >= self.n_real_columns {
                    self.at_eof = true;
                    return Ok(());
                }
                let col = &self.handle.table_def.columns[col_idx];
                let index = match self.handle.indexes.get(&col.name) {
                    Some(idx) => idx.clone(),
                    None => {
                        self.at_eof = true;
                        return Ok(());
                    }
                };

                // SQLite re-applies the actual bound predicate per row
                let mut results = index.read().all();
                if self.has_tombstones {
                    results.retain(|e| !self.handle.tombstones.read().contains(&e.sequence));
                }
                self.index_results = results;
                self.settle_index();
            }

            _ => self.at_eof = true,
        }

        Ok(())
    }

    fn next(&mut self) -> rusqlite::Result<()> {
        self.cache.borrow_mut().valid = false;

        match self.scan {
            ScanKind::FullScan => {
                self.scan_pos += 1;
                self.settle_scan();
            }
            ScanKind::RowidLookup | ScanKind::IndexSingleLookup => {
                self.at_eof = true;
            }
            ScanKind::IndexEquality | ScanKind::IndexRange => {
                self.index_pos += 1;
                self.settle_index();
            }
        }
        Ok(())
    }

    fn eof(&self) -> bool {
        self.at_eof
    }

    fn column(&self, ctx: &mut Context, i: c_int) -> rusqlite::Result<()> {
        let i = i as usize;

        // Virtual columns are constant time
        if i >= self.n_real_columns {
            return match i - self.n_real_columns {
                0 => ctx.set_result(&self.handle.source_label),
                1 => ctx.set_result(&(self.current_sequence as i64)),
                2 => ctx.set_result(&(self.current_offset as i64)),
                _ => {
                    let store = self.handle.store.read();
                    match store.data_at_offset(self.current_offset) {
                        Ok(data) if !data.is_empty() => ctx.set_result(&data.to_vec()),
                        _ => ctx.set_result(&Null),
                    }
                }
            };
        }

        let store = self.handle.store.read();
        let data = match store.data_at_offset(self.current_offset) {
            Ok(data) => data,
            Err(_) => return ctx.set_result(&Null),
        };

        // Hot path: write straight into the result context
        if let Some(fast) = self.fast_extractor {
            if fast(data, i, ctx)? {
                return Ok(());
            }
        }

        if !self.cache.borrow().valid {
            self.populate_cache(data);
        }
        set_result_value(ctx, &self.cache.borrow().values[i])
    }

    fn rowid(&self) -> rusqlite::Result<i64> {
        Ok(self.current_sequence as i64)
    }
}
