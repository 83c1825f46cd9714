//! Trivial-query interception
//!
//! Two canonical shapes bypass SQL parse, prepare and virtual-table dispatch
//! entirely: `SELECT * FROM T` (full scan over the record-info vector) and
//! `SELECT * FROM T WHERE C = ?` (single index probe). Everything else falls
//! through to the SQL executor. Rows produced here must be indistinguishable
//! from executor rows: same columns, same storage classes, same decryption.

use crate::data::{QueryResult, Value};
use crate::query::engine::{SourceHandle, SqlEngine};
use ahash::AHashMap;

/// Parsed shape of a SQL string, cached per string
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    FullScan { table: String },
    PointLookup { table: String, column: String },
    Other,
}

struct CachedShape {
    shape: QueryShape,
    last_used: u64,
}

/// Bounded cache of parsed shapes keyed by the raw SQL string.
///
/// Hot workloads re-issue a handful of SQL strings, so entries carry a
/// recency stamp and insertion past capacity evicts the stalest one. The
/// stamp scan is over at most `capacity` entries, which is noise next to a
/// SQL parse.
pub struct ShapeCache {
    capacity: usize,
    entries: AHashMap<String, CachedShape>,
    clock: u64,
}

impl ShapeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: AHashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    pub fn get(&mut self, sql: &str) -> Option<QueryShape> {
        self.clock += 1;
        let entry = self.entries.get_mut(sql)?;
        entry.last_used = self.clock;
        Some(entry.shape.clone())
    }

    pub fn insert(&mut self, sql: String, shape: QueryShape) {
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&sql) {
            let stalest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = stalest {
                self.entries.remove(&key);
            }
        }
        self.clock += 1;
        self.entries.insert(
            sql,
            CachedShape {
                shape,
                last_used: self.clock,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Collapse whitespace runs, lowercase, and strip a trailing semicolon.
pub fn normalize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut in_space = true;
    for c in sql.chars() {
        if c.is_whitespace() {
            if !in_space && !out.is_empty() {
                out.push(' ');
                in_space = true;
            }
        } else {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            in_space = false;
        }
    }
    while out.ends_with(' ') || out.ends_with(';') {
        out.pop();
    }
    out
}

fn unquote(ident: &str) -> &str {
    let ident = ident.trim();
    if ident.len() >= 2 && ident.starts_with('"') && ident.ends_with('"') {
        &ident[1..ident.len() - 1]
    } else {
        ident
    }
}

fn plain_identifier(ident: &str) -> bool {
    !ident.is_empty() && !ident.contains([' ', '?', '=', '"'])
}

/// Recognise the two fast-path shapes on a raw SQL string.
pub fn parse_shape(sql: &str) -> QueryShape {
    let normalized = normalize_sql(sql);
    let rest = match normalized.strip_prefix("select * from ") {
        Some(rest) => rest,
        None => return QueryShape::Other,
    };

    match rest.find(" where ") {
        None => {
            let table = unquote(rest);
            if plain_identifier(table) {
                QueryShape::FullScan {
                    table: table.to_string(),
                }
            } else {
                QueryShape::Other
            }
        }
        Some(where_pos) => {
            let table = unquote(&rest[..where_pos]);
            let clause = &rest[where_pos + 7..];
            let column_part = match clause.strip_suffix("= ?") {
                Some(part) => part.trim_end(),
                None => return QueryShape::Other,
            };
            let column = unquote(column_part);
            if plain_identifier(table) && plain_identifier(column) {
                QueryShape::PointLookup {
                    table: table.to_string(),
                    column: column.to_string(),
                }
            } else {
                QueryShape::Other
            }
        }
    }
}

/// Column names a fast-path result carries: the real columns plus the four
/// virtual ones, matching the executor's `SELECT *` expansion.
fn column_names(source: &SourceHandle) -> Vec<String> {
    let mut names: Vec<String> = source
        .table_def
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect();
    names.push("_source".to_string());
    names.push("_rowid".to_string());
    names.push("_offset".to_string());
    names.push("_data".to_string());
    names
}

/// Extract, decrypt and normalise one row, then append the virtual columns.
fn assemble_row(source: &SourceHandle, data: &[u8], sequence: u64, offset: u64) -> Vec<Value> {
    let n_real = source.table_def.columns.len();
    let mut row = Vec::with_capacity(n_real + crate::query::VIRTUAL_COLUMNS);

    let extractors = source.extractors.read();
    if let Some(batch) = extractors.batch {
        batch(data, &mut row);
        row.resize(n_real, Value::Null);
    } else if let Some(field) = &extractors.field {
        for col in &source.table_def.columns {
            row.push(field(data, &col.name));
        }
    } else {
        row.resize(n_real, Value::Null);
    }
    drop(extractors);

    if let Some(ctx) = source.encryption.read().as_ref() {
        for (i, col) in source.table_def.columns.iter().enumerate() {
            if col.encrypted {
                ctx.decrypt_value(&mut row[i], col.value_type, col.field_id);
            }
        }
    }

    for value in row.iter_mut() {
        let v = std::mem::replace(value, Value::Null);
        *value = v.normalize_storage();
    }

    row.push(Value::Str(source.source_label.clone()));
    row.push(Value::Int64(sequence as i64));
    row.push(Value::Int64(offset as i64));
    row.push(if data.is_empty() {
        Value::Null
    } else {
        Value::Bytes(data.to_vec())
    });
    row
}

/// Resolve the target of a fast-path shape. Unified views are never
/// intercepted: their name spans several sources.
fn resolve(engine: &SqlEngine, table: &str) -> Option<SourceHandle> {
    if engine.is_unified_view_ci(table) {
        return None;
    }
    engine.find_source(table)
}

pub(crate) fn try_fast_path(
    engine: &SqlEngine,
    sql: &str,
    params: &[Value],
) -> Option<QueryResult> {
    match engine.shape_for(sql) {
        QueryShape::FullScan { table } if params.is_empty() => {
            let source = resolve(engine, &table)?;
            // The row assembly needs an extractor; without one SQLite's path
            // produces the same null rows
            if source.extractors.read().field.is_none() {
                return None;
            }
            log::debug!("fast path: full scan over \"{}\"", source.name);

            let columns = column_names(&source);
            let infos = source.record_infos.read();
            let store = source.store.read();
            let check_tombstones = !source.tombstones.read().is_empty();

            let mut rows = Vec::with_capacity(infos.len());
            for info in infos.iter() {
                if check_tombstones && source.tombstones.read().contains(&info.sequence) {
                    continue;
                }
                let data = match store.data_at_offset(info.offset) {
                    Ok(d) => d,
                    Err(_) => continue,
                };
                rows.push(assemble_row(&source, data, info.sequence, info.offset));
            }
            Some(QueryResult { columns, rows })
        }

        QueryShape::PointLookup { table, column } if params.len() == 1 => {
            let source = resolve(engine, &table)?;
            let col = source
                .table_def
                .columns
                .iter()
                .find(|c| c.name.to_lowercase() == column)?
                .clone();
            let index = source.indexes.get(&col.name)?.clone();
            log::debug!("fast path: point lookup on \"{}\".{}", source.name, col.name);

            let columns = column_names(&source);
            let key = params[0].coerce_to(col.value_type);
            // Equality against NULL matches nothing
            if key.is_null() {
                return Some(QueryResult { columns, rows: vec![] });
            }
            let entry = match index.read().search_first(&key) {
                Some(entry) => entry,
                None => return Some(QueryResult { columns, rows: vec![] }),
            };
            if source.tombstones.read().contains(&entry.sequence) {
                return Some(QueryResult { columns, rows: vec![] });
            }

            let store = source.store.read();
            let data = match store.data_at_offset(entry.offset) {
                Ok(d) => d,
                // Unresolvable offset: let the SQL executor deal with it
                Err(_) => return None,
            };
            let row = assemble_row(&source, data, entry.sequence, entry.offset);
            Some(QueryResult {
                columns,
                rows: vec![row],
            })
        }

        _ => None,
    }
}

pub(crate) fn try_fast_path_count(engine: &SqlEngine, sql: &str, params: &[Value]) -> Option<u64> {
    match engine.shape_for(sql) {
        QueryShape::FullScan { table } if params.is_empty() => {
            let source = resolve(engine, &table)?;
            let infos = source.record_infos.read();
            let tombstones = source.tombstones.read();
            if tombstones.is_empty() {
                return Some(infos.len() as u64);
            }
            Some(
                infos
                    .iter()
                    .filter(|info| !tombstones.contains(&info.sequence))
                    .count() as u64,
            )
        }

        QueryShape::PointLookup { table, column } if params.len() == 1 => {
            let source = resolve(engine, &table)?;
            let col = source
                .table_def
                .columns
                .iter()
                .find(|c| c.name.to_lowercase() == column)?
                .clone();
            let index = source.indexes.get(&col.name)?.clone();

            let key = params[0].coerce_to(col.value_type);
            if key.is_null() {
                return Some(0);
            }
            let entry = match index.read().search_first(&key) {
                Some(entry) => entry,
                None => return Some(0),
            };
            if source.tombstones.read().contains(&entry.sequence) {
                return Some(0);
            }
            Some(1)
        }

        _ => None,
    }
}
