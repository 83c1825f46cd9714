//! In-memory B-tree index for point lookups and range queries
//!
//! Ordered map from column values to record locations in the streaming log.
//! Keys follow the engine-wide value ordering; duplicate keys are allowed and
//! kept in insertion order (not contractual). Entries are inserted during
//! ingest and never updated; tombstoned entries stay in the index and are
//! filtered by cursors at read time.

use crate::data::{compare_values, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound::Included;

/// An index entry pointing at a record in the streaming store
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: Value,
    /// Absolute offset of the record's size prefix
    pub offset: u64,
    pub length: u32,
    pub sequence: u64,
}

/// Record location without the key (per-key duplicate storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u64,
    length: u32,
    sequence: u64,
}

/// Value wrapper carrying the engine's total order
#[derive(Debug, Clone)]
struct OrdKey(Value);

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        compare_values(&self.0, &other.0) == Ordering::Equal
    }
}

impl Eq for OrdKey {}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

/// B-tree index over one column.
///
/// Point lookup O(log N), range scan O(log N + K), ordered iteration.
pub struct BTreeIndex {
    column_name: String,
    tree: BTreeMap<OrdKey, Vec<Slot>>,
    entry_count: u64,
}

impl BTreeIndex {
    pub fn new(column_name: &str) -> Self {
        Self {
            column_name: column_name.to_string(),
            tree: BTreeMap::new(),
            entry_count: 0,
        }
    }

    /// Column name this index covers
    pub fn column_name(&self) -> &str {
        &self.column_name
    }

    /// Insert an entry. Duplicate keys are allowed.
    pub fn insert(&mut self, key: Value, offset: u64, length: u32, sequence: u64) {
        self.tree
            .entry(OrdKey(key))
            .or_default()
            .push(Slot {
                offset,
                length,
                sequence,
            });
        self.entry_count += 1;
    }

    /// All entries exactly matching `key`, in insertion order.
    pub fn search(&self, key: &Value) -> Vec<IndexEntry> {
        match self.tree.get(&OrdKey(key.clone())) {
            Some(slots) => slots
                .iter()
                .map(|s| IndexEntry {
                    key: key.clone(),
                    offset: s.offset,
                    length: s.length,
                    sequence: s.sequence,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// First entry matching `key`, without allocating an entry vector.
    pub fn search_first(&self, key: &Value) -> Option<IndexEntry> {
        let slot = self.tree.get(&OrdKey(key.clone()))?.first()?;
        Some(IndexEntry {
            key: key.clone(),
            offset: slot.offset,
            length: slot.length,
            sequence: slot.sequence,
        })
    }

    /// Point probe for Int64 keys. Observable only when the column's static
    /// type is Int64.
    pub fn search_first_int64(&self, key: i64) -> Option<(u64, u32, u64)> {
        let slot = self.tree.get(&OrdKey(Value::Int64(key)))?.first()?;
        Some((slot.offset, slot.length, slot.sequence))
    }

    /// Point probe for string keys. Observable only when the column's static
    /// type is String.
    pub fn search_first_str(&self, key: &str) -> Option<(u64, u32, u64)> {
        let slot = self.tree.get(&OrdKey(Value::Str(key.to_owned())))?.first()?;
        Some((slot.offset, slot.length, slot.sequence))
    }

    /// Entries with `lo <= key <= hi`, in ascending key order.
    pub fn range(&self, lo: &Value, hi: &Value) -> Vec<IndexEntry> {
        let lo = OrdKey(lo.clone());
        let hi = OrdKey(hi.clone());
        if lo > hi {
            return Vec::new();
        }
        let mut results = Vec::new();
        for (key, slots) in self.tree.range((Included(&lo), Included(&hi))) {
            for s in slots {
                results.push(IndexEntry {
                    key: key.0.clone(),
                    offset: s.offset,
                    length: s.length,
                    sequence: s.sequence,
                });
            }
        }
        results
    }

    /// Every entry, in ascending key order.
    pub fn all(&self) -> Vec<IndexEntry> {
        let mut results = Vec::with_capacity(self.entry_count as usize);
        for (key, slots) in &self.tree {
            for s in slots {
                results.push(IndexEntry {
                    key: key.0.clone(),
                    offset: s.offset,
                    length: s.length,
                    sequence: s.sequence,
                });
            }
        }
        results
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Number of distinct keys
    pub fn distinct_keys(&self) -> usize {
        self.tree.len()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.entry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_search_duplicates() {
        let mut idx = BTreeIndex::new("age");
        idx.insert(Value::Int32(25), 0, 10, 1);
        idx.insert(Value::Int32(30), 20, 10, 2);
        idx.insert(Value::Int32(25), 40, 10, 3);

        let hits = idx.search(&Value::Int32(25));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].sequence, 1);
        assert_eq!(hits[1].sequence, 3);
        assert!(idx.search(&Value::Int32(99)).is_empty());
        assert_eq!(idx.entry_count(), 3);
        assert_eq!(idx.distinct_keys(), 2);
    }

    #[test]
    fn test_search_first() {
        let mut idx = BTreeIndex::new("email");
        idx.insert(Value::Str("a@x".into()), 0, 8, 1);
        idx.insert(Value::Str("a@x".into()), 16, 8, 2);

        let entry = idx.search_first(&Value::Str("a@x".into())).unwrap();
        assert_eq!(entry.sequence, 1);
        assert_eq!(entry.offset, 0);
        assert!(idx.search_first(&Value::Str("b@x".into())).is_none());
    }

    #[test]
    fn test_range_inclusive_ascending() {
        let mut idx = BTreeIndex::new("score");
        for i in (0..100).rev() {
            idx.insert(Value::Int64(i), i as u64 * 16, 16, (100 - i) as u64);
        }

        let hits = idx.range(&Value::Int64(10), &Value::Int64(20));
        assert_eq!(hits.len(), 11);
        assert_eq!(hits[0].key, Value::Int64(10));
        assert_eq!(hits[10].key, Value::Int64(20));

        assert!(idx.range(&Value::Int64(50), &Value::Int64(40)).is_empty());
    }

    #[test]
    fn test_all_ascending_across_variants() {
        let mut idx = BTreeIndex::new("mixed");
        idx.insert(Value::Str("z".into()), 0, 1, 1);
        idx.insert(Value::Int32(5), 0, 1, 2);
        idx.insert(Value::Null, 0, 1, 3);
        idx.insert(Value::Int64(1), 0, 1, 4);

        let keys: Vec<Value> = idx.all().into_iter().map(|e| e.key).collect();
        assert_eq!(
            keys,
            vec![Value::Null, Value::Int32(5), Value::Int64(1), Value::Str("z".into())]
        );
    }

    #[test]
    fn test_fast_probes_require_static_type_match() {
        let mut idx = BTreeIndex::new("id");
        idx.insert(Value::Int64(42), 100, 50, 7);
        idx.insert(Value::Str("k".into()), 200, 50, 8);

        assert_eq!(idx.search_first_int64(42), Some((100, 50, 7)));
        assert_eq!(idx.search_first_int64(43), None);
        assert_eq!(idx.search_first_str("k"), Some((200, 50, 8)));

        // Int32 keys are not found through the Int64 probe
        let mut narrow = BTreeIndex::new("id32");
        narrow.insert(Value::Int32(42), 0, 1, 1);
        assert_eq!(narrow.search_first_int64(42), None);
    }

    #[test]
    fn test_clear() {
        let mut idx = BTreeIndex::new("c");
        idx.insert(Value::Int32(1), 0, 1, 1);
        idx.clear();
        assert!(idx.is_empty());
        assert_eq!(idx.entry_count(), 0);
        assert!(idx.all().is_empty());
    }
}
