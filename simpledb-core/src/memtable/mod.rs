//! MemTable implementation using a skip list
//!
//! The MemTable buffers the most recent writes of one column family, keyed
//! and ordered by raw key bytes. Deletes are kept as tombstones so that they
//! shadow older values in segments until the next flush.

use crate::ValueState;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

/// MemTable for in-memory writes
pub struct MemTable {
    data: SkipMap<Vec<u8>, ValueState>,
    /// Approximate size in bytes (keys plus live values)
    size_bytes: AtomicUsize,
}

impl MemTable {
    /// Create a new MemTable
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size_bytes: AtomicUsize::new(0),
        }
    }

    /// Current slot for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Option<ValueState> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Upsert a live value
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.insert(key, ValueState::Present(value));
    }

    /// Record a deletion
    pub fn delete(&self, key: Vec<u8>) {
        self.insert(key, ValueState::Tombstone);
    }

    /// Insert a slot, replacing any previous one for the same key
    pub fn insert(&self, key: Vec<u8>, value: ValueState) {
        let previous = self
            .data
            .get(key.as_slice())
            .map(|entry| entry.key().len() + entry.value().size())
            .unwrap_or(0);
        let added = key.len() + value.size();

        self.data.insert(key, value);

        if added >= previous {
            self.size_bytes.fetch_add(added - previous, Ordering::Relaxed);
        } else {
            self.size_bytes.fetch_sub(previous - added, Ordering::Relaxed);
        }
    }

    /// Get the current size in bytes
    pub fn size(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    /// Snapshot of all entries in key order
    pub fn iter(&self) -> Vec<(Vec<u8>, ValueState)> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Entries whose key starts with `prefix`, in key order, tombstones included
    pub fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, ValueState)> {
        self.data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.data = SkipMap::new();
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Get entry count
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memtable_put_get() {
        let memtable = MemTable::new();
        memtable.put(b"k1".to_vec(), b"v1".to_vec());
        memtable.put(b"k1".to_vec(), b"v2".to_vec());

        assert_eq!(memtable.get(b"k1"), Some(ValueState::Present(b"v2".to_vec())));
        assert_eq!(memtable.get(b"k2"), None);
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_memtable_tombstone() {
        let memtable = MemTable::new();
        memtable.put(b"k".to_vec(), b"value".to_vec());
        memtable.delete(b"k".to_vec());

        assert_eq!(memtable.get(b"k"), Some(ValueState::Tombstone));
        assert_eq!(memtable.size(), 1);
    }

    #[test]
    fn test_memtable_size_accounting() {
        let mut memtable = MemTable::new();
        memtable.put(b"abc".to_vec(), b"12345".to_vec());
        assert_eq!(memtable.size(), 8);

        memtable.put(b"abc".to_vec(), b"1".to_vec());
        assert_eq!(memtable.size(), 4);

        memtable.delete(b"abc".to_vec());
        assert_eq!(memtable.size(), 3);

        memtable.clear();
        assert_eq!(memtable.size(), 0);
        assert!(memtable.is_empty());
    }

    #[test]
    fn test_memtable_sorted_iteration() {
        let memtable = MemTable::new();
        let keys: [&[u8]; 3] = [b"c", b"a", b"b"];
        for key in keys {
            memtable.put(key.to_vec(), b"v".to_vec());
        }

        let keys: Vec<_> = memtable.iter().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_memtable_prefix_scan() {
        let memtable = MemTable::new();
        memtable.put(b"user:1".to_vec(), b"a".to_vec());
        memtable.delete(b"user:2".to_vec());
        memtable.put(b"usex".to_vec(), b"x".to_vec());
        memtable.put(b"user".to_vec(), b"root".to_vec());

        let results = memtable.scan_prefix(b"user:");
        assert_eq!(
            results,
            vec![
                (b"user:1".to_vec(), ValueState::Present(b"a".to_vec())),
                (b"user:2".to_vec(), ValueState::Tombstone),
            ]
        );
        assert_eq!(memtable.scan_prefix(b"").len(), 4);
    }
}
