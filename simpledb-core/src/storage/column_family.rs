//! Column family - one named keyspace: a memtable plus its segments

use crate::compaction;
use crate::manifest::CfManifest;
use crate::memtable::MemTable;
use crate::sstable::{parse_segment_id, segment_file_name, SSTableBuilder, SSTableMeta, SSTableReader};
use crate::{Result, StorageError, ValueState};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// A single column family
pub struct ColumnFamily {
    name: String,
    dir: PathBuf,
    memtable: MemTable,
    /// Oldest first, mirrors the manifest entry
    segments: Vec<PathBuf>,
    read_errors: AtomicU64,
}

impl ColumnFamily {
    /// Open a column family from its manifest entry.
    ///
    /// Creates the directory if needed, fails if a listed segment is missing,
    /// and deletes segment files the manifest does not list.
    pub fn open(name: &str, dir: PathBuf, manifest: &CfManifest) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let mut segments = Vec::with_capacity(manifest.sstables.len());
        for file in manifest.segment_files() {
            let path = dir.join(file);
            if !path.is_file() {
                return Err(StorageError::Recovery(format!(
                    "column family {} lists missing segment {:?}",
                    name, path
                )));
            }
            segments.push(path);
        }

        let cf = Self {
            name: name.to_string(),
            dir,
            memtable: MemTable::new(),
            segments,
            read_errors: AtomicU64::new(0),
        };
        cf.remove_orphans()?;
        Ok(cf)
    }

    /// Resolve a key: memtable first, then segments newest to oldest. The
    /// first layer that knows the key decides, tombstones included.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(state) = self.memtable.get(key) {
            return state.into_value();
        }

        for path in self.segments.iter().rev() {
            match SSTableReader::lookup(path, key) {
                Ok(Some(state)) => return state.into_value(),
                Ok(None) => continue,
                Err(e) => self.record_read_error(path, &e),
            }
        }

        None
    }

    /// Upsert a value in the memtable
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.memtable.put(key, value);
    }

    /// Write a tombstone to the memtable
    pub fn delete(&self, key: Vec<u8>) {
        self.memtable.delete(key);
    }

    /// Apply a replayed slot
    pub fn apply(&self, key: Vec<u8>, value: ValueState) {
        self.memtable.insert(key, value);
    }

    /// Live entries whose key starts with `prefix`, sorted by key, each key
    /// once with its most recent value.
    pub fn prefix_scan(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, ValueState> =
            self.memtable.scan_prefix(prefix).into_iter().collect();

        for path in self.segments.iter().rev() {
            match SSTableReader::scan_prefix_entries(path, prefix) {
                Ok(entries) => {
                    for (key, value) in entries {
                        merged.entry(key).or_insert(value);
                    }
                }
                Err(e) => self.record_read_error(path, &e),
            }
        }

        merged
            .into_iter()
            .filter_map(|(key, value)| value.into_value().map(|v| (key, v)))
            .collect()
    }

    /// Write the memtable to a new segment and register it in `manifest`.
    ///
    /// No-op when the memtable is empty. The segment and its directory entry
    /// are durable before `manifest` is touched; persisting `manifest` is the
    /// caller's job.
    pub fn flush(&mut self, manifest: &mut CfManifest) -> Result<Option<SSTableMeta>> {
        if self.memtable.is_empty() {
            return Ok(None);
        }

        let path = self.dir.join(segment_file_name(manifest.next_file_id));
        let entries = self.memtable.iter();
        let meta = SSTableBuilder::build(&path, entries.iter().map(|(k, v)| (k.as_slice(), v)))?;
        manifest.allocate_file_id();

        manifest.push_segment(meta.file_name.clone());
        self.segments.push(path);
        self.memtable.clear();

        info!(
            cf = %self.name,
            file = %meta.file_name,
            entries = meta.entry_count,
            bytes = meta.file_size,
            "Flushed memtable"
        );
        Ok(Some(meta))
    }

    /// Merge every segment into one and point `manifest` at it.
    ///
    /// No-op with fewer than two segments. Returns the superseded segment
    /// paths; the caller deletes them only after persisting `manifest`.
    pub fn compact(&mut self, manifest: &mut CfManifest) -> Result<Vec<PathBuf>> {
        if self.segments.len() < 2 {
            return Ok(Vec::new());
        }

        let path = self.dir.join(segment_file_name(manifest.next_file_id));
        let meta = compaction::compact_segments(&self.segments, &path)?;
        manifest.allocate_file_id();

        manifest.replace_segments(meta.file_name.clone());
        let obsolete = std::mem::replace(&mut self.segments, vec![path]);

        info!(cf = %self.name, file = %meta.file_name, replaced = obsolete.len(), "Compacted column family");
        Ok(obsolete)
    }

    /// Number of segments
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Approximate memtable size in bytes
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Total size of segment files
    pub fn size_on_disk(&self) -> u64 {
        self.segments
            .iter()
            .filter_map(|p| fs::metadata(p).ok())
            .map(|m| m.len())
            .sum()
    }

    /// Segment reads that failed during lookups and scans
    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }

    fn record_read_error(&self, path: &Path, error: &StorageError) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            cf = %self.name,
            segment = ?path,
            error = %error,
            corruption = error.is_corruption(),
            "Error reading SSTable"
        );
    }

    fn remove_orphans(&self) -> Result<()> {
        let live: HashSet<&Path> = self.segments.iter().map(PathBuf::as_path).collect();
        let mut orphans = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_segment = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_segment_id)
                .is_some();
            if is_segment && !live.contains(path.as_path()) {
                orphans.push(path);
            }
        }
        if orphans.is_empty() {
            return Ok(());
        }

        warn!(
            cf = %self.name,
            count = orphans.len(),
            listed = self.segments.len(),
            "Removing segments the manifest does not list"
        );
        for path in orphans {
            debug!(cf = %self.name, segment = ?path, "Removing orphan segment");
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
