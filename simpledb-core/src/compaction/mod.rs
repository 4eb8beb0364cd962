//! Full compaction of a column family's segments
//!
//! All segments are merged into one key-sorted segment. Later segments
//! override earlier ones and tombstones are dropped, since nothing older than
//! the merged set remains to be shadowed.

use crate::sstable::{SSTableBuilder, SSTableMeta, SSTableReader};
use crate::{Result, ValueState};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Compaction trigger: more than `trigger` segments
pub fn needs_compaction(segment_count: usize, trigger: usize) -> bool {
    segment_count > trigger
}

/// Merge segments given oldest first into one key-ordered map.
///
/// Any read failure aborts the merge: compacting around an unreadable
/// segment would silently drop its keys.
pub fn merge_segments(segments: &[PathBuf]) -> Result<BTreeMap<Vec<u8>, ValueState>> {
    let mut merged = BTreeMap::new();
    for path in segments {
        merged.extend(SSTableReader::read_all(path)?);
        debug!(segment = ?path, keys = merged.len(), "Merged segment");
    }
    Ok(merged)
}

/// Merge `segments` and write the live result to `output`
pub fn compact_segments(segments: &[PathBuf], output: &Path) -> Result<SSTableMeta> {
    let merged = merge_segments(segments)?;
    let dropped = merged.values().filter(|v| v.is_tombstone()).count();

    let meta = SSTableBuilder::build(
        output,
        merged
            .iter()
            .filter(|(_, v)| !v.is_tombstone())
            .map(|(k, v)| (k.as_slice(), v)),
    )?;

    info!(
        inputs = segments.len(),
        entries = meta.entry_count,
        tombstones_dropped = dropped,
        output = %meta.file_name,
        "Compacted segments"
    );
    Ok(meta)
}

/// Delete superseded segment files. Already-missing files are fine; other
/// failures are logged and left for orphan cleanup at the next open.
pub fn remove_obsolete(segments: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in segments {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(segment = ?path, error = %e, "Failed to delete old segment"),
        }
    }
    removed
}
