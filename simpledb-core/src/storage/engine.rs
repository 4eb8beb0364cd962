//! Storage engine - top-level coordinator
//!
//! All engine state sits behind one mutex. Every public call takes it for
//! its full duration, and so does the maintenance thread, so flushes and
//! compactions never interleave with a foreground mutation.

use super::{ColumnFamily, StorageConfig};
use crate::compaction::{needs_compaction, remove_obsolete};
use crate::fsutil::sync_dir;
use crate::maintenance::Maintenance;
use crate::manifest::{Manifest, ManifestSource};
use crate::manifest::CfManifest;
use crate::wal::{WalReader, WalRecord, WalWriter};
use crate::{BatchOp, EngineMetrics, Result, StorageError, WriteBatch};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// SimpleDB storage engine
pub struct StorageEngine {
    config: StorageConfig,
    state: Arc<Mutex<EngineState>>,
    maintenance: Mutex<Option<Maintenance>>,
}

/// Everything guarded by the coordinator lock
pub(crate) struct EngineState {
    root: PathBuf,
    /// Released by `close`
    wal: Option<WalWriter>,
    manifest: Manifest,
    cfs: BTreeMap<String, ColumnFamily>,
    memtable_size_limit: Option<usize>,
    compaction_trigger: usize,
    fsync_interval: f64,
    last_compact: DateTime<Utc>,
    last_wal_write: Option<DateTime<Utc>>,
    last_wal_fsync: Option<DateTime<Utc>>,
    last_flush: Option<DateTime<Utc>>,
    closed: bool,
}

/// Snapshot iterator returned by [`StorageEngine::prefix_iterator`]
pub struct PrefixIter {
    inner: std::vec::IntoIter<(Vec<u8>, Vec<u8>)>,
}

impl Iterator for PrefixIter {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for PrefixIter {}

impl StorageEngine {
    /// Open the engine at `path`, with `SIMPLEDB_*` environment overrides
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(StorageConfig::from_env(path)?)
    }

    /// Open (or create) the engine described by `config`.
    ///
    /// Recovery runs before the maintenance thread starts: the manifest is
    /// loaded (or rebuilt from the directory), column families are reopened,
    /// and the WAL is replayed into their memtables. Any recovery failure is
    /// returned.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let root = config.data_dir.clone();
        fs::create_dir_all(&root)?;

        let wal_path = root.join(crate::config::WAL_FILE);
        let wal = WalWriter::open(&wal_path)?;
        let manifest = Self::load_manifest(&root)?;

        let mut cfs = BTreeMap::new();
        for (name, cf_manifest) in &manifest.cfs {
            validate_cf_name(name)?;
            let cf = ColumnFamily::open(name, root.join(name), cf_manifest)?;
            cfs.insert(name.clone(), cf);
        }

        let mut state = EngineState {
            root: root.clone(),
            wal: Some(wal),
            manifest,
            cfs,
            memtable_size_limit: config.memtable_size_limit,
            compaction_trigger: config.compaction_trigger,
            fsync_interval: config.fsync_interval.as_secs_f64(),
            last_compact: Utc::now(),
            last_wal_write: None,
            last_wal_fsync: None,
            last_flush: None,
            closed: false,
        };
        state.replay_wal(&wal_path)?;

        let state = Arc::new(Mutex::new(state));
        let maintenance = if config.background_maintenance {
            Some(Maintenance::start(
                state.clone(),
                config.fsync_interval,
                config.compact_interval,
            )?)
        } else {
            None
        };

        info!("Opened SimpleDb at {:?}", root);

        Ok(Self {
            config,
            state,
            maintenance: Mutex::new(maintenance),
        })
    }

    fn load_manifest(root: &Path) -> Result<Manifest> {
        let (manifest, source) = Manifest::load(root)?;
        if source == ManifestSource::Loaded {
            return Ok(manifest);
        }

        let scanned = Manifest::from_directory_scan(root)?;
        if !scanned.cfs.is_empty() || source == ManifestSource::Corrupt {
            warn!(
                column_families = scanned.cfs.len(),
                "Rebuilding manifest from directory scan"
            );
            scanned.save(root)?;
        }
        Ok(scanned)
    }

    /// Data directory
    pub fn path(&self) -> &Path {
        &self.config.data_dir
    }

    /// Create the column family if it does not exist
    pub fn ensure_cf(&self, cf: &str) -> Result<()> {
        self.with_state(|state| state.ensure_cf(cf))
    }

    /// List all column families
    pub fn list_cfs(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.cfs.keys().cloned().collect()))
    }

    /// Get value for key from column family
    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_state(|state| Ok(state.get(cf, key)))
    }

    /// Put key-value pair, returning the previous value if any.
    ///
    /// Creates the column family on first use. Values must be non-empty.
    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_state(|state| {
            let previous = state.put(cf, key, value)?;
            state.maybe_flush()?;
            Ok(previous)
        })
    }

    /// Put key-value pair without looking up the previous value
    pub fn put_bytes(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(cf, key, value).map(|_| ())
    }

    /// Delete key, returning the previous value if any.
    ///
    /// Unknown column families are left alone.
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_state(|state| {
            let previous = state.delete(cf, key)?;
            state.maybe_flush()?;
            Ok(previous)
        })
    }

    /// Snapshot of live `(key, value)` pairs whose key starts with `prefix`,
    /// sorted by key
    pub fn prefix_iterator(&self, cf: &str, prefix: &[u8]) -> Result<PrefixIter> {
        self.with_state(|state| {
            let items = state
                .cfs
                .get(cf)
                .map(|cf| cf.prefix_scan(prefix))
                .unwrap_or_default();
            Ok(PrefixIter {
                inner: items.into_iter(),
            })
        })
    }

    /// Create new batch
    pub fn make_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Apply a batch in order under one lock acquisition.
    ///
    /// The whole batch is validated first; each operation is then logged and
    /// applied individually.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        for op in batch.ops() {
            validate_cf_name(op.cf())?;
            if let BatchOp::Put { value, .. } = op {
                validate_value(value)?;
            }
        }

        self.with_state(|state| {
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { cf, key, value } => {
                        state.put(&cf, &key, &value)?;
                    }
                    BatchOp::Delete { cf, key } => {
                        state.delete(&cf, &key)?;
                    }
                }
            }
            state.maybe_flush()
        })
    }

    /// Flush every memtable to a segment, persist the manifest, then
    /// truncate the WAL
    pub fn flush(&self) -> Result<()> {
        self.with_state(EngineState::flush)
    }

    /// Compact every column family with at least two segments
    pub fn compact(&self) -> Result<()> {
        self.with_state(|state| state.compact_where(|_| true).map(|_| ()))
    }

    /// Force the WAL to stable storage
    pub fn flush_wal(&self) -> Result<()> {
        self.with_state(EngineState::sync_wal)
    }

    /// Change the automatic flush threshold; `None` disables it
    pub fn set_byte_limit(&self, limit: Option<usize>) -> Result<()> {
        if limit == Some(0) {
            return Err(StorageError::InvalidArgument(
                "byte limit must be positive; use None to disable".into(),
            ));
        }
        self.with_state(|state| {
            state.memtable_size_limit = limit;
            Ok(())
        })
    }

    /// Get engine metrics
    pub fn metrics(&self) -> Result<EngineMetrics> {
        self.with_state(|state| Ok(state.metrics()))
    }

    /// Close the engine.
    ///
    /// Stops the maintenance thread, then with `flush` set writes every
    /// memtable out and truncates the WAL. `flush = false` leaves the WAL as
    /// the only copy of unflushed writes, as after a crash. The WAL is synced
    /// and its handle released. If any step fails the engine stays usable and
    /// `close` may be called again; once it succeeds, later calls fail with
    /// [`StorageError::Closed`].
    pub fn close(&self, flush: bool) -> Result<()> {
        if let Some(maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }

        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        // A failure leaves the engine open so the caller can retry
        if flush {
            state.flush()?;
        }
        state.sync_wal()?;
        state.wal = None;
        state.closed = true;

        info!("Closed SimpleDb");
        Ok(())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut EngineState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(StorageError::Closed);
        }
        f(&mut state)
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        if let Some(maintenance) = self.maintenance.get_mut().take() {
            maintenance.stop();
        }
    }
}

impl EngineState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    fn replay_wal(&mut self, wal_path: &Path) -> Result<()> {
        let recovered = WalReader::new(wal_path).recover()?;
        if recovered.discarded > 0 {
            warn!(
                valid_len = recovered.valid_len,
                discarded = recovered.discarded,
                "Discarding undecodable WAL tail"
            );
            self.wal()?.discard_tail(recovered.valid_len)?;
        }
        if recovered.records.is_empty() {
            return Ok(());
        }

        info!("Replaying WAL for crash recovery...");
        let count = recovered.records.len();
        for record in recovered.records {
            let value = record.to_value_state()?;
            self.ensure_cf(&record.cf)?;
            if let Some(cf) = self.cfs.get(&record.cf) {
                cf.apply(record.key, value);
            }
        }
        info!("Replayed {} WAL entries", count);
        Ok(())
    }

    fn ensure_cf(&mut self, name: &str) -> Result<()> {
        if self.cfs.contains_key(name) {
            return Ok(());
        }
        validate_cf_name(name)?;

        if self.manifest.ensure_cf(name) {
            self.manifest.save(&self.root)?;
        }
        let cf_manifest = self.manifest_entry(name)?;
        let cf = ColumnFamily::open(name, self.root.join(name), cf_manifest)?;
        self.cfs.insert(name.to_string(), cf);

        info!(cf = %name, "Created column family");
        Ok(())
    }

    fn manifest_entry(&self, name: &str) -> Result<&CfManifest> {
        self.manifest.cf(name).ok_or_else(|| missing_from_manifest(name))
    }

    fn wal(&mut self) -> Result<&mut WalWriter> {
        self.wal.as_mut().ok_or(StorageError::Closed)
    }

    fn get(&self, cf: &str, key: &[u8]) -> Option<Vec<u8>> {
        self.cfs.get(cf).and_then(|cf| cf.get(key))
    }

    fn put(&mut self, cf: &str, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        validate_value(value)?;
        self.ensure_cf(cf)?;
        let previous = self.get(cf, key);

        self.append_wal(&WalRecord::put(cf, key, value))?;
        if let Some(cf) = self.cfs.get(cf) {
            cf.put(key.to_vec(), value.to_vec());
        }
        Ok(previous)
    }

    fn delete(&mut self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.cfs.contains_key(cf) {
            return Ok(None);
        }
        let previous = self.get(cf, key);

        self.append_wal(&WalRecord::delete(cf, key))?;
        if let Some(cf) = self.cfs.get(cf) {
            cf.delete(key.to_vec());
        }
        Ok(previous)
    }

    fn append_wal(&mut self, record: &WalRecord) -> Result<()> {
        self.wal()?.append(record)?;
        self.last_wal_write = Some(Utc::now());
        Ok(())
    }

    pub(crate) fn sync_wal(&mut self) -> Result<()> {
        self.wal()?.sync()?;
        self.last_wal_fsync = Some(Utc::now());
        Ok(())
    }

    fn memtable_bytes(&self) -> usize {
        self.cfs.values().map(ColumnFamily::memtable_size).sum()
    }

    fn maybe_flush(&mut self) -> Result<()> {
        match self.memtable_size_limit {
            Some(limit) if self.memtable_bytes() >= limit => {
                info!(limit, "Memtable limit reached, flushing");
                self.flush()
            }
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        let mut flushed = 0;
        for (name, cf) in self.cfs.iter_mut() {
            let cf_manifest = self
                .manifest
                .cf_mut(name)
                .ok_or_else(|| missing_from_manifest(name))?;
            if cf.flush(cf_manifest)?.is_some() {
                flushed += 1;
            }
        }
        self.manifest.save(&self.root)?;

        // Every WAL record now lives in a segment the manifest references
        sync_dir(&self.root)?;
        self.wal()?.truncate()?;
        self.last_flush = Some(Utc::now());

        info!(column_families = flushed, "Flushed database to disk");
        Ok(())
    }

    pub(crate) fn needs_compaction(&self) -> bool {
        self.cfs
            .values()
            .any(|cf| needs_compaction(cf.segment_count(), self.compaction_trigger))
    }

    /// Compact column families over the segment trigger
    pub(crate) fn compact_over_trigger(&mut self) -> Result<usize> {
        let trigger = self.compaction_trigger;
        self.compact_where(|cf| needs_compaction(cf.segment_count(), trigger))
    }

    /// Compact every selected column family, persist the manifest once, then
    /// delete the superseded segments. Returns how many were compacted.
    fn compact_where(&mut self, select: impl Fn(&ColumnFamily) -> bool) -> Result<usize> {
        let mut obsolete = Vec::new();
        let mut compacted = 0;
        let mut failure = None;

        for (name, cf) in self.cfs.iter_mut() {
            if !select(cf) {
                continue;
            }
            let Some(cf_manifest) = self.manifest.cf_mut(name) else {
                failure = Some(missing_from_manifest(name));
                break;
            };
            match cf.compact(cf_manifest) {
                Ok(old) if old.is_empty() => {}
                Ok(old) => {
                    compacted += 1;
                    obsolete.extend(old);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if compacted > 0 {
            self.manifest.save(&self.root)?;
            remove_obsolete(&obsolete);
            self.last_compact = Utc::now();
            info!(column_families = compacted, "Compacted database");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(compacted),
        }
    }

    fn metrics(&self) -> EngineMetrics {
        let now = Utc::now();
        EngineMetrics {
            backend: crate::config::BACKEND_NAME.to_string(),
            size_on_disk_bytes: self.cfs.values().map(ColumnFamily::size_on_disk).sum(),
            memtable_bytes: self.memtable_bytes(),
            num_cfs: self.cfs.len(),
            sstables: self.cfs.values().map(ColumnFamily::segment_count).sum(),
            wal_bytes: self.wal.as_ref().map_or(0, WalWriter::size),
            last_compact_epoch: epoch_secs(self.last_compact),
            last_wal_write_epoch: self.last_wal_write.map(epoch_secs),
            last_wal_fsync_epoch: self.last_wal_fsync.map(epoch_secs),
            last_flush_epoch: self.last_flush.map(epoch_secs),
            wal_fsync_lag_seconds: self.last_wal_fsync.map(|t| lag_secs(now, t)),
            flush_lag_seconds: self.last_flush.map(|t| lag_secs(now, t)),
            fsync_interval_sec: self.fsync_interval,
            segment_read_errors: self.cfs.values().map(ColumnFamily::read_errors).sum(),
        }
    }
}

fn missing_from_manifest(name: &str) -> StorageError {
    StorageError::Corruption(format!("column family {} missing from manifest", name))
}

fn epoch_secs(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

fn lag_secs(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    ((now - then).num_milliseconds() as f64 / 1000.0).max(0.0)
}

/// Column family names double as directory names
fn validate_cf_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "invalid column family name {:?}",
            name
        )))
    }
}

/// Empty values are indistinguishable from tombstones on disk
fn validate_value(value: &[u8]) -> Result<()> {
    if value.is_empty() {
        return Err(StorageError::InvalidArgument(
            "empty values are not supported".into(),
        ));
    }
    Ok(())
}
