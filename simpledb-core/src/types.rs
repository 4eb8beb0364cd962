//! Core types for SimpleDB

use serde::{Deserialize, Serialize};

/// Value slot for a key: a live value or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueState {
    /// Live value (never empty)
    Present(Vec<u8>),
    /// Deletion marker, shadows older versions of the key
    Tombstone,
}

impl ValueState {
    /// Build from the on-disk representation, where an empty value is a tombstone
    pub fn from_stored(value: Vec<u8>) -> Self {
        if value.is_empty() {
            ValueState::Tombstone
        } else {
            ValueState::Present(value)
        }
    }

    /// Borrow the live value, if any
    pub fn as_value(&self) -> Option<&[u8]> {
        match self {
            ValueState::Present(v) => Some(v.as_slice()),
            ValueState::Tombstone => None,
        }
    }

    /// Take the live value, if any
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            ValueState::Present(v) => Some(v),
            ValueState::Tombstone => None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, ValueState::Tombstone)
    }

    /// Bytes the value occupies (zero for tombstones)
    pub fn size(&self) -> usize {
        self.as_value().map_or(0, <[u8]>::len)
    }
}

/// A single mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        cf: String,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: String,
        key: Vec<u8>,
    },
}

impl BatchOp {
    /// Column family the operation targets
    pub fn cf(&self) -> &str {
        match self {
            BatchOp::Put { cf, .. } | BatchOp::Delete { cf, .. } => cf,
        }
    }
}

/// Ordered list of mutations applied sequentially by
/// [`StorageEngine::write_batch`](crate::StorageEngine::write_batch)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, cf: &str, key: &[u8], value: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Put {
            cf: cf.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self
    }

    /// Queue a delete
    pub fn delete(&mut self, cf: &str, key: &[u8]) -> &mut Self {
        self.ops.push(BatchOp::Delete {
            cf: cf.to_string(),
            key: key.to_vec(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Operations in application order
    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Engine metrics snapshot
///
/// Epoch fields are seconds since the Unix epoch; lag fields are seconds
/// elapsed since the matching epoch. `None` means the event has not happened
/// since the engine was opened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub backend: String,
    pub size_on_disk_bytes: u64,
    pub memtable_bytes: usize,
    pub num_cfs: usize,
    pub sstables: usize,
    pub wal_bytes: u64,
    pub last_compact_epoch: f64,
    pub last_wal_write_epoch: Option<f64>,
    pub last_wal_fsync_epoch: Option<f64>,
    pub last_flush_epoch: Option<f64>,
    pub wal_fsync_lag_seconds: Option<f64>,
    pub flush_lag_seconds: Option<f64>,
    pub fsync_interval_sec: f64,
    /// Segment reads that failed during lookups and scans
    pub segment_read_errors: u64,
}
