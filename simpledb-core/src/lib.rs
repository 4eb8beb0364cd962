//! SimpleDB Core - Embedded Column-Family Key-Value Storage Engine
//!
//! A small LSM-style engine built for a single process and a single data
//! directory:
//!
//! - **Column families**: independent named keyspaces
//! - **Crash recovery**: every mutation is appended to a write-ahead log
//! - **Simple on-disk format**: length-prefixed segment files, JSON manifest
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: length-prefixed JSON records, replayed at open
//! - **MemTable**: in-memory skip list per column family
//! - **SSTable**: immutable segment files, scanned linearly
//! - **Manifest**: per column family segment list, replaced atomically
//! - **Maintenance**: background thread for WAL fsync and compaction
//!
//! # Durability
//!
//! A WAL append reaches the OS before the call returns, but is only fsynced by
//! [`StorageEngine::flush_wal`], [`StorageEngine::close`] or the maintenance
//! thread. A process crash loses nothing; power loss can lose up to one
//! fsync interval of writes.
//!
//! # Limitations
//!
//! Segment files carry no checksums. A corrupt segment is detected only when
//! its framing is broken, and is reported through
//! [`EngineMetrics::segment_read_errors`].

pub mod compaction;
pub mod manifest;
pub mod memtable;
pub mod sstable;
pub mod storage;
pub mod wal;

mod error;
mod fsutil;
mod maintenance;
mod types;

pub use error::{Result, StorageError};
pub use storage::{PrefixIter, StorageConfig, StorageEngine};
pub use types::*;

/// SimpleDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// WAL file name inside the data directory
    pub const WAL_FILE: &str = "wal.log";

    /// Manifest file name inside the data directory
    pub const MANIFEST_FILE: &str = "manifest.json";

    /// Segment file extension
    pub const SEGMENT_EXT: &str = "sst";

    /// Advisory memtable size before an automatic flush (8MB)
    pub const MEMTABLE_SIZE_LIMIT: usize = 8 * 1024 * 1024;

    /// A column family is compacted once it holds more segments than this
    pub const COMPACTION_TRIGGER: usize = 3;

    /// Default WAL fsync interval in seconds
    pub const FSYNC_INTERVAL_SECS: f64 = 1.0;

    /// Default compaction check interval in seconds
    pub const COMPACT_INTERVAL_SECS: f64 = 60.0;

    /// Backend name reported by metrics
    pub const BACKEND_NAME: &str = "simpledb";
}
