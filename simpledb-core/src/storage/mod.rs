//! Storage engine - coordinates all storage components

mod column_family;
mod engine;

pub use column_family::ColumnFamily;
pub(crate) use engine::EngineState;
pub use engine::{PrefixIter, StorageEngine};

use crate::{Result, StorageError};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`StorageConfig::fsync_interval`] (seconds)
pub const ENV_FSYNC_SEC: &str = "SIMPLEDB_FSYNC_SEC";
/// Environment variable overriding [`StorageConfig::compact_interval`] (seconds)
pub const ENV_COMPACT_SEC: &str = "SIMPLEDB_COMPACT_SEC";
/// Environment variable overriding [`StorageConfig::memtable_size_limit`]; `0` disables
pub const ENV_MEMTABLE_BYTES: &str = "SIMPLEDB_MEMTABLE_BYTES";

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Data directory
    pub data_dir: PathBuf,
    /// How often the maintenance thread fsyncs the WAL
    pub fsync_interval: Duration,
    /// Minimum time between background compactions
    pub compact_interval: Duration,
    /// Background compaction runs for column families with more segments than this
    pub compaction_trigger: usize,
    /// Total memtable bytes that trigger an automatic flush; `None` disables
    pub memtable_size_limit: Option<usize>,
    /// Run the maintenance thread
    pub background_maintenance: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            fsync_interval: Duration::from_secs_f64(crate::config::FSYNC_INTERVAL_SECS),
            compact_interval: Duration::from_secs_f64(crate::config::COMPACT_INTERVAL_SECS),
            compaction_trigger: crate::config::COMPACTION_TRIGGER,
            memtable_size_limit: Some(crate::config::MEMTABLE_SIZE_LIMIT),
            background_maintenance: true,
        }
    }
}

impl StorageConfig {
    /// Create a new config with the given directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults for `data_dir`, with `SIMPLEDB_*` environment overrides applied
    pub fn from_env(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(data_dir);
        if let Some(secs) = env_var(ENV_FSYNC_SEC) {
            config.fsync_interval = parse_interval(ENV_FSYNC_SEC, &secs)?;
        }
        if let Some(secs) = env_var(ENV_COMPACT_SEC) {
            config.compact_interval = parse_interval(ENV_COMPACT_SEC, &secs)?;
        }
        if let Some(bytes) = env_var(ENV_MEMTABLE_BYTES) {
            config.memtable_size_limit = parse_byte_limit(&bytes)?;
        }
        Ok(config)
    }

    /// Set WAL fsync interval
    pub fn fsync_interval(mut self, interval: Duration) -> Self {
        self.fsync_interval = interval;
        self
    }

    /// Set compaction interval
    pub fn compact_interval(mut self, interval: Duration) -> Self {
        self.compact_interval = interval;
        self
    }

    /// Set automatic flush threshold
    pub fn memtable_size_limit(mut self, limit: Option<usize>) -> Self {
        self.memtable_size_limit = limit;
        self
    }

    /// Enable or disable the maintenance thread
    pub fn background_maintenance(mut self, enabled: bool) -> Self {
        self.background_maintenance = enabled;
        self
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fsync_interval.is_zero() {
            return Err(StorageError::InvalidArgument(
                "fsync_interval must be positive".into(),
            ));
        }
        if self.memtable_size_limit == Some(0) {
            return Err(StorageError::InvalidArgument(
                "memtable_size_limit must be positive; use None to disable".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_interval(name: &str, raw: &str) -> Result<Duration> {
    let secs: f64 = raw
        .trim()
        .parse()
        .map_err(|_| StorageError::InvalidArgument(format!("{}={:?} is not a number", name, raw)))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(StorageError::InvalidArgument(format!(
            "{}={:?} must be a positive number of seconds",
            name, raw
        )));
    }
    Duration::try_from_secs_f64(secs).map_err(|e| {
        StorageError::InvalidArgument(format!("{}={:?} is out of range: {}", name, raw, e))
    })
}

fn parse_byte_limit(raw: &str) -> Result<Option<usize>> {
    let bytes: usize = raw.trim().parse().map_err(|_| {
        StorageError::InvalidArgument(format!("{}={:?} is not a byte count", ENV_MEMTABLE_BYTES, raw))
    })?;
    Ok((bytes > 0).then_some(bytes))
}
