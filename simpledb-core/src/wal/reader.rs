//! WAL reader for recovery

use super::WalRecord;
use crate::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Records recovered from the log
#[derive(Debug, Default)]
pub struct Recovered {
    pub records: Vec<WalRecord>,
    /// Length of the prefix made of complete records
    pub valid_len: u64,
    /// Bytes after `valid_len` that could not be decoded
    pub discarded: u64,
}

/// WAL reader for recovering records after a crash
pub struct WalReader {
    path: PathBuf,
}

impl WalReader {
    /// Create a new WAL reader
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Decode every complete record from the start of the log.
    ///
    /// A missing file yields no records. Decoding stops at the first record
    /// that is cut short or whose payload does not parse; everything before
    /// it is returned along with its length, so the caller can cut the rest
    /// off. I/O failures reading the file are errors.
    pub fn recover(&self) -> Result<Recovered> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            match WalRecord::decode(&data[offset..]) {
                Ok(Some((record, used))) => {
                    records.push(record);
                    offset += used;
                }
                Ok(None) => {
                    // Crash during write
                    warn!(
                        offset,
                        trailing_bytes = data.len() - offset,
                        "Truncated WAL entry, stopping replay"
                    );
                    break;
                }
                Err(e) => {
                    warn!(offset, error = %e, "Unreadable WAL entry, stopping replay");
                    break;
                }
            }
        }

        if !records.is_empty() {
            info!("Recovered {} entries from {:?}", records.len(), self.path);
        }

        Ok(Recovered {
            records,
            valid_len: offset as u64,
            discarded: (data.len() - offset) as u64,
        })
    }
}
