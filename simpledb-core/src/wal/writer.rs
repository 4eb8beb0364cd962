//! WAL writer implementation

use super::WalRecord;
use crate::fsutil::sync_dir;
use crate::Result;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Appends records to the WAL file
///
/// Not internally synchronized: the engine's coordinator lock serializes
/// appends, syncs and truncation.
pub struct WalWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl WalWriter {
    /// Open (or create) the WAL at `path` in append mode
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = Self::open_file(&path)?;
        Ok(Self {
            path,
            file: BufWriter::new(file),
        })
    }

    /// Append a record and flush it to the OS.
    ///
    /// The record survives a process crash once this returns; surviving power
    /// loss requires a later [`sync`](Self::sync). Returns the bytes written.
    pub fn append(&mut self, record: &WalRecord) -> Result<usize> {
        let framed = record.encode()?;
        self.file.write_all(&framed)?;
        self.file.flush()?;
        Ok(framed.len())
    }

    /// Force the log to stable storage
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_data()?;
        Ok(())
    }

    /// Replace the log with an empty file.
    ///
    /// Only valid once every record has been persisted elsewhere (after a
    /// full flush of all column families).
    pub fn truncate(&mut self) -> Result<()> {
        self.file.flush()?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.file = BufWriter::new(Self::open_file(&self.path)?);
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }
        Ok(())
    }

    /// Current size of the log file in bytes
    pub fn size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    /// Cut the log back to `len` bytes and fsync it, dropping a tail that
    /// replay could not decode. Later appends land right after the last good
    /// record.
    pub fn discard_tail(&mut self, len: u64) -> Result<()> {
        self.file.flush()?;
        let file = self.file.get_ref();
        if file.metadata()?.len() > len {
            file.set_len(len)?;
            file.sync_all()?;
        }
        Ok(())
    }

    fn open_file(path: &Path) -> Result<File> {
        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}
