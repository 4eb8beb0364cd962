//! SSTable reader: sequential scans over a segment file

use super::LEN_PREFIX;
use crate::{Result, StorageError, ValueState};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Streams records from the start of a segment
pub struct SSTableReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
}

impl SSTableReader {
    /// Open an SSTable file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            path,
            reader: BufReader::new(file),
            offset: 0,
            file_size,
        })
    }

    /// Value of the first record whose key equals `key`.
    ///
    /// `Some(ValueState::Tombstone)` means the key was deleted in this segment.
    pub fn lookup(path: impl AsRef<Path>, key: &[u8]) -> Result<Option<ValueState>> {
        let mut reader = Self::open(path)?;
        while let Some((k, v)) = reader.next_record()? {
            if k == key {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    /// Records whose key starts with `prefix`, tombstones included
    pub fn scan_prefix_entries(
        path: impl AsRef<Path>,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, ValueState)>> {
        let mut reader = Self::open(path)?;
        let mut results = Vec::new();
        while let Some((k, v)) = reader.next_record()? {
            if k.starts_with(prefix) {
                results.push((k, v));
            }
        }
        Ok(results)
    }

    /// Every record, tombstones included
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<(Vec<u8>, ValueState)>> {
        Self::open(path)?.collect()
    }

    /// Next record, or `None` at a clean end of file
    pub fn next_record(&mut self) -> Result<Option<(Vec<u8>, ValueState)>> {
        let key_len = match self.read_len()? {
            Some(len) => len,
            None => return Ok(None),
        };
        let key = self.read_field(key_len)?;

        let value_len = self
            .read_len()?
            .ok_or_else(|| self.corruption("record ends after key"))?;
        let value = self.read_field(value_len)?;

        Ok(Some((key, ValueState::from_stored(value))))
    }

    fn read_len(&mut self) -> Result<Option<usize>> {
        let mut header = [0u8; LEN_PREFIX];
        let mut filled = 0;
        while filled < LEN_PREFIX {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.offset += filled as u64;

        match filled {
            0 => Ok(None),
            LEN_PREFIX => Ok(Some(u32::from_be_bytes(header) as usize)),
            _ => Err(self.corruption("truncated length field")),
        }
    }

    fn read_field(&mut self, len: usize) -> Result<Vec<u8>> {
        if len as u64 > self.file_size.saturating_sub(self.offset) {
            return Err(self.corruption("field length exceeds file size"));
        }
        let mut field = vec![0u8; len];
        self.reader.read_exact(&mut field).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                self.corruption("truncated field")
            } else {
                e.into()
            }
        })?;
        self.offset += len as u64;
        Ok(field)
    }

    fn corruption(&self, what: &str) -> StorageError {
        StorageError::Corruption(format!(
            "{} at offset {} in {:?}",
            what, self.offset, self.path
        ))
    }
}

impl Iterator for SSTableReader {
    type Item = Result<(Vec<u8>, ValueState)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
