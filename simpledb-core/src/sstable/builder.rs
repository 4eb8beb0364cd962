//! SSTable builder for writing segments to disk

use super::{encode_record, SSTableMeta};
use crate::fsutil::sync_dir;
use crate::{Result, StorageError, ValueState};
use bytes::BytesMut;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Accumulates records in memory, then writes the segment in one go
pub struct SSTableBuilder {
    path: PathBuf,
    buf: BytesMut,
    entry_count: usize,
    last_key: Option<Vec<u8>>,
}

impl SSTableBuilder {
    /// Create a new SSTable builder
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            buf: BytesMut::new(),
            entry_count: 0,
            last_key: None,
        }
    }

    /// Add a record. Keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: &[u8], value: &ValueState) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(StorageError::InvalidArgument(
                    "SSTable keys must be strictly increasing".into(),
                ));
            }
        }
        encode_record(&mut self.buf, key, value)?;
        self.last_key = Some(key.to_vec());
        self.entry_count += 1;
        Ok(())
    }

    /// Build a segment from sorted entries
    pub fn build<'a, I>(path: impl Into<PathBuf>, entries: I) -> Result<SSTableMeta>
    where
        I: IntoIterator<Item = (&'a [u8], &'a ValueState)>,
    {
        let mut builder = Self::new(path);
        for (key, value) in entries {
            builder.add(key, value)?;
        }
        builder.finish()
    }

    /// Write the segment, fsync it, and fsync its directory so the new entry
    /// is durable before anything references it.
    pub fn finish(self) -> Result<SSTableMeta> {
        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::InvalidArgument(format!("bad segment path {:?}", self.path))
            })?;

        {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&self.path)?;
            file.write_all(&self.buf)?;
            file.flush()?;
            file.sync_all()?;
        }
        if let Some(parent) = self.path.parent() {
            sync_dir(parent)?;
        }

        Ok(SSTableMeta {
            file_name,
            entry_count: self.entry_count,
            file_size: self.buf.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::SSTableReader;
    use tempfile::TempDir;

    #[test]
    fn test_build_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("00000000.sst");

        let v1 = ValueState::Present(b"v1".to_vec());
        let tomb = ValueState::Tombstone;
        let meta = SSTableBuilder::build(&path, vec![(&b"a"[..], &v1), (&b"b"[..], &tomb)]).unwrap();

        assert_eq!(meta.file_name, "00000000.sst");
        assert_eq!(meta.entry_count, 2);
        assert_eq!(meta.file_size, std::fs::metadata(&path).unwrap().len());

        let all = SSTableReader::read_all(&path).unwrap();
        assert_eq!(all, vec![(b"a".to_vec(), v1), (b"b".to_vec(), tomb)]);
    }

    #[test]
    fn test_rejects_unsorted_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut builder = SSTableBuilder::new(temp_dir.path().join("x.sst"));
        let v = ValueState::Present(b"v".to_vec());

        builder.add(b"b", &v).unwrap();
        assert!(builder.add(b"a", &v).is_err());
        assert!(builder.add(b"b", &v).is_err());

        let meta = builder.finish().unwrap();
        assert_eq!(meta.entry_count, 1);
    }

    #[test]
    fn test_never_overwrites_existing_segment() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("00000001.sst");
        std::fs::write(&path, b"existing").unwrap();

        let v = ValueState::Present(b"v".to_vec());
        assert!(SSTableBuilder::build(&path, vec![(&b"k"[..], &v)]).is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
    }
}
