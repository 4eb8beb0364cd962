//! SSTable (segment) implementation
//!
//! Immutable on-disk runs of key/value records:
//!
//! ```text
//! [key_len: u32 BE][key][value_len: u32 BE][value] ...
//! ```
//!
//! A zero-length value is a tombstone. There is no header, footer, index or
//! checksum; every read is a linear scan from the start of the file. Segments
//! never hold the same key twice, and both flush and compaction write them
//! sorted by key.

mod builder;
mod reader;

pub use builder::SSTableBuilder;
pub use reader::SSTableReader;

use crate::{Result, StorageError, ValueState};
use bytes::{BufMut, BytesMut};

/// Width of the key and value length fields
pub const LEN_PREFIX: usize = 4;

/// SSTable metadata returned after a segment is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SSTableMeta {
    /// File name within the column family directory
    pub file_name: String,
    /// Number of records
    pub entry_count: usize,
    /// File size in bytes
    pub file_size: u64,
}

/// File name for segment `id`, e.g. `00000007.sst`
pub fn segment_file_name(id: u64) -> String {
    format!("{:08}.{}", id, crate::config::SEGMENT_EXT)
}

/// Inverse of [`segment_file_name`]
pub fn parse_segment_id(file_name: &str) -> Option<u64> {
    file_name
        .strip_suffix(crate::config::SEGMENT_EXT)
        .and_then(|s| s.strip_suffix('.'))
        .and_then(|s| s.parse().ok())
}

/// Append one record to `buf`. Tombstones are written with a zero-length
/// value.
pub(crate) fn encode_record(buf: &mut BytesMut, key: &[u8], value: &ValueState) -> Result<()> {
    let value = value.as_value().unwrap_or(&[]);
    buf.reserve(2 * LEN_PREFIX + key.len() + value.len());
    buf.put_u32(field_len(key)?);
    buf.put_slice(key);
    buf.put_u32(field_len(value)?);
    buf.put_slice(value);
    Ok(())
}

fn field_len(field: &[u8]) -> Result<u32> {
    u32::try_from(field.len()).map_err(|_| {
        StorageError::InvalidArgument(format!("field too large: {} bytes", field.len()))
    })
}
