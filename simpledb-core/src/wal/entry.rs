//! WAL record types and framing

use crate::{Result, StorageError, ValueState};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Size of the big-endian length prefix in front of every record
const HEADER_LEN: usize = 4;

/// WAL operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    Put,
    Delete,
}

/// A single logged mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    /// Column family name
    pub cf: String,
    pub op: WalOp,
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
    /// Present for puts only
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_opt")]
    pub value: Option<Vec<u8>>,
}

/// Keys and values travel as lowercase hex strings
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(hex::decode)
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

impl WalRecord {
    /// Create a put record
    pub fn put(cf: &str, key: &[u8], value: &[u8]) -> Self {
        Self {
            cf: cf.to_string(),
            op: WalOp::Put,
            key: key.to_vec(),
            value: Some(value.to_vec()),
        }
    }

    /// Create a delete record
    pub fn delete(cf: &str, key: &[u8]) -> Self {
        Self {
            cf: cf.to_string(),
            op: WalOp::Delete,
            key: key.to_vec(),
            value: None,
        }
    }

    /// Memtable slot this record produces when replayed. An empty put value
    /// replays as a tombstone, matching its on-disk meaning.
    pub fn to_value_state(&self) -> Result<ValueState> {
        match (self.op, &self.value) {
            (WalOp::Put, Some(value)) => Ok(ValueState::from_stored(value.clone())),
            (WalOp::Put, None) => Err(StorageError::InvalidFormat(
                "WAL put record without value".into(),
            )),
            (WalOp::Delete, _) => Ok(ValueState::Tombstone),
        }
    }

    /// Serialize the record with its length prefix
    ///
    /// Format:
    /// - 4 bytes: payload length (big-endian u32)
    /// - N bytes: JSON payload `{"cf", "op", "key", "value"?}`, key and
    ///   value hex encoded
    pub fn encode(&self) -> Result<Bytes> {
        let payload = serde_json::to_vec(self)?;
        let len = u32::try_from(payload.len()).map_err(|_| {
            StorageError::InvalidArgument(format!("WAL record too large: {} bytes", payload.len()))
        })?;

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_u32(len);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode one framed record from the front of `data`.
    ///
    /// Returns `Ok(None)` when `data` ends before the record does (a torn
    /// tail), otherwise the record and the number of bytes consumed.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>> {
        if data.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut cursor = data;
        let len = cursor.get_u32() as usize;
        if cursor.len() < len {
            return Ok(None);
        }

        let record: WalRecord = serde_json::from_slice(&cursor[..len])?;
        Ok(Some((record, HEADER_LEN + len)))
    }
}
