//! Write-Ahead Log (WAL) implementation
//!
//! Every mutation is appended to a single `wal.log` file before the call that
//! produced it returns. At open the log is replayed from the start to rebuild
//! the memtables. A torn or unreadable tail is cut off before new records are
//! appended behind it. After a successful flush of every column family it is
//! truncated to zero length.
//!
//! Appends are flushed to the OS but not fsynced; see [`WalWriter::sync`].

mod entry;
mod reader;
mod writer;

pub use entry::{WalOp, WalRecord};
pub use reader::{Recovered, WalReader};
pub use writer::WalWriter;
