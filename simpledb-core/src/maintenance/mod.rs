//! Background maintenance: periodic WAL fsync and compaction

use crate::storage::EngineState;
use crate::Result;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Handle to the maintenance thread
pub(crate) struct Maintenance {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Maintenance {
    /// Spawn the maintenance thread.
    ///
    /// Every `fsync_interval` the WAL is synced. At most once per
    /// `compact_interval`, column families over the segment trigger are
    /// compacted. Failures are logged and retried on the next tick.
    pub(crate) fn start(
        state: Arc<Mutex<EngineState>>,
        fsync_interval: Duration,
        compact_interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("simpledb-maint".into())
            .spawn(move || {
                info!(?fsync_interval, ?compact_interval, "Maintenance thread started");
                let mut last_compact = Instant::now();

                loop {
                    match stop_rx.recv_timeout(fsync_interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let mut state = state.lock();
                    if state.is_closed() {
                        break;
                    }

                    if let Err(e) = state.sync_wal() {
                        warn!(error = %e, retryable = e.is_retryable(), "WAL fsync failed");
                    }

                    if last_compact.elapsed() >= compact_interval && state.needs_compaction() {
                        match state.compact_over_trigger() {
                            Ok(n) => debug!(column_families = n, "Background compaction finished"),
                            Err(e) => warn!(
                                error = %e,
                                retryable = e.is_retryable(),
                                "Background compaction failed"
                            ),
                        }
                        last_compact = Instant::now();
                    }
                }

                info!("Maintenance thread stopped");
            })?;

        Ok(Self { stop_tx, handle })
    }

    /// Signal the thread and wait for it to exit
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.try_send(());
        drop(self.stop_tx);
        if self.handle.join().is_err() {
            warn!("Maintenance thread panicked");
        }
    }
}
