//! Duplicates the parsed stream to the metrics and persistence queues.
//!
//! The two downstream queues have deliberately different send disciplines:
//!
//! - **metricsQ**: blocking send. Metrics are canonical; a record must never
//!   silently miss the aggregator, so a full queue backpressures the whole
//!   pipeline up to the ingress.
//! - **persistQ**: `try_send`. The archive is best-effort; a full queue
//!   increments a drop counter and logs a warning.
//!
//! Inverting the disciplines would make the archive authoritative and the
//! metrics lossy, which is exactly backwards for this system.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::record::ParsedRecord;

/// Single consumer of parsedQ, producer for metricsQ and persistQ.
pub struct FanOut {
    metrics_tx: mpsc::Sender<Arc<ParsedRecord>>,
    persist_tx: mpsc::Sender<Arc<ParsedRecord>>,
    dropped: Arc<AtomicU64>,
}

impl FanOut {
    #[must_use]
    pub fn new(
        metrics_tx: mpsc::Sender<Arc<ParsedRecord>>,
        persist_tx: mpsc::Sender<Arc<ParsedRecord>>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            metrics_tx,
            persist_tx,
            dropped,
        }
    }

    /// Consume parsedQ until it closes.
    pub async fn run(self, mut parsed_rx: mpsc::Receiver<Arc<ParsedRecord>>) {
        while let Some(record) = parsed_rx.recv().await {
            if self.metrics_tx.send(Arc::clone(&record)).await.is_err() {
                warn!("metrics queue closed, fan-out exiting");
                return;
            }
            match self.persist_tx.try_send(record) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(dropped_total = total, "persist queue full, dropping record");
                }
                // Writer already gone; only happens during shutdown.
                Err(TrySendError::Closed(_)) => {}
            }
        }
        debug!("parsed queue closed, fan-out exiting");
    }
}
