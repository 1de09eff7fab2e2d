//! Pipeline wiring: bounded queues, queue gauges, and worker topology.
//!
//! [`Pipeline::spawn`] builds the four bounded channels from config sizes
//! and starts one task per stage:
//!
//! ```text
//! Ingress ──rawQ──► parser ──parsedQ──► FanOut ──metricsQ──► Aggregator
//!                                            └──persistQ──► Writer
//! ```
//!
//! Shutdown is drain-by-closure: when the last [`crate::ingress::Ingress`]
//! handle drops, rawQ closes, the parser drains it and drops parsedQ, the
//! fan-out follows, and the aggregator and writer exit once their queues
//! run dry — the writer committing its pending batch first. No worker is
//! ever force-killed with records in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::dedupe::DedupeRing;
use crate::fanout::FanOut;
use crate::geo::GeoResolver;
use crate::ingress::Ingress;
use crate::metrics::{Aggregator, ChannelHealth, MetricsHub};
use crate::parser;
use crate::ratelimit::RateLimiterMap;
use crate::record::ParsedRecord;
use crate::writer::{Writer, WriterConfig};

// =============================================================================
// ChannelGauges
// =============================================================================

/// Read-only queue pressure probes handed to the aggregator.
///
/// Holds weak senders so that gauge sampling never keeps a queue alive
/// past shutdown; a disconnected queue reads as empty.
#[derive(Clone)]
pub struct ChannelGauges {
    raw: mpsc::WeakSender<Vec<u8>>,
    raw_capacity: usize,
    parsed: mpsc::WeakSender<Arc<ParsedRecord>>,
    parsed_capacity: usize,
    persist_dropped: Arc<AtomicU64>,
    ring: Arc<Mutex<DedupeRing>>,
}

impl ChannelGauges {
    /// Sample queue pressure into a [`ChannelHealth`].
    #[must_use]
    pub fn health(&self, processing_rate: f64) -> ChannelHealth {
        let raw_len = queue_len(&self.raw, self.raw_capacity);
        let parsed_len = queue_len(&self.parsed, self.parsed_capacity);
        ChannelHealth {
            raw_queue_usage_pct: usage_pct(raw_len, self.raw_capacity),
            parsed_queue_usage_pct: usage_pct(parsed_len, self.parsed_capacity),
            processing_rate,
            backlog_size: raw_len + parsed_len,
            persist_dropped: self.persist_dropped.load(Ordering::Relaxed),
            dedupe_window_occupancy: match self.ring.lock() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            },
        }
    }

    /// Gauges wired to nothing; reads as an idle system. Test seam.
    #[must_use]
    pub fn disconnected() -> Self {
        let (raw_tx, _) = mpsc::channel::<Vec<u8>>(1);
        let (parsed_tx, _) = mpsc::channel::<Arc<ParsedRecord>>(1);
        Self {
            raw: raw_tx.downgrade(),
            raw_capacity: 1,
            parsed: parsed_tx.downgrade(),
            parsed_capacity: 1,
            persist_dropped: Arc::new(AtomicU64::new(0)),
            ring: Arc::new(Mutex::new(DedupeRing::new(1))),
        }
    }
}

fn queue_len<T>(weak: &mpsc::WeakSender<T>, capacity: usize) -> usize {
    weak.upgrade()
        .map_or(0, |sender| capacity.saturating_sub(sender.capacity()))
}

fn usage_pct(len: usize, capacity: usize) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        len as f64 / capacity as f64 * 100.0
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// A running pipeline: the ingress front end plus all worker tasks.
pub struct Pipeline {
    ingress: Arc<Ingress>,
    hub: Arc<MetricsHub>,
    persist_dropped: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Build the queues and spawn the parser, fan-out, aggregator, and
    /// writer tasks. Must run inside a tokio runtime.
    ///
    /// The database tables must already exist (see
    /// [`crate::writer::init_tables`]).
    #[must_use]
    pub fn spawn(config: &Config, geo: Arc<dyn GeoResolver>) -> Self {
        let (raw_tx, raw_rx) = mpsc::channel::<Vec<u8>>(config.raw_log_chan_size);
        let (parsed_tx, parsed_rx) =
            mpsc::channel::<Arc<ParsedRecord>>(config.parsed_log_chan_size);
        let (metrics_tx, metrics_rx) = mpsc::channel(config.metric_chan_size);
        let (persist_tx, persist_rx) = mpsc::channel(config.persist_chan_size);

        let persist_dropped = Arc::new(AtomicU64::new(0));
        let ring = Arc::new(Mutex::new(DedupeRing::new(config.dedupe_window)));
        let limiter = RateLimiterMap::new(config.rate_limit_capacity, config.rate_limit_refill);

        let gauges = ChannelGauges {
            raw: raw_tx.downgrade(),
            raw_capacity: config.raw_log_chan_size,
            parsed: parsed_tx.downgrade(),
            parsed_capacity: config.parsed_log_chan_size,
            persist_dropped: Arc::clone(&persist_dropped),
            ring: Arc::clone(&ring),
        };

        let aggregator = Aggregator::new(geo, gauges);
        let hub = aggregator.hub();
        let writer = Writer::new(WriterConfig::from(config), Arc::clone(&hub));
        let fanout = FanOut::new(metrics_tx, persist_tx, Arc::clone(&persist_dropped));

        let handles = vec![
            tokio::spawn(parser_worker(raw_rx, parsed_tx)),
            tokio::spawn(fanout.run(parsed_rx)),
            tokio::spawn(aggregator.run(metrics_rx)),
            tokio::spawn(writer.run(persist_rx)),
        ];

        let ingress = Arc::new(Ingress::new(ring, limiter, raw_tx));

        Self {
            ingress,
            hub,
            persist_dropped,
            handles,
        }
    }

    /// The delivery front end. Clone freely; every clone keeps rawQ open.
    #[must_use]
    pub fn ingress(&self) -> Arc<Ingress> {
        Arc::clone(&self.ingress)
    }

    /// Read handle for metric snapshots.
    #[must_use]
    pub fn hub(&self) -> Arc<MetricsHub> {
        Arc::clone(&self.hub)
    }

    /// Records dropped from the persistence queue so far.
    #[must_use]
    pub fn persist_dropped(&self) -> u64 {
        self.persist_dropped.load(Ordering::Relaxed)
    }

    /// Drain and stop every worker.
    ///
    /// Callers must have released their ingress clones first; a surviving
    /// clone keeps rawQ open and this will wait on it.
    pub async fn shutdown(self) {
        drop(self.ingress);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(%err, "pipeline worker panicked during shutdown");
            }
        }
        debug!("pipeline drained");
    }
}

/// rawQ consumer: parse each frame, forward records, drop malformed frames.
async fn parser_worker(
    mut raw_rx: mpsc::Receiver<Vec<u8>>,
    parsed_tx: mpsc::Sender<Arc<ParsedRecord>>,
) {
    while let Some(bytes) = raw_rx.recv().await {
        match parser::parse(&bytes) {
            Ok(record) => {
                if parsed_tx.send(Arc::new(record)).await.is_err() {
                    warn!("parsed queue closed, parser exiting");
                    return;
                }
            }
            Err(err) => warn!(%err, "dropping malformed frame"),
        }
    }
    debug!("raw queue closed, parser exiting");
}
