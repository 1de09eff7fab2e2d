//! Batched SQLite persistence.
//!
//! The writer is a long-running actor with three inputs: persistQ records,
//! a flush tick, and a snapshot tick.
//!
//! ```text
//! persistQ record ──► batch; commit when len ≥ batch_size
//! flush tick      ──► commit non-empty batch
//! snapshot tick   ──► commit non-empty batch, then archive one
//!                     Metrics snapshot row
//! persistQ closed ──► commit pending batch, exit
//! ```
//!
//! Batches commit atomically: one transaction, one prepared insert executed
//! per record; any failure rolls the whole batch back, which is then logged
//! and discarded — upstream retention bounds the loss, and the aggregator
//! remains the source of truth for recent behavior.
//!
//! SQLite access is synchronous `rusqlite` behind `spawn_blocking`; the
//! connection is opened from the database path per commit, so it never
//! crosses an await point. Commits are seconds apart, making the open cost
//! irrelevant.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::StorageError;
use crate::metrics::{Metrics, MetricsHub};
use crate::record::ParsedRecord;

/// Writer knobs, split from [`Config`] so tests can shrink the intervals.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// SQLite database path.
    pub db_path: String,
    /// Records per batch commit.
    pub batch_size: usize,
    /// Forced commit interval for partial batches.
    pub flush_interval: Duration,
    /// Metric snapshot interval.
    pub snapshot_interval: Duration,
}

impl From<&Config> for WriterConfig {
    fn from(config: &Config) -> Self {
        Self {
            db_path: config.database_path.clone(),
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            snapshot_interval: config.snapshot_interval,
        }
    }
}

/// Batched sink for parsed records and periodic metric snapshots.
pub struct Writer {
    config: WriterConfig,
    hub: Arc<MetricsHub>,
}

impl Writer {
    #[must_use]
    pub fn new(config: WriterConfig, hub: Arc<MetricsHub>) -> Self {
        Self { config, hub }
    }

    /// Consume persistQ until it closes, committing batches along the way.
    /// The pending batch is committed before exit.
    pub async fn run(self, mut rx: mpsc::Receiver<Arc<ParsedRecord>>) {
        let mut batch: Vec<Arc<ParsedRecord>> = Vec::with_capacity(self.config.batch_size);

        let start = tokio::time::Instant::now();
        let mut flush = tokio::time::interval_at(
            start + self.config.flush_interval,
            self.config.flush_interval,
        );
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut snapshot = tokio::time::interval_at(
            start + self.config.snapshot_interval,
            self.config.snapshot_interval,
        );
        snapshot.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(record) => {
                        batch.push(record);
                        if batch.len() >= self.config.batch_size {
                            self.commit(&mut batch).await;
                        }
                    }
                    None => {
                        self.commit(&mut batch).await;
                        break;
                    }
                },
                _ = flush.tick() => {
                    if !batch.is_empty() {
                        self.commit(&mut batch).await;
                    }
                }
                _ = snapshot.tick() => {
                    if !batch.is_empty() {
                        self.commit(&mut batch).await;
                    }
                    self.write_snapshot().await;
                }
            }
        }
        debug!("persist queue closed, writer exiting");
    }

    async fn commit(&self, batch: &mut Vec<Arc<ParsedRecord>>) {
        if batch.is_empty() {
            return;
        }
        let records = std::mem::take(batch);
        let db_path = self.config.db_path.clone();
        match tokio::task::spawn_blocking(move || commit_batch_sync(&db_path, &records)).await {
            Ok(Ok(rows)) => debug!(rows, "batch committed"),
            Ok(Err(err)) => warn!(%err, "failed to write batch, discarding"),
            Err(err) => warn!(%err, "batch commit task failed"),
        }
    }

    async fn write_snapshot(&self) {
        let snapshot = self.hub.snapshot();
        let db_path = self.config.db_path.clone();
        match tokio::task::spawn_blocking(move || write_snapshot_sync(&db_path, &snapshot)).await {
            Ok(Ok(())) => debug!("metric snapshot archived"),
            Ok(Err(err)) => warn!(%err, "failed to write metric snapshot"),
            Err(err) => warn!(%err, "snapshot task failed"),
        }
    }
}

// =============================================================================
// SQLite operations (sync, run inside spawn_blocking)
// =============================================================================

fn open_conn(db_path: &str) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Create the archive tables. Called once at startup; failure is fatal.
pub fn init_tables(db_path: &str) -> Result<(), StorageError> {
    let conn = open_conn(db_path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS raw_logs (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             timestamp DATETIME,
             log_data TEXT,
             created_at DATETIME DEFAULT CURRENT_TIMESTAMP
         );
         CREATE TABLE IF NOT EXISTS metric_snapshots (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             snapshot_time DATETIME,
             metrics_data TEXT,
             created_at DATETIME DEFAULT CURRENT_TIMESTAMP
         );",
    )?;
    Ok(())
}

/// Commit one batch atomically. Returns the number of rows inserted.
fn commit_batch_sync(
    db_path: &str,
    records: &[Arc<ParsedRecord>],
) -> Result<usize, StorageError> {
    let mut conn = open_conn(db_path)?;
    let tx = conn.transaction()?;
    {
        let mut stmt =
            tx.prepare_cached("INSERT INTO raw_logs (timestamp, log_data) VALUES (?1, ?2)")?;
        for record in records {
            let json = serde_json::to_string(record.as_ref())?;
            stmt.execute(rusqlite::params![record.timestamp, json])?;
        }
    } // drop stmt before commit
    tx.commit()?;
    Ok(records.len())
}

fn write_snapshot_sync(db_path: &str, snapshot: &Metrics) -> Result<(), StorageError> {
    let conn = open_conn(db_path)?;
    let json = serde_json::to_string(snapshot)?;
    conn.execute(
        "INSERT INTO metric_snapshots (snapshot_time, metrics_data) VALUES (?1, ?2)",
        rusqlite::params![snapshot.timestamp, json],
    )?;
    Ok(())
}
