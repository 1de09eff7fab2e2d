//! Traffic metrics aggregation.
//!
//! A single aggregator task owns all mutable metric state: it consumes the
//! metrics queue, updates counters, maintains a rolling latency window for
//! percentiles, scores per-shard health, and raises alerts. Everyone else
//! reads through [`MetricsHub::snapshot`], which deep-copies under a read
//! lock so readers never observe the live structure.
//!
//! ```text
//! metricsQ ──► Aggregator::run ──► RwLock<Metrics> ◄── snapshot() readers
//!                   │                                   (HTTP, writer tick)
//!                   └── private: latency window, shard error counts
//! ```
//!
//! # Known limitations, kept deliberately
//!
//! - Endpoint and country tracking is "first 5 seen, then increment only
//!   those" rather than a true top-K.
//! - Alerts are never auto-resolved; the one-hour prune only removes alerts
//!   something external has marked resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

use crate::geo::GeoResolver;
use crate::parser::strip_quotes;
use crate::pipeline::ChannelGauges;
use crate::record::ParsedRecord;

/// Endpoint/country maps admit new keys only below this size.
const TOP_TRACK_CAP: usize = 5;
/// Percentiles recompute once the window holds this many samples.
const PERCENTILE_MIN_SAMPLES: usize = 300;
/// Window size that triggers pruning during a recompute.
const WINDOW_PRUNE_THRESHOLD: usize = 1000;
/// Samples retained by a prune.
const WINDOW_RETAIN: usize = 500;
/// Weight of the newest observation in the per-shard response-time EWMA.
const SHARD_EWMA_ALPHA: f64 = 0.1;

// =============================================================================
// Metric types
// =============================================================================

/// Health classification of one upstream shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

/// Rolling per-shard performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShardMetric {
    /// Shard name (e.g. "web.1").
    pub name: String,
    /// Records seen from this shard.
    pub request_count: u64,
    /// EWMA of response time.
    pub avg_response_time: Duration,
    /// Errors (4xx+5xx) as a percentage of this shard's requests.
    pub error_rate: f64,
    /// Derived health band.
    pub status: ShardStatus,
}

impl ShardMetric {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            request_count: 0,
            avg_response_time: Duration::ZERO,
            error_rate: 0.0,
            status: ShardStatus::Healthy,
        }
    }
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// Alert category. At most one unresolved alert exists per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    HighErrorRate,
    SlowResponse,
}

/// A raised operational alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Never set by the aggregator itself; resolved alerts age out after
    /// one hour.
    pub resolved: bool,
}

/// Queue pressure snapshot, refreshed on every ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub struct ChannelHealth {
    /// rawQ fill percentage.
    pub raw_queue_usage_pct: f64,
    /// parsedQ fill percentage.
    pub parsed_queue_usage_pct: f64,
    /// Aggregator throughput (requests/second since start).
    pub processing_rate: f64,
    /// Records waiting in rawQ + parsedQ.
    pub backlog_size: usize,
    /// Records dropped from the persistence queue so far.
    pub persist_dropped: u64,
    /// Frame ids currently in the dedupe window.
    pub dedupe_window_occupancy: usize,
}

/// The aggregated traffic metrics exposed to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Metrics {
    /// Wall time of the last ingest.
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub requests_per_second: f64,
    /// 2xx as a percentage of total.
    pub success_rate: f64,
    /// 4xx+5xx as a percentage of total.
    pub error_rate: f64,
    /// Mean of the current latency window.
    pub avg_response_time: Duration,
    pub p50_response_time: Duration,
    pub p95_response_time: Duration,
    pub p99_response_time: Duration,
    /// Records in the medium response-time band.
    pub slow_request_count: u64,
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    pub get_requests: u64,
    pub post_requests: u64,
    pub put_requests: u64,
    pub delete_requests: u64,
    pub other_requests: u64,
    /// Country → request count (first-5 tracking).
    pub top_countries: HashMap<String, u64>,
    /// Shard name → rolling performance.
    pub shard_performance: HashMap<String, ShardMetric>,
    /// Path → request count (first-5 tracking).
    pub top_endpoints: HashMap<String, u64>,
    pub active_alerts: Vec<Alert>,
    pub channel_health: ChannelHealth,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            timestamp: DateTime::UNIX_EPOCH,
            total_requests: 0,
            requests_per_second: 0.0,
            success_rate: 0.0,
            error_rate: 0.0,
            avg_response_time: Duration::ZERO,
            p50_response_time: Duration::ZERO,
            p95_response_time: Duration::ZERO,
            p99_response_time: Duration::ZERO,
            slow_request_count: 0,
            status_2xx: 0,
            status_3xx: 0,
            status_4xx: 0,
            status_5xx: 0,
            get_requests: 0,
            post_requests: 0,
            put_requests: 0,
            delete_requests: 0,
            other_requests: 0,
            top_countries: HashMap::new(),
            shard_performance: HashMap::new(),
            top_endpoints: HashMap::new(),
            active_alerts: Vec::new(),
            channel_health: ChannelHealth::default(),
        }
    }
}

// =============================================================================
// MetricsHub
// =============================================================================

/// Shared handle to the metrics state: one writer (the aggregator task),
/// many snapshot readers.
#[derive(Debug, Default)]
pub struct MetricsHub {
    inner: RwLock<Metrics>,
}

impl MetricsHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deep-copied point-in-time view of the metrics.
    ///
    /// Readers never hold the lock across serialization: the clone happens
    /// under the read lock, everything after works on the copy.
    #[must_use]
    pub fn snapshot(&self) -> Metrics {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Metrics> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// =============================================================================
// Aggregator
// =============================================================================

/// Single-owner actor over [`Metrics`].
///
/// Exactly one `Aggregator` mutates the hub it was created with; the
/// latency window and per-shard error counters are private to it.
pub struct Aggregator {
    hub: Arc<MetricsHub>,
    geo: Arc<dyn GeoResolver>,
    gauges: ChannelGauges,
    window: Vec<Duration>,
    shard_errors: HashMap<String, u64>,
    started: Instant,
}

impl Aggregator {
    #[must_use]
    pub fn new(geo: Arc<dyn GeoResolver>, gauges: ChannelGauges) -> Self {
        Self {
            hub: Arc::new(MetricsHub::new()),
            geo,
            gauges,
            window: Vec::new(),
            shard_errors: HashMap::new(),
            started: Instant::now(),
        }
    }

    /// Shared read handle for snapshot consumers.
    #[must_use]
    pub fn hub(&self) -> Arc<MetricsHub> {
        Arc::clone(&self.hub)
    }

    /// Consume the metrics queue until it closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Arc<ParsedRecord>>) {
        while let Some(record) = rx.recv().await {
            self.ingest(&record);
        }
        debug!("metrics queue closed, aggregator exiting");
    }

    /// Fold one record into the metrics under the write lock.
    pub fn ingest(&mut self, record: &ParsedRecord) {
        let now = Utc::now();
        let mut m = self.hub.write();

        // Status bucketing; shard error counters feed the per-shard rate.
        match record.status {
            200..=299 => m.status_2xx += 1,
            300..=399 => m.status_3xx += 1,
            400..=499 => {
                m.status_4xx += 1;
                if !record.source_shard.is_empty() {
                    *self
                        .shard_errors
                        .entry(record.source_shard.clone())
                        .or_insert(0) += 1;
                }
            }
            500..=u16::MAX => {
                m.status_5xx += 1;
                if !record.source_shard.is_empty() {
                    *self
                        .shard_errors
                        .entry(record.source_shard.clone())
                        .or_insert(0) += 1;
                }
            }
            _ => {}
        }

        m.total_requests += 1;

        if record.is_slow {
            m.slow_request_count += 1;
        }

        match record.method.as_str() {
            "GET" => m.get_requests += 1,
            "POST" => m.post_requests += 1,
            "PUT" => m.put_requests += 1,
            "DELETE" => m.delete_requests += 1,
            _ => m.other_requests += 1,
        }

        // First-5 tracking: new keys admitted only below the cap, known
        // keys keep counting.
        if m.top_endpoints.len() < TOP_TRACK_CAP || m.top_endpoints.contains_key(&record.path) {
            *m.top_endpoints.entry(record.path.clone()).or_insert(0) += 1;
        }

        if !record.source_addr.is_empty() {
            let addr = strip_quotes(&record.source_addr);
            if let Some(country) = self.geo.country(addr) {
                if !country.is_empty()
                    && (m.top_countries.len() < TOP_TRACK_CAP
                        || m.top_countries.contains_key(&country))
                {
                    *m.top_countries.entry(country).or_insert(0) += 1;
                }
            }
        }

        if !record.source_shard.is_empty() {
            let errors = self
                .shard_errors
                .get(&record.source_shard)
                .copied()
                .unwrap_or(0);
            let shard = m
                .shard_performance
                .entry(record.source_shard.clone())
                .or_insert_with(|| ShardMetric::new(&record.source_shard));
            shard.request_count += 1;
            shard.error_rate = errors as f64 / shard.request_count as f64 * 100.0;
            shard.avg_response_time = if shard.avg_response_time.is_zero() {
                record.response_time
            } else {
                ewma(shard.avg_response_time, record.response_time)
            };
            shard.status = if shard.error_rate > 10.0
                || shard.avg_response_time > Duration::from_secs(2)
            {
                ShardStatus::Critical
            } else if shard.error_rate > 5.0 || shard.avg_response_time > Duration::from_secs(1) {
                ShardStatus::Warning
            } else {
                ShardStatus::Healthy
            };
        }

        self.window.push(record.response_time);
        if self.window.len() >= PERCENTILE_MIN_SAMPLES {
            compute_percentiles(&mut self.window, &mut m);
        }

        if m.total_requests > 0 {
            m.success_rate = m.status_2xx as f64 / m.total_requests as f64 * 100.0;
            m.error_rate =
                (m.status_4xx + m.status_5xx) as f64 / m.total_requests as f64 * 100.0;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        m.requests_per_second = if elapsed > 0.0 {
            m.total_requests as f64 / elapsed
        } else {
            0.0
        };

        let window_secs: f64 = self.window.iter().map(Duration::as_secs_f64).sum();
        m.avg_response_time = Duration::from_secs_f64(window_secs / self.window.len() as f64);

        maintain_alerts(&mut m, now);
        m.channel_health = self.gauges.health(m.requests_per_second);
        m.timestamp = now;
    }

    /// Force a percentile recompute regardless of window size.
    pub fn recompute_percentiles(&mut self) {
        let mut m = self.hub.write();
        compute_percentiles(&mut self.window, &mut m);
    }

    /// Number of samples currently in the latency window.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

fn ewma(old: Duration, sample: Duration) -> Duration {
    Duration::from_secs_f64(
        old.as_secs_f64() * (1.0 - SHARD_EWMA_ALPHA) + sample.as_secs_f64() * SHARD_EWMA_ALPHA,
    )
}

/// Sort a copy of the window and index percentiles at ⌊N·p/100⌋.
///
/// Windows past [`WINDOW_PRUNE_THRESHOLD`] are truncated to their last
/// [`WINDOW_RETAIN`] samples after reading, so percentiles track recent
/// behavior rather than all-time.
fn compute_percentiles(window: &mut Vec<Duration>, m: &mut Metrics) {
    if window.is_empty() {
        return;
    }

    let mut sorted = window.clone();
    sorted.sort_unstable();
    let n = sorted.len();
    m.p50_response_time = sorted[n * 50 / 100];
    m.p95_response_time = sorted[n * 95 / 100];
    m.p99_response_time = sorted[n * 99 / 100];

    if window.len() > WINDOW_PRUNE_THRESHOLD {
        let tail = window.split_off(window.len() - WINDOW_RETAIN);
        *window = tail;
    }
}

/// Prune aged-out resolved alerts, then upsert threshold alerts.
fn maintain_alerts(m: &mut Metrics, now: DateTime<Utc>) {
    m.active_alerts
        .retain(|a| !(a.resolved && now.signed_duration_since(a.timestamp) > chrono::Duration::hours(1)));

    if m.error_rate > 10.0 {
        upsert_alert(
            m,
            AlertType::HighErrorRate,
            Severity::Critical,
            "Error rate is above 10%",
            now,
        );
    } else if m.error_rate > 5.0 {
        upsert_alert(
            m,
            AlertType::HighErrorRate,
            Severity::Warning,
            "Error rate is above 5%",
            now,
        );
    }

    if m.p95_response_time > Duration::from_secs(5) {
        upsert_alert(
            m,
            AlertType::SlowResponse,
            Severity::Critical,
            "P95 response time is above 5 seconds",
            now,
        );
    } else if m.p95_response_time > Duration::from_secs(2) {
        upsert_alert(
            m,
            AlertType::SlowResponse,
            Severity::Warning,
            "P95 response time is above 2 seconds",
            now,
        );
    }
}

fn upsert_alert(
    m: &mut Metrics,
    alert_type: AlertType,
    severity: Severity,
    message: &str,
    now: DateTime<Utc>,
) {
    let alert = Alert {
        alert_type,
        severity,
        message: message.to_string(),
        timestamp: now,
        resolved: false,
    };
    if let Some(existing) = m
        .active_alerts
        .iter_mut()
        .find(|a| a.alert_type == alert_type && !a.resolved)
    {
        *existing = alert;
    } else {
        m.active_alerts.push(alert);
    }
}
