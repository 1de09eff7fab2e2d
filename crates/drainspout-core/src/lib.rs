//! drainspout-core: core library for the drainspout log drain collector.
//!
//! Drainspout ingests HTTP access-log drain deliveries from a PaaS log
//! router, deduplicates retried frames, parses each record, and feeds two
//! consumers concurrently: a live metrics aggregator exposed over HTTP and
//! a batched SQLite archiver.
//!
//! # Architecture
//!
//! ```text
//! Ingress ──► rawQ ──► Parser ──► parsedQ ──► FanOut ──► metricsQ ──► Aggregator
//!                                                  └───► persistQ ──► Writer
//! Aggregator ──(snapshot on tick)──► Writer
//! HTTP GET /metrics ──► Aggregator snapshot
//! ```
//!
//! # Modules
//!
//! - `ingress`: delivery validation, rate limiting, frame dedup, rawQ admission
//! - `dedupe`: fixed-capacity insertion-order-evicting frame-id ring
//! - `parser` / `record`: pure log-line parsing into typed records
//! - `fanout`: duplicates the parsed stream to metrics (guaranteed) and
//!   persistence (best-effort) queues
//! - `metrics`: single-owner aggregator actor, percentile window, per-shard
//!   health, alert lifecycle, deep-copy snapshots
//! - `writer`: batched SQLite sink with periodic flush and metric snapshots
//! - `pipeline`: channel wiring, queue gauges, worker spawning
//! - `ratelimit`: per-client token buckets
//! - `geo`: pluggable address-to-country resolution
//! - `config`: environment-driven configuration
//! - `logging`: tracing setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod config;
pub mod dedupe;
pub mod error;
pub mod fanout;
pub mod geo;
pub mod ingress;
pub mod logging;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod ratelimit;
pub mod record;
pub mod writer;

pub use error::{Error, Result};

/// Crate version, reported by the health endpoint and startup log line.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
