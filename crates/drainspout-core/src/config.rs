//! Environment-driven configuration.
//!
//! Every knob is optional; unset or unparseable values fall back to the
//! defaults below, so a bare `drainspout` invocation always starts.
//!
//! | Variable | Default |
//! |---|---|
//! | `PORT` | `5000` |
//! | `AUTH_TOKEN` | empty |
//! | `DATABASE_PATH` | `./logs.db` |
//! | `RAW_LOG_CHAN_SIZE` | `1000` |
//! | `PARSED_LOG_CHAN_SIZE` | `1000` |
//! | `METRIC_CHAN_SIZE` | `100` |
//! | `BATCH_SIZE` | `100` |
//! | `FLUSH_INTERVAL` | `5s` |
//! | `SNAPSHOT_INTERVAL` | `1m` |
//! | `DEDUPE_WINDOW` | `100` |
//! | `RATE_LIMIT_CAPACITY` | `100` |
//! | `RATE_LIMIT_REFILL` | `10` |
//! | `GEO_TABLE_PATH` | unset |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_FORMAT` | `pretty` |

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logging::LogFormat;
use crate::parser::parse_human_duration;

/// Runtime configuration, normally built by [`Config::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port for the HTTP listener.
    pub port: String,
    /// Shared secret for drain setup. Loaded but not yet enforced.
    pub auth_token: String,
    /// SQLite database path.
    pub database_path: String,
    /// rawQ capacity (frame bodies awaiting parse).
    pub raw_log_chan_size: usize,
    /// parsedQ capacity (records awaiting fan-out).
    pub parsed_log_chan_size: usize,
    /// metricsQ capacity (records awaiting aggregation).
    pub metric_chan_size: usize,
    /// persistQ capacity (records awaiting archive).
    pub persist_chan_size: usize,
    /// Records per persistence batch.
    pub batch_size: usize,
    /// Interval between forced batch commits.
    pub flush_interval: Duration,
    /// Interval between metric snapshot rows.
    pub snapshot_interval: Duration,
    /// Frame ids remembered by the dedupe ring.
    pub dedupe_window: usize,
    /// Rate limiter: tokens per client.
    pub rate_limit_capacity: f64,
    /// Rate limiter: tokens per second per client.
    pub rate_limit_refill: f64,
    /// Optional JSON geo table path.
    pub geo_table_path: Option<String>,
    /// Log level filter.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "5000".to_string(),
            auth_token: String::new(),
            database_path: "./logs.db".to_string(),
            raw_log_chan_size: 1000,
            parsed_log_chan_size: 1000,
            metric_chan_size: 100,
            persist_chan_size: 1000,
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            snapshot_interval: Duration::from_secs(60),
            dedupe_window: 100,
            rate_limit_capacity: 100.0,
            rate_limit_refill: 10.0,
            geo_table_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_str("PORT", &defaults.port),
            auth_token: env_str("AUTH_TOKEN", &defaults.auth_token),
            database_path: env_str("DATABASE_PATH", &defaults.database_path),
            raw_log_chan_size: env_parse("RAW_LOG_CHAN_SIZE", defaults.raw_log_chan_size),
            parsed_log_chan_size: env_parse("PARSED_LOG_CHAN_SIZE", defaults.parsed_log_chan_size),
            metric_chan_size: env_parse("METRIC_CHAN_SIZE", defaults.metric_chan_size),
            persist_chan_size: env_parse("PERSIST_CHAN_SIZE", defaults.persist_chan_size),
            batch_size: env_parse("BATCH_SIZE", defaults.batch_size),
            flush_interval: env_duration("FLUSH_INTERVAL", defaults.flush_interval),
            snapshot_interval: env_duration("SNAPSHOT_INTERVAL", defaults.snapshot_interval),
            dedupe_window: env_parse("DEDUPE_WINDOW", defaults.dedupe_window),
            rate_limit_capacity: env_parse("RATE_LIMIT_CAPACITY", defaults.rate_limit_capacity),
            rate_limit_refill: env_parse("RATE_LIMIT_REFILL", defaults.rate_limit_refill),
            geo_table_path: std::env::var("GEO_TABLE_PATH").ok().filter(|v| !v.is_empty()),
            log_level: env_str("LOG_LEVEL", &defaults.log_level),
            log_format: env_parse("LOG_FORMAT", defaults.log_format),
        }
    }

    /// Listener bind address derived from `port`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn env_str(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_human_duration(&v))
        .unwrap_or(default)
}
