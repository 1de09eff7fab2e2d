//! Typed representation of a single access-log record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response-time classification band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Response time at or under 250ms.
    #[default]
    Healthy,
    /// Over 250ms, at or under 600ms.
    Medium,
    /// Over 600ms.
    Critical,
}

impl Threshold {
    /// Classify a response time into a band.
    #[must_use]
    pub fn classify(response_time: Duration) -> Self {
        if response_time <= Duration::from_millis(250) {
            Self::Healthy
        } else if response_time <= Duration::from_millis(600) {
            Self::Medium
        } else {
            Self::Critical
        }
    }
}

/// One parsed access-log record. Immutable after parsing.
///
/// Fields the line did not carry (or carried unparseably) hold their zero
/// value; only a structurally malformed line fails to produce a record at
/// all (see [`crate::parser::parse`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ParsedRecord {
    /// Absolute instant from the line's leading RFC3339 timestamp;
    /// Unix epoch when unparseable.
    #[serde(default = "epoch")]
    pub timestamp: DateTime<Utc>,
    /// Router log level (the `at=` token, e.g. "info").
    pub level: String,
    /// Response body size in bytes (`bytes=`).
    pub size_bytes: u64,
    /// Connection establishment time (`connect=`); zero if absent.
    pub connect_time: Duration,
    /// Service time (`service=`); zero if absent.
    pub response_time: Duration,
    /// Upstream worker identifier (`dyno=`, e.g. "web.1").
    pub source_shard: String,
    /// Client address (`fwd=`), kept verbatim — possibly double-quoted.
    pub source_addr: String,
    /// Request host (`host=`).
    pub host: String,
    /// HTTP method (`method=`).
    pub method: String,
    /// Request path (`path=`), surrounding quotes stripped.
    pub path: String,
    /// Protocol (`protocol=`, e.g. "https").
    pub protocol: String,
    /// Router-assigned request id (`request_id=`).
    pub request_id: String,
    /// HTTP status (`status=`); 0 if absent or unparseable.
    pub status: u16,
    /// Whether the status is below 400.
    pub success: bool,
    /// Response-time band derived from `response_time`.
    pub threshold: Threshold,
    /// Whether the record falls in the medium band.
    pub is_slow: bool,
}

fn epoch() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

impl Default for ParsedRecord {
    fn default() -> Self {
        Self {
            timestamp: epoch(),
            level: String::new(),
            size_bytes: 0,
            connect_time: Duration::ZERO,
            response_time: Duration::ZERO,
            source_shard: String::new(),
            source_addr: String::new(),
            host: String::new(),
            method: String::new(),
            path: String::new(),
            protocol: String::new(),
            request_id: String::new(),
            status: 0,
            success: true,
            threshold: Threshold::Healthy,
            is_slow: false,
        }
    }
}
