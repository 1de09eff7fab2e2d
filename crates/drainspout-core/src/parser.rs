//! Pure parsing of raw drain frames into [`ParsedRecord`]s.
//!
//! A frame body is a single log line in the router's whitespace-tokenized
//! `key=value` format:
//!
//! ```text
//! 2025-07-09T13:37:42.123456+00:00 heroku[router]: at=info method=GET
//!   path="/login" host=myapp.herokuapp.com fwd="197.248.10.42" dyno=web.1
//!   connect=1ms service=23ms status=200 bytes=1345 protocol=https
//! ```
//!
//! Parsing is total over byte inputs: malformed field values degrade to the
//! record's zero values, and the only hard failure is a line without a
//! second whitespace-separated segment. The parser performs no I/O and
//! never panics.

use crate::record::{ParsedRecord, Threshold};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Hard parse failure: the line has fewer than two whitespace-separated
/// segments, so it cannot even carry a timestamp plus a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame: fewer than two whitespace-separated segments")]
pub struct Malformed;

/// Tokenize a frame into its key/value map.
///
/// Every whitespace-separated token containing `=` is split on the first
/// `=`; later duplicates win. The line's first segment is stored under the
/// `timestamp` key, overriding any `timestamp=` token. Quoted values are
/// kept quoted.
pub fn tokenize(text: &str) -> Result<HashMap<String, String>, Malformed> {
    let mut fields = HashMap::new();
    for token in text.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            fields.insert(key.to_string(), value.to_string());
        }
    }

    let mut segments = text.splitn(2, char::is_whitespace);
    let first = segments.next().unwrap_or_default();
    if segments.next().is_none() {
        return Err(Malformed);
    }
    fields.insert("timestamp".to_string(), first.to_string());

    Ok(fields)
}

/// Parse one raw frame into a typed record.
///
/// Field-level failures yield zero values; see [`Malformed`] for the only
/// record-level failure.
pub fn parse(bytes: &[u8]) -> Result<ParsedRecord, Malformed> {
    let text = String::from_utf8_lossy(bytes);
    let fields = tokenize(&text)?;

    let field = |key: &str| fields.get(key).cloned().unwrap_or_default();

    let status = field("status").parse::<u16>().unwrap_or(0);
    let response_time = parse_human_duration(&field("service")).unwrap_or(Duration::ZERO);
    let threshold = Threshold::classify(response_time);

    Ok(ParsedRecord {
        timestamp: parse_timestamp(&field("timestamp")),
        level: field("at"),
        size_bytes: field("bytes").parse().unwrap_or(0),
        connect_time: parse_human_duration(&field("connect")).unwrap_or(Duration::ZERO),
        response_time,
        source_shard: field("dyno"),
        source_addr: field("fwd"),
        host: field("host"),
        method: field("method"),
        path: strip_quotes(&field("path")).to_string(),
        protocol: field("protocol"),
        request_id: field("request_id"),
        status,
        success: status < 400,
        threshold,
        is_slow: threshold == Threshold::Medium,
    })
}

/// Strip one pair of surrounding double quotes, if present.
#[must_use]
pub fn strip_quotes(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse a human duration string like `23ms`, `2s`, `1m30s`, `1.5h`.
///
/// Accepts a sequence of `<decimal><unit>` terms with units `ns`, `us`,
/// `µs`, `ms`, `s`, `m`, `h`. Returns `None` for anything else, including
/// a bare number.
#[must_use]
pub fn parse_human_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_nanos = 0f64;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut num = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let value: f64 = num.parse().ok()?;

        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphabetic() || c == 'µ' {
                unit.push(c);
                chars.next();
            } else {
                break;
            }
        }
        let unit_nanos = match unit.as_str() {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60.0 * 1_000_000_000.0,
            "h" => 3_600.0 * 1_000_000_000.0,
            _ => return None,
        };
        total_nanos += value * unit_nanos;
    }

    Some(Duration::from_nanos(total_nanos as u64))
}
