//! Delivery admission: validation, rate limiting, frame dedup, rawQ entry.
//!
//! The ingress is transport-independent: the HTTP layer reduces a request to
//! a [`Delivery`] and maps the resulting [`Admission`] back to a status
//! code. That keeps every admission rule testable without a socket.
//!
//! Admission order:
//!
//! 1. router validation (content type, method, user agent) — reject
//! 2. per-client rate limit — reject without touching the dedupe ring
//! 3. message count header — drop with a warning
//! 4. dedupe ring — duplicates dropped silently
//! 5. blocking send into rawQ — the single intended backpressure point
//!
//! A slow pipeline therefore surfaces upstream as a slow drain response,
//! which is what makes the router retry (and the dedupe ring absorb the
//! retry).

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::dedupe::{DedupeRing, RingStats};
use crate::ratelimit::RateLimiterMap;

/// Content type the router sends drain frames with.
pub const LOGPLEX_CONTENT_TYPE: &str = "application/logplex-1";
/// Required user agent prefix.
pub const LOGPLEX_USER_AGENT_PREFIX: &str = "Logplex/v";

/// One drain delivery, reduced to what admission needs.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Request method; anything but POST is rejected.
    pub method: String,
    /// `Content-Type` header.
    pub content_type: String,
    /// `User-Agent` header.
    pub user_agent: String,
    /// `Logplex-Msg-Count` header, if present.
    pub msg_count: Option<String>,
    /// `Logplex-Frame-Id` header; opaque dedupe key.
    pub frame_id: String,
    /// Client identity for rate limiting.
    pub remote_addr: String,
    /// Raw frame body.
    pub body: Vec<u8>,
}

/// Outcome of admitting one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Not a router drain delivery (content type, method, or user agent).
    Rejected,
    /// Client over its token budget; the ring was not consulted.
    RateLimited,
    /// Missing or non-positive `Logplex-Msg-Count`.
    InvalidMsgCount,
    /// Frame id already within the dedupe window.
    Duplicate,
    /// Frame enqueued for parsing.
    Accepted,
}

impl Admission {
    /// HTTP status the transport should answer with.
    ///
    /// Validation and rate-limit rejections answer 204 no-content; every
    /// other outcome (including duplicates) answers a plain 200 so the
    /// router does not retry.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Rejected | Self::RateLimited => 204,
            Self::InvalidMsgCount | Self::Duplicate | Self::Accepted => 200,
        }
    }
}

/// Boundary adapter in front of rawQ.
pub struct Ingress {
    ring: Arc<Mutex<DedupeRing>>,
    limiter: RateLimiterMap,
    raw_tx: mpsc::Sender<Vec<u8>>,
}

impl Ingress {
    #[must_use]
    pub fn new(
        ring: Arc<Mutex<DedupeRing>>,
        limiter: RateLimiterMap,
        raw_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            ring,
            limiter,
            raw_tx,
        }
    }

    /// Admit one delivery, blocking only on a full rawQ.
    pub async fn admit(&self, delivery: Delivery) -> Admission {
        if delivery.content_type != LOGPLEX_CONTENT_TYPE || delivery.method != "POST" {
            debug!(
                content_type = %delivery.content_type,
                method = %delivery.method,
                "rejecting non-drain delivery"
            );
            return Admission::Rejected;
        }
        if !delivery.user_agent.starts_with(LOGPLEX_USER_AGENT_PREFIX) {
            debug!(user_agent = %delivery.user_agent, "rejecting unknown user agent");
            return Admission::Rejected;
        }

        if !self.limiter.allow(&delivery.remote_addr) {
            debug!(remote_addr = %delivery.remote_addr, "rate limited");
            return Admission::RateLimited;
        }

        let msg_count = delivery
            .msg_count
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok());
        match msg_count {
            Some(n) if n >= 1 => {}
            _ => {
                warn!(msg_count = ?delivery.msg_count, "invalid message count, dropping");
                return Admission::InvalidMsgCount;
            }
        }

        let admitted = {
            let mut ring = match self.ring.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            ring.try_add(&delivery.frame_id)
        };
        if !admitted {
            debug!(frame_id = %delivery.frame_id, "duplicate frame dropped");
            return Admission::Duplicate;
        }

        // Single intended blocking point: a full rawQ slows the response.
        if self.raw_tx.send(delivery.body).await.is_err() {
            warn!("raw queue closed, frame discarded");
        }
        Admission::Accepted
    }

    /// Dedupe window occupancy for the operational surface.
    #[must_use]
    pub fn ring_stats(&self) -> RingStats {
        match self.ring.lock() {
            Ok(guard) => guard.stats(),
            Err(poisoned) => poisoned.into_inner().stats(),
        }
    }
}
