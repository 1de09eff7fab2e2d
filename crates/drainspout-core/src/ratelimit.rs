//! Per-client token bucket rate limiting for the ingress.
//!
//! The token bucket algorithm allows bursts up to the bucket capacity while
//! enforcing an average admission rate over time. Tokens refill lazily from
//! timestamps, so no background task is needed.
//!
//! Buckets are keyed by client identity (the delivery's remote address) in
//! a [`RateLimiterMap`]: a read-mostly map of independently locked buckets,
//! so concurrent ingress handlers contend only when hitting the same key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// TokenBucket
// =============================================================================

/// A token bucket rate limiter.
///
/// Uses timestamp-based lazy refill: tokens accumulate between calls.
/// Time is passed explicitly (milliseconds) so tests never sleep.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum tokens the bucket can hold.
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    /// Current available tokens.
    tokens: f64,
    /// Last refill timestamp (milliseconds).
    last_refill_ms: u64,
    /// Total requests denied.
    total_denied: u64,
}

impl TokenBucket {
    /// Create a new bucket, starting full, with `last_refill` at `now_ms`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `refill_rate` is not positive.
    #[must_use]
    pub fn new(capacity: f64, refill_rate: f64, now_ms: u64) -> Self {
        assert!(capacity > 0.0, "capacity must be positive");
        assert!(refill_rate > 0.0, "refill_rate must be positive");
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill_ms: now_ms,
            total_denied: 0,
        }
    }

    /// Refill tokens based on elapsed time.
    fn refill(&mut self, now_ms: u64) {
        if now_ms <= self.last_refill_ms {
            return;
        }
        let elapsed_secs = (now_ms - self.last_refill_ms) as f64 / 1000.0;
        self.tokens = (self.tokens + elapsed_secs * self.refill_rate).min(self.capacity);
        self.last_refill_ms = now_ms;
    }

    /// Try to consume one token. Non-blocking.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        self.refill(now_ms);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.total_denied += 1;
            false
        }
    }

    /// Current available tokens.
    #[must_use]
    pub fn available(&mut self, now_ms: u64) -> f64 {
        self.refill(now_ms);
        self.tokens
    }

    /// Total requests denied since creation.
    #[must_use]
    pub fn total_denied(&self) -> u64 {
        self.total_denied
    }
}

// =============================================================================
// RateLimiterMap
// =============================================================================

/// Keyed token buckets behind a read-mostly map.
///
/// `allow` is non-blocking and thread-safe; new keys get a full bucket with
/// the shared capacity and refill rate.
#[derive(Debug)]
pub struct RateLimiterMap {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    capacity: f64,
    refill_rate: f64,
}

impl RateLimiterMap {
    /// Create a limiter map; every key's bucket holds `capacity` tokens and
    /// refills at `refill_rate` tokens/second.
    #[must_use]
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        assert!(capacity > 0.0, "capacity must be positive");
        assert!(refill_rate > 0.0, "refill_rate must be positive");
        Self {
            buckets: RwLock::new(HashMap::new()),
            capacity,
            refill_rate,
        }
    }

    /// Whether `key` may proceed right now.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, epoch_ms())
    }

    /// Whether `key` may proceed at the given timestamp. Test seam.
    pub fn allow_at(&self, key: &str, now_ms: u64) -> bool {
        let bucket = self.bucket(key, now_ms);
        let mut bucket = match bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        bucket.try_acquire(now_ms)
    }

    /// Number of distinct client keys seen.
    #[must_use]
    pub fn key_count(&self) -> usize {
        match self.buckets.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    fn bucket(&self, key: &str, now_ms: u64) -> Arc<Mutex<TokenBucket>> {
        if let Ok(map) = self.buckets.read() {
            if let Some(bucket) = map.get(key) {
                return Arc::clone(bucket);
            }
        }

        let mut map = match self.buckets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Double-checked: another handler may have inserted while we waited.
        Arc::clone(map.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(TokenBucket::new(
                self.capacity,
                self.refill_rate,
                now_ms,
            )))
        }))
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}
