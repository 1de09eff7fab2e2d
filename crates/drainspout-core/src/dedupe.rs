//! Frame-level deduplication for retried drain deliveries.
//!
//! The upstream router delivers frames at-least-once: a slow response or a
//! dropped connection triggers a retry carrying the same opaque frame id.
//! [`DedupeRing`] remembers the last N frame ids in a fixed-capacity ring
//! paired with a lookup set, giving O(1) membership tests and bounded memory.
//!
//! # Structure
//!
//! ```text
//! try_add(id) ──► lookup set hit? ──► duplicate (reject)
//!                      │
//!                      └─► evict buffer[write_idx] from set,
//!                          write id, advance write_idx mod N
//! ```
//!
//! Re-delivery of a frame that has already been evicted is accepted again;
//! that is the documented trade-off of a bounded window under an
//! at-least-once upstream.
//!
//! The ring is a single-writer structure and is not internally synchronized;
//! the ingress serializes access behind a mutex.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fixed-capacity set with insertion-order eviction, keyed by frame id.
#[derive(Debug)]
pub struct DedupeRing {
    /// Ring buffer of frame ids; empty string marks an unused slot.
    buffer: Vec<String>,
    /// Membership set mirroring the non-empty buffer slots.
    lookup: HashSet<String>,
    /// Next slot to write (and evict).
    write_idx: usize,
}

impl DedupeRing {
    /// Create a ring remembering the last `capacity` frame ids.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            buffer: vec![String::new(); capacity],
            lookup: HashSet::new(),
            write_idx: 0,
        }
    }

    /// Record a frame id. Returns `false` if the id is already within the
    /// dedupe window (a retried frame), `true` if it was admitted.
    ///
    /// Admission evicts the oldest remembered id once the ring is full.
    pub fn try_add(&mut self, id: &str) -> bool {
        if self.lookup.contains(id) {
            return false;
        }

        // Evict before insert.
        let evicted = &self.buffer[self.write_idx];
        if !evicted.is_empty() {
            self.lookup.remove(evicted);
        }
        self.buffer[self.write_idx] = id.to_string();
        self.lookup.insert(id.to_string());
        self.write_idx = (self.write_idx + 1) % self.buffer.len();

        true
    }

    /// Whether an id is currently within the dedupe window.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lookup.contains(id)
    }

    /// Number of frame ids currently remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    /// Whether the ring has seen no frames yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Window size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Occupancy snapshot for the operational surface.
    #[must_use]
    pub fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.buffer.len(),
            occupied: self.lookup.len(),
        }
    }
}

/// Serializable occupancy snapshot of a [`DedupeRing`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RingStats {
    /// Window size.
    pub capacity: usize,
    /// Frame ids currently remembered.
    pub occupied: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Basic add / duplicate ─────────────────────────────────────────

    #[test]
    fn first_add_accepted() {
        let mut ring = DedupeRing::new(4);
        assert!(ring.try_add("frame-1"));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn duplicate_within_window_rejected() {
        let mut ring = DedupeRing::new(4);
        assert!(ring.try_add("frame-1"));
        assert!(!ring.try_add("frame-1"));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn distinct_ids_accepted() {
        let mut ring = DedupeRing::new(4);
        assert!(ring.try_add("a"));
        assert!(ring.try_add("b"));
        assert!(ring.try_add("c"));
        assert_eq!(ring.len(), 3);
    }

    // ── Eviction ──────────────────────────────────────────────────────

    #[test]
    fn eviction_after_capacity_distinct_adds() {
        let mut ring = DedupeRing::new(3);
        assert!(ring.try_add("a"));
        assert!(ring.try_add("b"));
        assert!(ring.try_add("c"));
        // "a" is evicted by the fourth distinct id.
        assert!(ring.try_add("d"));
        assert!(!ring.contains("a"));
        // Beyond the window the same id is accepted again.
        assert!(ring.try_add("a"));
    }

    #[test]
    fn eviction_is_insertion_ordered() {
        let mut ring = DedupeRing::new(2);
        ring.try_add("a");
        ring.try_add("b");
        ring.try_add("c"); // evicts a
        assert!(!ring.contains("a"));
        assert!(ring.contains("b"));
        assert!(ring.contains("c"));
        ring.try_add("d"); // evicts b
        assert!(!ring.contains("b"));
        assert!(ring.contains("c"));
        assert!(ring.contains("d"));
    }

    #[test]
    fn size_one_ring_evicts_every_distinct_add() {
        let mut ring = DedupeRing::new(1);
        assert!(ring.try_add("a"));
        assert!(!ring.try_add("a"));
        assert!(ring.try_add("b")); // evicts a
        assert!(ring.try_add("a")); // a was evicted, accepted again
        assert_eq!(ring.len(), 1);
    }

    // ── Invariants ────────────────────────────────────────────────────

    #[test]
    fn lookup_mirrors_nonempty_slots() {
        let mut ring = DedupeRing::new(5);
        for i in 0..23 {
            ring.try_add(&format!("frame-{i}"));
            let non_empty = ring.buffer.iter().filter(|s| !s.is_empty()).count();
            assert_eq!(ring.lookup.len(), non_empty);
            assert!(ring.lookup.len() <= ring.capacity());
        }
    }

    #[test]
    fn len_never_exceeds_capacity() {
        let mut ring = DedupeRing::new(8);
        for i in 0..100 {
            ring.try_add(&format!("{i}"));
        }
        assert_eq!(ring.len(), 8);
    }

    #[test]
    fn empty_string_id_is_a_valid_key() {
        // The upstream frame id header is opaque; an empty value still
        // deduplicates retries of itself.
        let mut ring = DedupeRing::new(2);
        assert!(ring.try_add(""));
        assert!(!ring.try_add(""));
    }

    #[test]
    fn stats_reflect_occupancy() {
        let mut ring = DedupeRing::new(4);
        ring.try_add("a");
        ring.try_add("b");
        let stats = ring.stats();
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.occupied, 2);
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn zero_capacity_panics() {
        let _ = DedupeRing::new(0);
    }
}
