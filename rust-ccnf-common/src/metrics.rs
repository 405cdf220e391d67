//! Forwarder counters.
//!
//! The engine increments these on every accept, drop, send, and store
//! event; a status reporter reads them. Atomics keep them shareable with
//! an external reader even though the engine itself is single-threaded.

use std::sync::atomic::{AtomicU64, Ordering};

/* ---------------------------------------------------------------- *
 * Primitives
 * ---------------------------------------------------------------- */

/// A monotonically increasing event counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        let c = Counter::new();
        c.value.store(self.value(), Ordering::Relaxed);
        c
    }
}

/// A value that can move both ways, like a table size.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        let g = Gauge::new();
        g.set(self.value());
        g
    }
}

/* ---------------------------------------------------------------- *
 * Aggregate forwarder metrics
 * ---------------------------------------------------------------- */

/// Everything the status surface reports about the forwarding plane.
#[derive(Debug, Default, Clone)]
pub struct ForwarderMetrics {
    /// Interests that passed the scope and duplicate checks.
    pub interests_accepted: Counter,
    /// Interests dropped as duplicates of an in-flight nonce or as
    /// scope violations.
    pub interests_dropped: Counter,
    /// Messages the codec rejected.
    pub parse_errors: Counter,
    /// Interest copies written to faces by the propagation pacer.
    pub interests_sent: Counter,
    /// ContentObjects written to faces by the delivery pacer.
    pub content_items_sent: Counter,
    /// Duplicate ContentObject arrivals.
    pub content_dups: Counter,
    /// Same-name different-body evictions.
    pub content_collisions: Counter,
    /// Content items from another codec era.
    pub downrev_content: Counter,

    /// Live faces in the face table.
    pub faces: Gauge,
    /// Entries in the content store.
    pub store_entries: Gauge,
    /// Entries in the interest-prefix table.
    pub prefix_entries: Gauge,
    /// Entries in the propagating table.
    pub propagating_entries: Gauge,
}

impl ForwarderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line summary for periodic status logging.
    pub fn summary(&self) -> String {
        format!(
            "interests accepted={} dropped={} sent={}; parse errors={}; \
             content sent={} dups={} collisions={}; \
             faces={} store={} prefixes={} propagating={}",
            self.interests_accepted.value(),
            self.interests_dropped.value(),
            self.interests_sent.value(),
            self.parse_errors.value(),
            self.content_items_sent.value(),
            self.content_dups.value(),
            self.content_collisions.value(),
            self.faces.value(),
            self.store_entries.value(),
            self.prefix_entries.value(),
            self.propagating_entries.value(),
        )
    }
}
