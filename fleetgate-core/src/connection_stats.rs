//! # Connection Stats Collector
//!
//! Shared in-flight connection accounting for the load-balancing selectors.
//! One signed counter per endpoint URL in a concurrent map; the proxy layer
//! increments when it forwards a request and decrements on completion.
//!
//! Counters are deliberately signed. A decrement can arrive without a prior
//! increment (the proxy may finish a request that was counted before a
//! restart of the selector wiring), so transient negative values are legal
//! and every consumer reads them as zero. Entries are never evicted; they
//! live for the process lifetime.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// Concurrent per-endpoint connection counters.
///
/// Cheap to clone behind an `Arc`; all mutation is per-entry atomic, so many
/// proxy workers can record concurrently without contending on a single lock.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    counts: DashMap<String, AtomicI64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add `delta` to the counter for `url`.
    ///
    /// Missing entries are created on first touch. Negative results are kept
    /// as-is; see the module docs for why.
    pub fn record_connection(&self, url: &str, delta: i64) {
        if let Some(counter) = self.counts.get(url) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        // First touch for this URL. entry() takes the shard write lock, so
        // only go there when the fast path misses.
        self.counts
            .entry(url.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Observed in-flight connections for one endpoint, floored at zero.
    pub fn connections(&self, url: &str) -> i64 {
        self.counts
            .get(url)
            .map(|c| c.load(Ordering::Relaxed).max(0))
            .unwrap_or(0)
    }

    /// Snapshot of every counter. The snapshot may skew by whatever writes
    /// land while it is being taken; callers treat it as best-effort.
    pub fn connection_stats(&self) -> HashMap<String, i64> {
        self.counts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}
