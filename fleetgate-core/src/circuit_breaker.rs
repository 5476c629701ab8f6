//! # Circuit Breaker Module
//!
//! Per-endpoint circuit breaker for the health subsystem. After a run of
//! failed probes the breaker opens and the health client stops touching the
//! network for that endpoint until the open timeout elapses, at which point
//! exactly one caller is let through half-open to test recovery.
//!
//! ## Overview
//!
//! The breaker keeps one lock-free entry per endpoint URL:
//! - **Failure Detection**: consecutive failures counted on an atomic
//! - **Open State**: probes short-circuit to `Offline` without network I/O
//! - **Half-Open Admission**: a CAS on the last-attempt stamp picks a single
//!   winner per half-open window; everyone else stays blocked
//! - **Recovery**: one recorded success fully closes the entry
//!
//! ## States
//!
//! Closed → Open on the Nth consecutive failure (default N = 3).
//! Open → Half-open after the open timeout (default 30 s); the CAS winner
//! probes, and if it does not report back within the half-open retry window
//! (1 s) another caller may try.
//! Half-open → Closed on success, back to Open on failure (the failure path
//! is just `record_failure` again; the count is already at threshold).
//!
//! All state lives on atomics inside a [`DashMap`], so `is_open` on the hot
//! probe path never takes a lock beyond the map shard read.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Breaker tuning knobs.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a half-open probe
    pub open_timeout: Duration,
    /// How long a half-open winner has to report back before another caller
    /// is admitted
    pub half_open_retry: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(30),
            half_open_retry: Duration::from_secs(1),
        }
    }
}

/// Per-URL breaker state. Stamps are milliseconds since the breaker was
/// created, which keeps everything in plain atomics.
#[derive(Debug, Default)]
struct BreakerEntry {
    failures: AtomicU32,
    open: AtomicBool,
    last_failure_ms: AtomicU64,
    last_attempt_ms: AtomicU64,
}

/// Serializable snapshot for the scheduler stats payload.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub tracked_endpoints: usize,
    pub open_endpoints: Vec<String>,
}

/// Lock-free per-endpoint circuit breaker.
#[derive(Debug)]
pub struct EndpointCircuitBreaker {
    entries: DashMap<String, Arc<BreakerEntry>>,
    config: BreakerConfig,
    epoch: Instant,
}

impl Default for EndpointCircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl EndpointCircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn entry(&self, url: &str) -> Arc<BreakerEntry> {
        if let Some(entry) = self.entries.get(url) {
            return entry.clone();
        }
        self.entries
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(BreakerEntry::default()))
            .clone()
    }

    /// Whether probes for `url` should be short-circuited.
    ///
    /// Never-seen URLs are closed. When the entry is open and the open
    /// timeout has elapsed, a CAS on the last-attempt stamp elects one
    /// half-open winner: that caller gets `false` and must report back via
    /// [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). Every other caller keeps
    /// getting `true` until the winner reports or the half-open retry window
    /// passes.
    pub fn is_open(&self, url: &str) -> bool {
        let Some(entry) = self.entries.get(url).map(|e| e.value().clone()) else {
            return false;
        };
        if !entry.open.load(Ordering::Acquire) {
            return false;
        }

        let now = self.now_ms();
        let last_failure = entry.last_failure_ms.load(Ordering::Acquire);
        if now.saturating_sub(last_failure) < self.config.open_timeout.as_millis() as u64 {
            return true;
        }

        // Open timeout elapsed: try to become the half-open winner.
        let last_attempt = entry.last_attempt_ms.load(Ordering::Acquire);
        let window = self.config.half_open_retry.as_millis() as u64;
        if last_attempt != 0 && now.saturating_sub(last_attempt) < window {
            // a winner is already out probing
            return true;
        }
        if entry
            .last_attempt_ms
            .compare_exchange(last_attempt, now.max(1), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(url, "circuit breaker half-open, admitting one probe");
            return false;
        }
        true
    }

    /// Record a successful probe outcome: the circuit fully closes.
    pub fn record_success(&self, url: &str) {
        let entry = self.entry(url);
        let was_open = entry.open.swap(false, Ordering::AcqRel);
        entry.failures.store(0, Ordering::Release);
        entry.last_attempt_ms.store(0, Ordering::Release);
        if was_open {
            tracing::info!(url, "circuit breaker closed after successful probe");
        }
    }

    /// Record a failed probe outcome; opens the circuit at the threshold.
    pub fn record_failure(&self, url: &str) {
        let entry = self.entry(url);
        let failures = entry.failures.fetch_add(1, Ordering::AcqRel) + 1;
        entry.last_failure_ms.store(self.now_ms(), Ordering::Release);
        entry.last_attempt_ms.store(0, Ordering::Release);
        if failures >= self.config.failure_threshold && !entry.open.swap(true, Ordering::AcqRel) {
            tracing::warn!(url, failures, "circuit breaker opened");
        }
    }

    /// Drop all breaker state for an endpoint that left the fleet.
    pub fn cleanup_endpoint(&self, url: &str) {
        self.entries.remove(url);
    }

    /// URLs the breaker currently tracks; consumed by the cleanup sweep.
    pub fn active_endpoints(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> BreakerStats {
        let mut open_endpoints: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().open.load(Ordering::Acquire))
            .map(|e| e.key().clone())
            .collect();
        open_endpoints.sort();
        BreakerStats {
            tracked_endpoints: self.entries.len(),
            open_endpoints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn test_breaker(open_timeout: Duration) -> EndpointCircuitBreaker {
        EndpointCircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            open_timeout,
            half_open_retry: Duration::from_millis(200),
        })
    }

    #[test]
    fn closed_for_unknown_urls() {
        let breaker = EndpointCircuitBreaker::default();
        assert!(!breaker.is_open("http://never-seen/"));
    }

    #[test]
    fn opens_on_threshold() {
        let breaker = test_breaker(Duration::from_secs(30));
        breaker.record_failure("http://a/");
        breaker.record_failure("http://a/");
        assert!(!breaker.is_open("http://a/"));
        breaker.record_failure("http://a/");
        assert!(breaker.is_open("http://a/"));
    }

    #[test]
    fn success_resets() {
        let breaker = test_breaker(Duration::from_secs(30));
        for _ in 0..3 {
            breaker.record_failure("http://a/");
        }
        assert!(breaker.is_open("http://a/"));
        breaker.record_success("http://a/");
        assert!(!breaker.is_open("http://a/"));
        // counting starts over, not from the old total
        breaker.record_failure("http://a/");
        assert!(!breaker.is_open("http://a/"));
    }

    #[test]
    fn half_open_admits_exactly_one_caller() {
        let breaker = test_breaker(Duration::from_millis(50));
        for _ in 0..3 {
            breaker.record_failure("http://a/");
        }
        assert!(breaker.is_open("http://a/"));

        sleep(Duration::from_millis(80));
        // first caller after the timeout wins the CAS
        assert!(!breaker.is_open("http://a/"));
        // everyone else stays blocked while the winner is out
        assert!(breaker.is_open("http://a/"));
        assert!(breaker.is_open("http://a/"));

        breaker.record_success("http://a/");
        assert!(!breaker.is_open("http://a/"));
    }

    #[test]
    fn half_open_retries_when_winner_goes_silent() {
        let breaker = test_breaker(Duration::from_millis(50));
        for _ in 0..3 {
            breaker.record_failure("http://a/");
        }
        sleep(Duration::from_millis(80));
        assert!(!breaker.is_open("http://a/"));
        assert!(breaker.is_open("http://a/"));

        // winner never reports back; after the retry window a new caller
        // gets admitted
        sleep(Duration::from_millis(250));
        assert!(!breaker.is_open("http://a/"));
    }

    #[test]
    fn failure_in_half_open_reopens() {
        let breaker = test_breaker(Duration::from_millis(50));
        for _ in 0..3 {
            breaker.record_failure("http://a/");
        }
        sleep(Duration::from_millis(80));
        assert!(!breaker.is_open("http://a/"));
        breaker.record_failure("http://a/");
        assert!(breaker.is_open("http://a/"));
    }

    #[test]
    fn cleanup_and_active_endpoints() {
        let breaker = EndpointCircuitBreaker::default();
        breaker.record_failure("http://a/");
        breaker.record_failure("http://b/");
        let mut active = breaker.active_endpoints();
        active.sort();
        assert_eq!(active, vec!["http://a/", "http://b/"]);

        breaker.cleanup_endpoint("http://a/");
        assert_eq!(breaker.active_endpoints(), vec!["http://b/"]);
    }

    #[test]
    fn stats_reports_open_entries() {
        let breaker = test_breaker(Duration::from_secs(30));
        for _ in 0..3 {
            breaker.record_failure("http://a/");
        }
        breaker.record_failure("http://b/");
        let stats = breaker.stats();
        assert_eq!(stats.tracked_endpoints, 2);
        assert_eq!(stats.open_endpoints, vec!["http://a/"]);
    }
}
