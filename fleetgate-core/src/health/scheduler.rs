//! # Health Scheduler and Worker Pool
//!
//! The control loop that keeps the fleet's health view fresh.
//!
//! ## Architecture
//!
//! - A **min-heap** of `(due_time, endpoint)` entries, guarded by a plain
//!   mutex that is only ever held to push or pop, never across I/O.
//! - A **scheduler task** ticking every 100 ms: pops everything that is due
//!   and pushes it onto a bounded job queue. If the queue is full the entry
//!   goes back on the heap one second in the future; the scheduler never
//!   blocks on the queue.
//! - A **worker pool** (default 10, fixed while running) consuming the
//!   queue. Each worker probes via the [`HealthClient`], applies backoff,
//!   writes the endpoint back and reschedules it.
//! - A **cleanup sweep** every 5 minutes that drops circuit-breaker and
//!   status-tracker state for URLs no longer in the repository.
//!
//! ## Backoff
//!
//! [`calculate_backoff`] implements the probe interval policy: success
//! resets to the configured interval, the first failure keeps the normal
//! interval while arming a 2x multiplier, and every further failure doubles
//! the multiplier up to a cap, with the interval itself capped at
//! `max_backoff`.
//!
//! ## Recovery notifications
//!
//! Subscribers registered with
//! [`add_recovery_listener`](HealthMonitor::add_recovery_listener) are told
//! when an endpoint transitions `Unknown -> Healthy` or
//! `(Unhealthy|Offline|Busy) -> Healthy`. Each notification runs on its own
//! spawned task so a slow subscriber can never stall the worker loop;
//! subscriber errors are logged and dropped.

use crate::circuit_breaker::BreakerStats;
use crate::endpoint::{Endpoint, EndpointStatus};
use crate::health::client::HealthClient;
use crate::repository::EndpointRepository;
use crate::status_tracker::{StatusTransitionTracker, TrackerStats};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Scheduler and worker pool tuning.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Fixed worker count; cannot change while running
    pub worker_count: usize,
    /// Lower bound on the job queue capacity
    pub base_queue_size: usize,
    /// Queue capacity is `max(base_queue_size, endpoints * scale_factor)`
    pub queue_scale_factor: usize,
    /// Scheduler tick
    pub check_tick: Duration,
    /// How far to push an entry back when the queue is full
    pub requeue_delay: Duration,
    /// Cleanup sweep cadence
    pub cleanup_interval: Duration,
    /// Hard cap on the probe interval under backoff
    pub max_backoff: Duration,
    /// Hard cap on the backoff multiplier
    pub max_backoff_multiplier: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            base_queue_size: 50,
            queue_scale_factor: 2,
            check_tick: Duration::from_millis(100),
            requeue_delay: Duration::from_secs(1),
            cleanup_interval: Duration::from_secs(300),
            max_backoff: Duration::from_secs(60),
            max_backoff_multiplier: 16,
        }
    }
}

/// Probe interval policy.
///
/// Returns `(next_interval, next_multiplier)`:
/// - success: `(check_interval, 1)`
/// - first failure (multiplier <= 1): `(check_interval, 2)`; the first miss
///   keeps the normal cadence
/// - later failures: `(check_interval * multiplier, min(multiplier * 2, cap))`
///   with the interval capped at `max_backoff`
pub fn calculate_backoff(
    check_interval: Duration,
    multiplier: u32,
    success: bool,
    max_backoff: Duration,
    max_multiplier: u32,
) -> (Duration, u32) {
    if success {
        return (check_interval, 1);
    }
    if multiplier <= 1 {
        return (check_interval, 2);
    }
    let interval = check_interval
        .saturating_mul(multiplier)
        .min(max_backoff);
    (interval, (multiplier.saturating_mul(2)).min(max_multiplier))
}

/// Subscriber for endpoint recovery events.
#[async_trait]
pub trait RecoveryListener: Send + Sync {
    async fn on_endpoint_recovered(&self, endpoint: Endpoint) -> anyhow::Result<()>;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HealthMonitorError {
    #[error("health monitor is not running")]
    NotRunning,
    #[error("health monitor is already running")]
    AlreadyRunning,
    #[error("health check queue is full")]
    QueueFull,
}

/// Heap entry; ordered so `BinaryHeap` pops the earliest due time first.
struct ScheduledCheck {
    due: Instant,
    endpoint: Endpoint,
}

impl PartialEq for ScheduledCheck {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}
impl Eq for ScheduledCheck {}
impl PartialOrd for ScheduledCheck {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledCheck {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // reversed: the heap is a max-heap, we want the earliest due time on top
        other.due.cmp(&self.due)
    }
}

struct HealthJob {
    endpoint: Endpoint,
}

/// Operational stats surfaced over the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub worker_count: usize,
    pub queue_size: usize,
    pub queue_cap: usize,
    pub queue_usage: f64,
    pub scheduled_checks: usize,
    #[serde(with = "crate::duration_serde")]
    pub check_interval: Duration,
    pub circuit_breaker: BreakerStats,
    pub status_tracker: TrackerStats,
}

/// Everything the spawned tasks share.
struct MonitorInner {
    repository: Arc<dyn EndpointRepository>,
    client: Arc<HealthClient>,
    tracker: Arc<StatusTransitionTracker>,
    config: HealthMonitorConfig,
    heap: Mutex<BinaryHeap<ScheduledCheck>>,
    listeners: Mutex<Vec<Arc<dyn RecoveryListener>>>,
    cancel: CancellationToken,
}

impl MonitorInner {
    fn schedule(&self, endpoint: Endpoint, due: Instant) {
        self.heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ScheduledCheck { due, endpoint });
    }

    fn pop_due(&self, now: Instant) -> Option<ScheduledCheck> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        if heap.peek().is_some_and(|entry| entry.due <= now) {
            heap.pop()
        } else {
            None
        }
    }

    /// One probe outcome, start to finish.
    async fn process(&self, mut endpoint: Endpoint) {
        let previous = endpoint.status;
        let result = self.client.probe(&endpoint, &self.cancel).await;
        let success = result.is_success();

        endpoint.status = result.status;
        endpoint.last_checked = Some(Utc::now());
        endpoint.last_latency = Some(result.latency);

        let (next_interval, next_multiplier) = calculate_backoff(
            endpoint.check_interval,
            endpoint.backoff_multiplier,
            success,
            self.config.max_backoff,
            self.config.max_backoff_multiplier,
        );
        if success {
            endpoint.consecutive_failures = 0;
        } else {
            endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
        }
        endpoint.backoff_multiplier = next_multiplier;
        endpoint.next_check_time =
            Some(Utc::now() + chrono::Duration::from_std(next_interval).unwrap_or_default());

        // The endpoint may have been removed by a config reload while the
        // probe was in flight; never resurrect it.
        if !self.repository.exists(endpoint.url_str()) {
            tracing::debug!(
                endpoint = %endpoint.name,
                url = endpoint.url_str(),
                "endpoint left the fleet mid-probe, dropping result"
            );
            return;
        }
        if self.repository.update_endpoint(&endpoint).is_err() {
            return;
        }

        // Only a persisted outcome earns a reschedule; dropped endpoints
        // fall out of the loop here.
        self.schedule(endpoint.clone(), Instant::now() + next_interval);

        let (emit, error_count) =
            self.tracker
                .should_log(endpoint.url_str(), endpoint.status, !success);
        if emit {
            if endpoint.status == EndpointStatus::Healthy || previous == EndpointStatus::Unknown {
                tracing::info!(
                    endpoint = %endpoint.name,
                    url = endpoint.url_str(),
                    from = %previous,
                    to = %endpoint.status,
                    latency_ms = result.latency.as_millis() as u64,
                    "endpoint status changed"
                );
            } else {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    url = endpoint.url_str(),
                    status = %endpoint.status,
                    consecutive_failures = endpoint.consecutive_failures,
                    error_streak = error_count,
                    latency_ms = result.latency.as_millis() as u64,
                    next_check_in = ?next_interval,
                    error = result.error.as_deref().unwrap_or(""),
                    "endpoint health issues"
                );
            }
        }

        let recovered = endpoint.status == EndpointStatus::Healthy
            && matches!(
                previous,
                EndpointStatus::Unknown
                    | EndpointStatus::Unhealthy
                    | EndpointStatus::Offline
                    | EndpointStatus::Busy
            );
        if recovered {
            self.notify_recovered(&endpoint);
        }
    }

    fn notify_recovered(&self, endpoint: &Endpoint) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                if let Err(err) = listener.on_endpoint_recovered(endpoint.clone()).await {
                    tracing::warn!(
                        endpoint = %endpoint.name,
                        url = endpoint.url_str(),
                        error = %err,
                        "recovery callback failed"
                    );
                }
            });
        }
    }

    async fn scheduler_loop(self: Arc<Self>, tx: mpsc::Sender<HealthJob>) {
        let mut tick = tokio::time::interval(self.config.check_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            let now = Instant::now();
            while let Some(check) = self.pop_due(now) {
                match tx.try_send(HealthJob {
                    endpoint: check.endpoint,
                }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(job)) => {
                        // never block the scheduler; try again in a second
                        self.schedule(job.endpoint, now + self.config.requeue_delay);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                }
            }
        }
    }

    async fn worker_loop(self: Arc<Self>, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<HealthJob>>>) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = self.cancel.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            match job {
                Some(job) => self.process(job.endpoint).await,
                None => break,
            }
        }
    }

    async fn cleanup_loop(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.config.cleanup_interval);
        tick.tick().await; // the first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            self.sweep_departed_endpoints();
        }
    }

    fn sweep_departed_endpoints(&self) {
        let known: HashSet<String> = self
            .repository
            .get_all()
            .into_iter()
            .map(|e| e.url_str().to_string())
            .collect();
        let breaker = self.client.breaker();
        for url in breaker.active_endpoints() {
            if !known.contains(&url) {
                breaker.cleanup_endpoint(&url);
                tracing::debug!(url = %url, "swept circuit breaker state for departed endpoint");
            }
        }
        for url in self.tracker.active_endpoints() {
            if !known.contains(&url) {
                self.tracker.cleanup_endpoint(&url);
            }
        }
    }
}

/// The health monitor: owns the scheduler task, the worker pool and the
/// cleanup sweep. Construct once, `start`, and `stop` on shutdown.
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
    job_tx: Mutex<Option<mpsc::Sender<HealthJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    queue_cap: std::sync::atomic::AtomicUsize,
}

impl HealthMonitor {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        client: Arc<HealthClient>,
        tracker: Arc<StatusTransitionTracker>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                repository,
                client,
                tracker,
                config,
                heap: Mutex::new(BinaryHeap::new()),
                listeners: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
            job_tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            queue_cap: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Register a recovery subscriber. May be called before or after `start`.
    pub fn add_recovery_listener(&self, listener: Arc<dyn RecoveryListener>) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Spawn the scheduler, workers and cleanup sweep, and seed the heap
    /// with one immediate check per configured endpoint.
    ///
    /// Queue capacity and worker count are fixed here and do not change
    /// until the monitor is stopped.
    pub fn start(&self) -> Result<(), HealthMonitorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(HealthMonitorError::AlreadyRunning);
        }

        let endpoints = self.inner.repository.get_all();
        let queue_cap = self
            .inner
            .config
            .base_queue_size
            .max(endpoints.len() * self.inner.config.queue_scale_factor)
            .max(1);
        self.queue_cap.store(queue_cap, Ordering::Release);

        let (tx, rx) = mpsc::channel::<HealthJob>(queue_cap);
        *self.job_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());

        let now = Instant::now();
        for endpoint in endpoints {
            self.inner.schedule(endpoint, now);
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.push(tokio::spawn(self.inner.clone().scheduler_loop(tx)));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..self.inner.config.worker_count {
            handles.push(tokio::spawn(self.inner.clone().worker_loop(rx.clone())));
        }
        handles.push(tokio::spawn(self.inner.clone().cleanup_loop()));

        tracing::info!(
            workers = self.inner.config.worker_count,
            queue_cap,
            "health monitor started"
        );
        Ok(())
    }

    /// Cancel every task and wait for the pool to drain.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.cancel.cancel();
        *self.job_tx.lock().unwrap_or_else(|e| e.into_inner()) = None;
        let handles: Vec<JoinHandle<()>> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("health monitor stopped");
    }

    /// Enqueue an immediate probe for every known endpoint, failing fast if
    /// the queue cannot take them all.
    pub fn force_check(&self) -> Result<usize, HealthMonitorError> {
        let tx = self
            .job_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(HealthMonitorError::NotRunning)?;
        let mut enqueued = 0;
        for endpoint in self.inner.repository.get_all() {
            tx.try_send(HealthJob { endpoint })
                .map_err(|_| HealthMonitorError::QueueFull)?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        let queue_cap = self.queue_cap.load(Ordering::Acquire);
        let queue_size = self
            .job_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|tx| queue_cap.saturating_sub(tx.capacity()))
            .unwrap_or(0);
        let scheduled_checks = self
            .inner
            .heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        SchedulerStats {
            running: self.running.load(Ordering::Acquire),
            worker_count: self.inner.config.worker_count,
            queue_size,
            queue_cap,
            queue_usage: if queue_cap > 0 {
                queue_size as f64 / queue_cap as f64
            } else {
                0.0
            },
            scheduled_checks,
            check_interval: self.inner.config.check_tick,
            circuit_breaker: self.inner.client.breaker().stats(),
            status_tracker: self.inner.tracker.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::EndpointCircuitBreaker;
    use crate::health::client::{
        HealthClientConfig, ProbeRequest, ProbeResponse, ProbeTransport, TransportError,
    };
    use crate::repository::InMemoryEndpointRepository;
    use crate::status_tracker::TrackerConfig;
    use std::sync::atomic::AtomicU32;

    const MAX_BACKOFF: Duration = Duration::from_secs(60);
    const MAX_MULTIPLIER: u32 = 16;

    #[test]
    fn backoff_success_resets() {
        let (interval, multiplier) = calculate_backoff(
            Duration::from_secs(5),
            8,
            true,
            MAX_BACKOFF,
            MAX_MULTIPLIER,
        );
        assert_eq!(interval, Duration::from_secs(5));
        assert_eq!(multiplier, 1);
        // idempotent under repeated success
        let again = calculate_backoff(Duration::from_secs(5), 1, true, MAX_BACKOFF, MAX_MULTIPLIER);
        assert_eq!(again, (Duration::from_secs(5), 1));
    }

    #[test]
    fn backoff_progression_under_repeated_failure() {
        let base = Duration::from_secs(5);
        let mut multiplier = 1;
        let mut seen = Vec::new();
        for _ in 0..5 {
            let (interval, next) =
                calculate_backoff(base, multiplier, false, MAX_BACKOFF, MAX_MULTIPLIER);
            seen.push((interval.as_secs(), next));
            multiplier = next;
        }
        assert_eq!(
            seen,
            vec![(5, 2), (10, 4), (20, 8), (40, 16), (60, 16)],
        );
        // recovery snaps straight back
        let (interval, next) =
            calculate_backoff(base, multiplier, true, MAX_BACKOFF, MAX_MULTIPLIER);
        assert_eq!((interval, next), (Duration::from_secs(5), 1));
    }

    #[test]
    fn backoff_interval_is_non_decreasing_under_failure() {
        let base = Duration::from_secs(3);
        let mut multiplier = 1;
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            let (interval, next) =
                calculate_backoff(base, multiplier, false, MAX_BACKOFF, MAX_MULTIPLIER);
            assert!(interval >= last);
            assert!((1..=MAX_MULTIPLIER).contains(&next));
            last = interval;
            multiplier = next;
        }
    }

    struct FixedTransport {
        status_code: u16,
        fail: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ProbeTransport for FixedTransport {
        async fn execute(&self, _request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TransportError::Network("down".into()))
            } else {
                Ok(ProbeResponse {
                    status_code: self.status_code,
                })
            }
        }
    }

    fn fast_config(workers: usize) -> HealthMonitorConfig {
        HealthMonitorConfig {
            worker_count: workers,
            base_queue_size: 8,
            queue_scale_factor: 2,
            check_tick: Duration::from_millis(10),
            requeue_delay: Duration::from_millis(50),
            cleanup_interval: Duration::from_secs(300),
            max_backoff: MAX_BACKOFF,
            max_backoff_multiplier: MAX_MULTIPLIER,
        }
    }

    fn monitor_with(
        transport: Arc<dyn ProbeTransport>,
        repo: Arc<InMemoryEndpointRepository>,
        config: HealthMonitorConfig,
    ) -> HealthMonitor {
        let breaker = Arc::new(EndpointCircuitBreaker::default());
        let mut client_config = HealthClientConfig::default();
        client_config.retry_base_delay = Duration::from_millis(1);
        client_config.retry_max_delay = Duration::from_millis(5);
        let client = Arc::new(HealthClient::new(transport, breaker, client_config));
        let tracker = Arc::new(StatusTransitionTracker::new(TrackerConfig::default()));
        HealthMonitor::new(repo, client, tracker, config)
    }

    fn seeded_repo(urls: &[&str]) -> Arc<InMemoryEndpointRepository> {
        let repo = Arc::new(InMemoryEndpointRepository::new());
        let endpoints = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                let mut e = Endpoint::new(format!("e{i}"), url.parse().unwrap(), "ollama");
                e.check_interval = Duration::from_millis(30);
                e.check_timeout = Duration::from_millis(200);
                e
            })
            .collect();
        repo.replace_all(endpoints);
        repo
    }

    #[tokio::test]
    async fn probes_mark_endpoints_healthy_and_reschedule() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport.clone(), repo.clone(), fast_config(2));
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.stop().await;

        let endpoint = repo.get_all().remove(0);
        assert_eq!(endpoint.status, EndpointStatus::Healthy);
        assert_eq!(endpoint.backoff_multiplier, 1);
        assert_eq!(endpoint.consecutive_failures, 0);
        let checked = endpoint.last_checked.unwrap();
        assert!(endpoint.next_check_time.unwrap() > checked);
        // rescheduling happened: more than one probe fit in the window
        assert!(transport.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn failing_endpoint_backs_off_and_goes_offline() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 0,
            fail: true,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo.clone(), fast_config(2));
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        monitor.stop().await;

        let endpoint = repo.get_all().remove(0);
        assert_eq!(endpoint.status, EndpointStatus::Offline);
        assert!(endpoint.consecutive_failures >= 1);
        assert!((1..=MAX_MULTIPLIER).contains(&endpoint.backoff_multiplier));
        assert!(endpoint.backoff_multiplier >= 2);
        assert!(endpoint.next_check_time.unwrap() > endpoint.last_checked.unwrap());
    }

    #[tokio::test]
    async fn removed_endpoint_is_not_written_back() {
        let repo = seeded_repo(&["http://a:11434", "http://b:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo.clone(), fast_config(2));
        monitor.start().unwrap();

        // drop b while probes are in flight
        let keep: Vec<Endpoint> = repo
            .get_all()
            .into_iter()
            .filter(|e| e.name == "e0")
            .collect();
        repo.replace_all(keep);

        tokio::time::sleep(Duration::from_millis(150)).await;
        monitor.stop().await;

        assert_eq!(repo.get_all().len(), 1);
        assert!(!repo.exists("http://b:11434/"));
    }

    #[tokio::test]
    async fn force_check_fails_fast_on_full_queue() {
        let repo = seeded_repo(&["http://a:11434", "http://b:11434", "http://c:11434"]);
        let mut config = fast_config(0); // no workers: nothing drains the queue
        config.base_queue_size = 1;
        config.queue_scale_factor = 0;
        config.check_tick = Duration::from_secs(3600); // keep the scheduler out of the queue
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo, config);
        monitor.start().unwrap();

        assert_eq!(monitor.force_check(), Err(HealthMonitorError::QueueFull));
        monitor.stop().await;
    }

    #[tokio::test]
    async fn force_check_requires_running_monitor() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo, fast_config(1));
        assert_eq!(monitor.force_check(), Err(HealthMonitorError::NotRunning));
    }

    struct RecordingListener {
        recovered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RecoveryListener for RecordingListener {
        async fn on_endpoint_recovered(&self, endpoint: Endpoint) -> anyhow::Result<()> {
            self.recovered
                .lock()
                .unwrap()
                .push(endpoint.url_str().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn recovery_listener_fires_on_unknown_to_healthy() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo, fast_config(1));
        let listener = Arc::new(RecordingListener {
            recovered: Mutex::new(Vec::new()),
        });
        monitor.add_recovery_listener(listener.clone());
        monitor.start().unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await;

        let recovered = listener.recovered.lock().unwrap();
        assert!(recovered.contains(&"http://a:11434/".to_string()));
        // only the Unknown -> Healthy edge fires, not every healthy probe
        assert_eq!(recovered.len(), 1);
    }

    #[tokio::test]
    async fn scheduler_stats_shape() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo, fast_config(2));
        monitor.start().unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let stats = monitor.scheduler_stats();
        assert!(stats.running);
        assert_eq!(stats.worker_count, 2);
        assert!(stats.queue_cap >= 8);
        assert!(stats.queue_usage >= 0.0 && stats.queue_usage <= 1.0);

        monitor.stop().await;
        assert!(!monitor.scheduler_stats().running);
    }

    #[tokio::test]
    async fn cleanup_sweep_purges_departed_urls() {
        let repo = seeded_repo(&["http://a:11434"]);
        let transport = Arc::new(FixedTransport {
            status_code: 200,
            fail: false,
            calls: AtomicU32::new(0),
        });
        let monitor = monitor_with(transport, repo.clone(), fast_config(1));

        // state for an endpoint that is not in the repository
        monitor
            .inner
            .client
            .breaker()
            .record_failure("http://gone:11434/");
        monitor
            .inner
            .tracker
            .should_log("http://gone:11434/", EndpointStatus::Offline, true);

        monitor.inner.sweep_departed_endpoints();
        assert!(monitor.inner.client.breaker().active_endpoints().is_empty());
        assert!(monitor.inner.tracker.active_endpoints().is_empty());
    }
}
