//! # Endpoint Types
//!
//! This module defines the core endpoint data structures for the Fleetgate proxy.
//! An endpoint is a single backend inference server (Ollama, LM Studio, vLLM,
//! llama.cpp, or anything else that answers HTTP) identified by its absolute URL.
//!
//! ## Overview
//!
//! The endpoint module provides:
//! - **EndpointStatus**: The observable health state of a backend
//! - **Routability**: Which states the load balancer may send traffic to
//! - **Traffic Weights**: Per-status weighting used by the priority selector
//! - **Endpoint**: The full backend record mutated by the health worker
//!
//! ## Status Model
//!
//! Endpoints move through six states. `Unknown` is the initial state before the
//! first probe completes. `Healthy`, `Busy` and `Warming` are routable with
//! decreasing traffic weight; `Unhealthy` and `Offline` take no traffic.
//!
//! ```rust
//! use fleetgate_core::endpoint::EndpointStatus;
//!
//! assert!(EndpointStatus::Busy.is_routable());
//! assert!(!EndpointStatus::Offline.is_routable());
//! assert_eq!(EndpointStatus::Healthy.traffic_weight(), 1.0);
//! ```

use crate::duration_serde;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Observable health state of a backend endpoint.
///
/// Transitions are driven exclusively by the health worker; nothing else
/// writes endpoint status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EndpointStatus {
    /// Not probed yet
    #[default]
    Unknown,
    /// Responding normally
    Healthy,
    /// Responding, but slowly (saturated or mid-inference)
    Busy,
    /// Starting up or loading models
    Warming,
    /// Reachable but returning errors
    Unhealthy,
    /// Unreachable, timed out, or circuit-broken
    Offline,
}

impl EndpointStatus {
    /// Whether the load balancer may send traffic to an endpoint in this state.
    ///
    /// Routable states are exactly `Healthy`, `Busy` and `Warming`.
    pub fn is_routable(&self) -> bool {
        matches!(
            self,
            EndpointStatus::Healthy | EndpointStatus::Busy | EndpointStatus::Warming
        )
    }

    /// Static weight in `[0, 1]` used for weighted selection within a
    /// priority tier. Non-routable states weigh zero.
    pub fn traffic_weight(&self) -> f64 {
        match self {
            EndpointStatus::Healthy => 1.0,
            EndpointStatus::Busy => 0.3,
            EndpointStatus::Warming => 0.1,
            EndpointStatus::Unknown | EndpointStatus::Unhealthy | EndpointStatus::Offline => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointStatus::Unknown => "unknown",
            EndpointStatus::Healthy => "healthy",
            EndpointStatus::Busy => "busy",
            EndpointStatus::Warming => "warming",
            EndpointStatus::Unhealthy => "unhealthy",
            EndpointStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for EndpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single backend inference server.
///
/// Identity is the absolute `url`; two endpoints with the same URL are the
/// same endpoint. Created from configuration, mutated by the health worker on
/// each probe completion, destroyed on config reload.
///
/// # Example
///
/// ```rust
/// use fleetgate_core::endpoint::Endpoint;
///
/// let endpoint = Endpoint::new(
///     "local-ollama",
///     "http://localhost:11434".parse().unwrap(),
///     "ollama",
/// );
/// assert_eq!(endpoint.priority, 100);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Human-readable label used in logs and status payloads
    pub name: String,
    /// Absolute base URL; the endpoint's identity
    pub url: Url,
    /// URL probed by the health checker
    pub health_check_url: Url,
    /// Catalog dialect tag consumed by the model unifier
    /// ("ollama", "lmstudio", "vllm", "openai")
    pub provider: String,
    /// Higher wins; endpoints compete within their top priority tier
    pub priority: u32,
    /// Current observed health state
    pub status: EndpointStatus,
    /// Base interval between health probes
    #[serde(with = "duration_serde")]
    pub check_interval: Duration,
    /// Per-probe-attempt timeout
    #[serde(with = "duration_serde")]
    pub check_timeout: Duration,
    /// When the last probe finished
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
    /// Total latency of the last probe (spans retries)
    #[serde(with = "duration_serde::option", default)]
    pub last_latency: Option<Duration>,
    /// When the next probe is due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_check_time: Option<DateTime<Utc>>,
    /// Probe failures since the last success
    pub consecutive_failures: u32,
    /// Backoff factor applied to `check_interval` after failures; always >= 1
    pub backoff_multiplier: u32,
}

impl Endpoint {
    pub const DEFAULT_PRIORITY: u32 = 100;
    pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
    pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

    /// Create an endpoint with default probe settings. The health check URL
    /// defaults to the base URL itself; most backends answer `GET /` cheaply.
    pub fn new(name: impl Into<String>, url: Url, provider: impl Into<String>) -> Self {
        let health_check_url = url.clone();
        Self {
            name: name.into(),
            url,
            health_check_url,
            provider: provider.into(),
            priority: Self::DEFAULT_PRIORITY,
            status: EndpointStatus::Unknown,
            check_interval: Self::DEFAULT_CHECK_INTERVAL,
            check_timeout: Self::DEFAULT_CHECK_TIMEOUT,
            last_checked: None,
            last_latency: None,
            next_check_time: None,
            consecutive_failures: 0,
            backoff_multiplier: 1,
        }
    }

    /// Canonical identity string used as the key in every per-endpoint map
    /// (repository, breaker, tracker, connection stats, registry).
    pub fn url_str(&self) -> &str {
        self.url.as_str()
    }
}
