//! # Endpoint Health Subsystem
//!
//! Continuous health probing for the backend fleet. Two halves:
//!
//! - [`client`]: the single-shot probe. Issues one HTTP GET against an
//!   endpoint's health URL (with retries, jitter and a panic guard),
//!   classifies the outcome, and feeds the circuit breaker.
//! - [`scheduler`]: the control loop. A min-heap of due times drives a
//!   bounded job queue consumed by a worker pool; workers probe, apply
//!   exponential backoff, write the endpoint back and reschedule.
//!
//! Probe outcomes never surface as errors to routing callers; they fold into
//! each endpoint's observable [`EndpointStatus`](crate::endpoint::EndpointStatus).

pub mod client;
pub mod scheduler;

pub use client::{HealthClient, HealthClientConfig, ProbeTransport, ReqwestTransport};
pub use scheduler::{
    calculate_backoff, HealthMonitor, HealthMonitorConfig, HealthMonitorError, RecoveryListener,
    SchedulerStats,
};

use crate::endpoint::EndpointStatus;
use serde::Serialize;
use std::time::Duration;

/// Classification of a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// Connection refused/reset, DNS failure, cancelled mid-I/O
    Network,
    /// The attempt exceeded the endpoint's check timeout
    Timeout,
    /// The transport produced a response-level error (malformed reply,
    /// protocol violation); distinct from a clean non-2xx status
    Http,
    /// The circuit breaker short-circuited the probe; no network call made
    CircuitOpen,
}

/// Outcome of one health probe (spanning all retry attempts).
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    /// Status the endpoint should transition to
    pub status: EndpointStatus,
    /// Wall time from first attempt to final outcome
    #[serde(with = "crate::duration_serde")]
    pub latency: Duration,
    /// HTTP status of the final attempt, when a response arrived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Human-readable failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProbeErrorKind>,
}

impl HealthCheckResult {
    /// A probe counts as successful when a 2xx response arrived. This is
    /// also the breaker's success criterion.
    pub fn is_success(&self) -> bool {
        self.error_kind.is_none() && self.status_code.is_some_and(|c| (200..300).contains(&c))
    }
}
