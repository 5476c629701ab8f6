//! # Health Client
//!
//! The single-shot probe. Given an endpoint, performs one HTTP GET against
//! its health URL and classifies the outcome into a
//! [`HealthCheckResult`]. The worker pool drives this; nothing else issues
//! health traffic.
//!
//! ## Probe procedure
//!
//! 1. If the circuit breaker is open for the endpoint, return an `Offline`
//!    result immediately; no network call is made.
//! 2. Otherwise GET the health URL with the endpoint's check timeout and the
//!    standard probe headers. The body is drained so the connection can be
//!    reused.
//! 3. Transient failures (network, timeout) are retried up to two extra
//!    times with exponential backoff (100 ms doubling, capped at 2 s) and
//!    25 % jitter. Cancellation aborts the retry loop between attempts.
//! 4. The reported latency spans all attempts.
//! 5. The breaker is fed exactly once, on the final outcome.
//! 6. A panic anywhere in the transport is caught and converted to a
//!    synthetic `Offline` result; probes must never take a worker down.
//!
//! ## Status mapping
//!
//! 2xx within 10 s → `Healthy`; 2xx slower than 10 s → `Busy`; non-2xx →
//! `Unhealthy` (or `Busy` when the endpoint is also slow); network/timeout/
//! circuit-open → `Offline`.

use super::{HealthCheckResult, ProbeErrorKind};
use crate::circuit_breaker::EndpointCircuitBreaker;
use crate::endpoint::{Endpoint, EndpointStatus};
use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// An endpoint answering 2xx slower than this is `Busy`, not `Healthy`.
const BUSY_LATENCY_THRESHOLD: Duration = Duration::from_secs(10);

/// Transport-level probe failure, pre-classified by the transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("http error: {0}")]
    Http(String),
}

impl TransportError {
    fn kind(&self) -> ProbeErrorKind {
        match self {
            TransportError::Timeout => ProbeErrorKind::Timeout,
            TransportError::Network(_) => ProbeErrorKind::Network,
            TransportError::Http(_) => ProbeErrorKind::Http,
        }
    }
}

/// What one probe attempt sends.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: Url,
    pub timeout: Duration,
    pub user_agent: String,
}

/// What one probe attempt yields; the transport has already drained the body.
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub status_code: u16,
}

/// Abstraction over the HTTP client so probe behaviour is testable without
/// sockets. Implementations must honour the per-request timeout and abort
/// promptly on cancellation (dropping the future).
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError>;
}

/// Production transport over [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, reqwest::Error> {
        // timeouts are per-request; the builder only sets pooling behaviour
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self { client })
    }

    fn classify(err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() || err.is_request() {
            TransportError::Network(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

#[async_trait]
impl ProbeTransport for ReqwestTransport {
    async fn execute(&self, request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
        let response = self
            .client
            .get(request.url.clone())
            .timeout(request.timeout)
            .header("User-Agent", request.user_agent.clone())
            .header("Accept", "application/json, text/plain, */*")
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(|e| Self::classify(&e))?;

        let status_code = response.status().as_u16();
        // Drain the body so the pooled connection can be reused.
        let _ = response.bytes().await;
        Ok(ProbeResponse { status_code })
    }
}

/// Retry tuning for transient probe failures.
#[derive(Debug, Clone)]
pub struct HealthClientConfig {
    /// Extra attempts after the first (2 → at most 3 attempts total)
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Fractional jitter applied to each retry delay (0.25 → ±25 %)
    pub retry_jitter: f64,
    /// Goes into the User-Agent header
    pub user_agent: String,
}

impl Default for HealthClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(2),
            retry_jitter: 0.25,
            user_agent: format!("Fleetgate-HealthChecker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// The probe executor shared by all health workers.
pub struct HealthClient {
    transport: Arc<dyn ProbeTransport>,
    breaker: Arc<EndpointCircuitBreaker>,
    config: HealthClientConfig,
}

impl HealthClient {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        breaker: Arc<EndpointCircuitBreaker>,
        config: HealthClientConfig,
    ) -> Self {
        Self {
            transport,
            breaker,
            config,
        }
    }

    pub fn breaker(&self) -> &Arc<EndpointCircuitBreaker> {
        &self.breaker
    }

    /// Run one probe against `endpoint`. Infallible by design: every failure
    /// mode folds into the returned result.
    pub async fn probe(&self, endpoint: &Endpoint, cancel: &CancellationToken) -> HealthCheckResult {
        let url = endpoint.url_str();

        if self.breaker.is_open(url) {
            return HealthCheckResult {
                status: EndpointStatus::Offline,
                latency: Duration::ZERO,
                status_code: None,
                error: Some("circuit breaker open".to_string()),
                error_kind: Some(ProbeErrorKind::CircuitOpen),
            };
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;
        let result = loop {
            match self.attempt_once(endpoint).await {
                Ok(response) => {
                    let latency = started.elapsed();
                    break self.classify_response(response.status_code, latency);
                }
                Err(err) => {
                    let retryable = matches!(
                        err.kind(),
                        ProbeErrorKind::Network | ProbeErrorKind::Timeout
                    );
                    if retryable && attempt < self.config.max_retries && !cancel.is_cancelled() {
                        let delay = self.retry_delay(attempt);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {
                                attempt += 1;
                                continue;
                            }
                            _ = cancel.cancelled() => {}
                        }
                    }
                    let latency = started.elapsed();
                    break self.classify_error(err, latency);
                }
            }
        };

        // Feed the breaker exactly once, on the final outcome.
        if result.is_success() {
            self.breaker.record_success(url);
        } else {
            self.breaker.record_failure(url);
        }
        result
    }

    /// One attempt with a panic guard around the transport.
    async fn attempt_once(&self, endpoint: &Endpoint) -> Result<ProbeResponse, TransportError> {
        let request = ProbeRequest {
            url: endpoint.health_check_url.clone(),
            timeout: endpoint.check_timeout,
            user_agent: self.config.user_agent.clone(),
        };
        let fut = self.transport.execute(request);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(
                    endpoint = %endpoint.name,
                    url = endpoint.url_str(),
                    "health probe panicked"
                );
                Err(TransportError::Network("probe panicked".to_string()))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.config.retry_max_delay.as_secs_f64());
        let jitter = self.config.retry_jitter;
        let factor = rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter);
        Duration::from_secs_f64(capped * factor)
    }

    fn classify_response(&self, status_code: u16, latency: Duration) -> HealthCheckResult {
        let slow = latency > BUSY_LATENCY_THRESHOLD;
        let ok = (200..300).contains(&status_code);
        let status = match (ok, slow) {
            (true, false) => EndpointStatus::Healthy,
            (true, true) | (false, true) => EndpointStatus::Busy,
            (false, false) => EndpointStatus::Unhealthy,
        };
        HealthCheckResult {
            status,
            latency,
            status_code: Some(status_code),
            error: (!ok).then(|| format!("unexpected status code {status_code}")),
            error_kind: None,
        }
    }

    fn classify_error(&self, err: TransportError, latency: Duration) -> HealthCheckResult {
        let kind = err.kind();
        let status = match kind {
            ProbeErrorKind::Network | ProbeErrorKind::Timeout | ProbeErrorKind::CircuitOpen => {
                EndpointStatus::Offline
            }
            ProbeErrorKind::Http => EndpointStatus::Unhealthy,
        };
        HealthCheckResult {
            status,
            latency,
            status_code: None,
            error: Some(err.to_string()),
            error_kind: Some(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoint_for(url: &str) -> Endpoint {
        let mut e = Endpoint::new("probe-target", url.parse().unwrap(), "ollama");
        e.check_timeout = Duration::from_millis(500);
        e
    }

    fn client_with(transport: Arc<dyn ProbeTransport>) -> HealthClient {
        let mut config = HealthClientConfig::default();
        config.retry_base_delay = Duration::from_millis(5);
        config.retry_max_delay = Duration::from_millis(20);
        HealthClient::new(
            transport,
            Arc::new(EndpointCircuitBreaker::default()),
            config,
        )
    }

    struct ScriptedTransport {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    #[async_trait]
    impl ProbeTransport for ScriptedTransport {
        async fn execute(&self, _request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(TransportError::Network("connection refused".into()))
            } else {
                Ok(ProbeResponse { status_code: 200 })
            }
        }
    }

    struct PanickingTransport;

    #[async_trait]
    impl ProbeTransport for PanickingTransport {
        async fn execute(&self, _request: ProbeRequest) -> Result<ProbeResponse, TransportError> {
            panic!("transport blew up");
        }
    }

    #[tokio::test]
    async fn healthy_endpoint_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Cache-Control", "no-cache"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = client_with(Arc::new(ReqwestTransport::new().unwrap()));
        let endpoint = endpoint_for(&server.uri());
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        assert_eq!(result.status, EndpointStatus::Healthy);
        assert_eq!(result.status_code, Some(200));
        assert!(result.is_success());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn server_error_maps_to_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = client_with(Arc::new(ReqwestTransport::new().unwrap()));
        let endpoint = endpoint_for(&server.uri());
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        assert_eq!(result.status, EndpointStatus::Unhealthy);
        assert_eq!(result.status_code, Some(500));
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn transient_network_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
        });
        let client = client_with(transport.clone());
        let endpoint = endpoint_for("http://10.255.0.1:11434");
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status, EndpointStatus::Healthy);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let transport = Arc::new(ScriptedTransport {
            calls: AtomicU32::new(0),
            failures_before_success: 10,
        });
        let client = client_with(transport.clone());
        let endpoint = endpoint_for("http://10.255.0.1:11434");
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        // 1 initial + 2 retries
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.status, EndpointStatus::Offline);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::Network));
    }

    #[tokio::test]
    async fn open_breaker_short_circuits() {
        let breaker = Arc::new(EndpointCircuitBreaker::new(BreakerConfig::default()));
        let endpoint = endpoint_for("http://10.255.0.1:11434");
        for _ in 0..3 {
            breaker.record_failure(endpoint.url_str());
        }

        let transport = Arc::new(ScriptedTransport {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
        });
        let client = HealthClient::new(
            transport.clone(),
            breaker,
            HealthClientConfig::default(),
        );
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.status, EndpointStatus::Offline);
        assert_eq!(result.error_kind, Some(ProbeErrorKind::CircuitOpen));
    }

    #[tokio::test]
    async fn panics_become_offline_results() {
        let client = client_with(Arc::new(PanickingTransport));
        let endpoint = endpoint_for("http://10.255.0.1:11434");
        let result = client.probe(&endpoint, &CancellationToken::new()).await;

        assert_eq!(result.status, EndpointStatus::Offline);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn breaker_records_final_outcome_once() {
        let breaker = Arc::new(EndpointCircuitBreaker::new(BreakerConfig {
            failure_threshold: 3,
            ..BreakerConfig::default()
        }));
        let transport = Arc::new(ScriptedTransport {
            calls: AtomicU32::new(0),
            failures_before_success: 10,
        });
        let mut config = HealthClientConfig::default();
        config.retry_base_delay = Duration::from_millis(1);
        let client = HealthClient::new(transport, breaker.clone(), config);
        let endpoint = endpoint_for("http://10.255.0.1:11434");

        // each probe makes 3 attempts but records one breaker failure
        client.probe(&endpoint, &CancellationToken::new()).await;
        assert!(!breaker.is_open(endpoint.url_str()));
        client.probe(&endpoint, &CancellationToken::new()).await;
        assert!(!breaker.is_open(endpoint.url_str()));
        client.probe(&endpoint, &CancellationToken::new()).await;
        assert!(breaker.is_open(endpoint.url_str()));
    }
}
