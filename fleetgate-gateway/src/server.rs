//! # HTTP Server Module
//!
//! Wires the core subsystems together and exposes them over axum. The
//! [`AppState`] built here owns the whole runtime: the endpoint repository
//! seeded from configuration, the health monitor and its worker pool, the
//! unified registry fed by the catalog poller, and the configured selector.
//!
//! ## Startup sequence
//!
//! 1. Seed the repository with the configured fleet.
//! 2. Build the health client (reqwest transport + circuit breaker) and
//!    start the monitor.
//! 3. Build the unified registry and start the catalog poller.
//! 4. Resolve the selector strategy through the factory.
//! 5. Hand the router to axum; shutdown cancels the shared token, stops the
//!    monitor and waits for the workers to drain.

use crate::config::Config;
use crate::discovery::CatalogPoller;
use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use fleetgate_core::balancer::{EndpointSelector, SelectorFactory};
use fleetgate_core::circuit_breaker::{BreakerConfig, EndpointCircuitBreaker};
use fleetgate_core::connection_stats::ConnectionTracker;
use fleetgate_core::health::{HealthClient, HealthClientConfig, HealthMonitor, HealthMonitorConfig, ReqwestTransport};
use fleetgate_core::registry::{ModelRegistry, ModelUnifier, UnifiedRegistry};
use fleetgate_core::repository::InMemoryEndpointRepository;
use fleetgate_core::routing::StrictRoutingStrategy;
use fleetgate_core::status_tracker::{StatusTransitionTracker, TrackerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub repository: Arc<InMemoryEndpointRepository>,
    pub registry: Arc<UnifiedRegistry>,
    pub selector: Arc<dyn EndpointSelector>,
    pub monitor: Arc<HealthMonitor>,
    pub connection_stats: Arc<ConnectionTracker>,
    pub http: reqwest::Client,
}

/// Build the full application state from configuration. Nothing is spawned
/// yet; `start_background` does that.
pub fn build_state(config: Config) -> anyhow::Result<AppState> {
    let endpoints = config.to_endpoints()?;

    let repository = Arc::new(InMemoryEndpointRepository::new());
    repository.replace_all(endpoints);

    let breaker = Arc::new(EndpointCircuitBreaker::new(BreakerConfig::default()));
    let transport = Arc::new(ReqwestTransport::new()?);
    let client = Arc::new(HealthClient::new(
        transport,
        breaker,
        HealthClientConfig::default(),
    ));
    let tracker = Arc::new(StatusTransitionTracker::new(TrackerConfig::default()));
    let monitor_config = HealthMonitorConfig {
        worker_count: config.health.worker_count,
        base_queue_size: config.health.base_queue_size,
        queue_scale_factor: config.health.queue_scale_factor,
        max_backoff: config.health.max_backoff,
        max_backoff_multiplier: config.health.max_backoff_multiplier,
        ..HealthMonitorConfig::default()
    };
    let monitor = Arc::new(HealthMonitor::new(
        repository.clone(),
        client,
        tracker,
        monitor_config,
    ));

    let registry = Arc::new(UnifiedRegistry::new(
        ModelRegistry::new(),
        ModelUnifier::default(),
        Arc::new(StrictRoutingStrategy),
    ));

    let connection_stats = Arc::new(ConnectionTracker::new());
    let factory = SelectorFactory::with_defaults(connection_stats.clone());
    let selector = factory
        .create(&config.proxy.strategy)
        .map_err(|e| anyhow::anyhow!("cannot build selector: {e}"))?;

    Ok(AppState {
        config: Arc::new(config),
        repository,
        registry,
        selector,
        monitor,
        connection_stats,
        http: reqwest::Client::new(),
    })
}

/// Start the health monitor and the catalog poller.
pub fn start_background(state: &AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    state
        .monitor
        .start()
        .map_err(|e| anyhow::anyhow!("cannot start health monitor: {e}"))?;
    let poller = CatalogPoller::new(
        state.repository.clone(),
        state.registry.clone(),
        state.http.clone(),
        state.config.discovery.interval,
    );
    poller.spawn(cancel);
    Ok(())
}

/// The route table.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.server.request_timeout;
    Router::new()
        .route("/api/v1/proxy/{*path}", post(handlers::proxy))
        .route("/internal/health", get(handlers::health))
        .route("/internal/status", get(handlers::status))
        .route("/internal/status/models", get(handlers::status_models))
        .route("/internal/status/endpoints", get(handlers::status_endpoints))
        .route("/internal/health/check", post(handlers::force_check))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Run until ctrl-c, then drain the background tasks.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = build_state(config)?;
    let cancel = CancellationToken::new();
    start_background(&state, cancel.clone())?;

    let addr: SocketAddr = format!("{}:{}", state.config.server.host, state.config.server.port)
        .parse()?;
    let monitor = state.monitor.clone();
    let app = create_router(state);

    tracing::info!(%addr, "fleetgate listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    cancel.cancel();
    monitor.stop().await;
    Ok(())
}
