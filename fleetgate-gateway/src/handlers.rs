//! # HTTP Handlers
//!
//! The gateway's request surface:
//!
//! - `POST /api/v1/proxy/{*path}`: model-addressed dispatch. The `model`
//!   field of the JSON body picks the backend; the rest of the path is
//!   forwarded verbatim to whatever endpoint the selector lands on.
//! - `GET /internal/health`: liveness.
//! - `GET /internal/status`: scheduler, registry and unifier stats.
//! - `GET /internal/status/models`: the unified model catalog.
//! - `GET /internal/status/endpoints`: fleet snapshot with connection counts.
//! - `POST /internal/health/check`: force an immediate probe of the fleet.
//!
//! Routing rejections map onto the status codes clients can act on:
//! `model_not_found` → 404, `model_unavailable` → 503, with the considered
//! endpoints in the payload either way.

use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleetgate_core::error::{RoutingError, SelectionError};
use fleetgate_core::health::scheduler::HealthMonitorError;
use fleetgate_core::repository::EndpointRepository;
use serde_json::{json, Value};

/// Error envelope every failing handler answers with.
pub struct ApiError {
    status: StatusCode,
    body: Value,
}

impl ApiError {
    fn new(status: StatusCode, body: Value) -> Self {
        Self { status, body }
    }

    fn bad_request(message: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            json!({ "error": "bad_request", "message": message }),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<RoutingError> for ApiError {
    fn from(err: RoutingError) -> Self {
        let status = match &err {
            RoutingError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            RoutingError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        let considered = match &err {
            RoutingError::ModelUnavailable { considered, .. } => considered.clone(),
            RoutingError::ModelNotFound { .. } => Vec::new(),
        };
        Self::new(
            status,
            json!({
                "error": err.reason(),
                "strategy": err.strategy(),
                "message": err.to_string(),
                "considered_endpoints": considered,
            }),
        )
    }
}

impl From<SelectionError> for ApiError {
    fn from(err: SelectionError) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "no_endpoint_selected", "message": err.to_string() }),
        )
    }
}

/// Model-addressed proxy dispatch.
pub async fn proxy(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    let Some(model) = body.get("model").and_then(Value::as_str) else {
        return Err(ApiError::bad_request("request body must carry a model name"));
    };

    let request_id = uuid::Uuid::new_v4();
    let healthy = state.repository.get_healthy();
    let (candidates, decision) = state
        .registry
        .routable_endpoints_for_model(model, &healthy)
        .await?;
    let endpoint = state.selector.select(&candidates)?;
    tracing::debug!(
        %request_id,
        model,
        endpoint = %endpoint.name,
        reason = decision.reason,
        candidates = decision.candidate_count,
        "dispatching request"
    );

    let target = endpoint
        .url
        .join(path.trim_start_matches('/'))
        .map_err(|_| ApiError::bad_request("invalid proxy path"))?;

    state.selector.increment_connections(&endpoint);
    let outcome = state
        .http
        .post(target)
        .timeout(state.config.server.request_timeout)
        .json(&body)
        .send()
        .await;
    state.selector.decrement_connections(&endpoint);

    match outcome {
        Ok(upstream) => {
            let status = StatusCode::from_u16(upstream.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = upstream
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();
            let bytes = upstream.bytes().await.unwrap_or_default();
            Ok((
                status,
                [
                    ("content-type", content_type),
                    ("x-fleetgate-request-id", request_id.to_string()),
                    ("x-fleetgate-endpoint", endpoint.name.clone()),
                ],
                bytes,
            )
                .into_response())
        }
        Err(err) => {
            tracing::warn!(
                model,
                endpoint = %endpoint.name,
                error = %err,
                "upstream request failed"
            );
            Err(ApiError::new(
                StatusCode::BAD_GATEWAY,
                json!({
                    "error": "upstream_failed",
                    "endpoint": endpoint.name,
                    "message": err.to_string(),
                }),
            ))
        }
    }
}

/// Liveness probe for the gateway itself.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "fleetgate" }))
}

/// Scheduler, registry and unifier stats in one payload.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.monitor.scheduler_stats();
    let (registry, unifier) = state.registry.stats().await;
    Json(json!({
        "scheduler": scheduler,
        "registry": registry,
        "unifier": unifier,
        "strategy": {
            "routing": state.registry.strategy_name(),
            "selector": state.selector.name(),
        },
    }))
}

/// The unified model catalog.
pub async fn status_models(State(state): State<AppState>) -> Json<Value> {
    let models = state.registry.unified_models().await;
    Json(json!({ "count": models.len(), "models": models }))
}

/// Fleet snapshot with per-endpoint connection counts.
pub async fn status_endpoints(State(state): State<AppState>) -> Json<Value> {
    let connections = state.connection_stats.connection_stats();
    let endpoints: Vec<Value> = state
        .repository
        .get_all()
        .into_iter()
        .map(|e| {
            let in_flight = connections.get(e.url_str()).copied().unwrap_or(0).max(0);
            json!({
                "name": e.name,
                "url": e.url_str(),
                "provider": e.provider,
                "priority": e.priority,
                "status": e.status,
                "routable": e.status.is_routable(),
                "consecutive_failures": e.consecutive_failures,
                "backoff_multiplier": e.backoff_multiplier,
                "last_checked": e.last_checked,
                "next_check_time": e.next_check_time,
                "in_flight_connections": in_flight,
            })
        })
        .collect();
    Json(json!({ "count": endpoints.len(), "endpoints": endpoints }))
}

/// Enqueue an immediate probe of every endpoint.
pub async fn force_check(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    match state.monitor.force_check() {
        Ok(enqueued) => Ok(Json(json!({ "enqueued": enqueued }))),
        Err(HealthMonitorError::QueueFull) => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({ "error": "queue_full", "message": "health check queue is full" }),
        )),
        Err(err) => Err(ApiError::new(
            StatusCode::CONFLICT,
            json!({ "error": "not_running", "message": err.to_string() }),
        )),
    }
}
