//! # Fleetgate Core
//!
//! The engine room of the Fleetgate proxy: everything needed to keep a
//! continuously updated view of a fleet of LLM inference backends and to
//! turn "a request for model X" into "forward it to endpoint Y".
//!
//! ## Overview
//!
//! Four subsystems, composed by the gateway crate:
//!
//! - **Endpoint health** ([`health`]): a min-heap scheduler and worker pool
//!   probing every backend on its own cadence, with exponential backoff, a
//!   per-endpoint circuit breaker ([`circuit_breaker`]) and throttled
//!   status-transition logging ([`status_tracker`]).
//! - **Model registry** ([`registry`]): the native catalog maps plus a
//!   unifier that folds provider dialects into canonical models, so the
//!   same weights on two different backends count once.
//! - **Selectors** ([`balancer`]): priority-weighted, round-robin and
//!   least-connections load balancing over a shared connection-stats
//!   collector ([`connection_stats`]), built by a registerable factory.
//! - **Routing** ([`routing`]): the strict model-aware strategy that
//!   intersects "who hosts it" with "who is healthy" before the balancer
//!   runs.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use fleetgate_core::balancer::SelectorFactory;
//! use fleetgate_core::connection_stats::ConnectionTracker;
//! use fleetgate_core::registry::{ModelRegistry, ModelUnifier, UnifiedRegistry};
//! use fleetgate_core::routing::StrictRoutingStrategy;
//!
//! let stats = Arc::new(ConnectionTracker::new());
//! let selector = SelectorFactory::with_defaults(stats).create("priority")?;
//! let registry = UnifiedRegistry::new(
//!     ModelRegistry::new(),
//!     ModelUnifier::default(),
//!     Arc::new(StrictRoutingStrategy),
//! );
//!
//! // per request: candidates = registry.routable_endpoints_for_model(...),
//! // then selector.select(&candidates)
//! ```
//!
//! ## Error philosophy
//!
//! Probe failures are not errors; they are observations folded into endpoint
//! status. Errors proper ([`error`]) are reserved for bad input, missing
//! records, unknown strategies and structured routing rejections.

pub mod balancer;
pub mod circuit_breaker;
pub mod connection_stats;
pub mod duration_serde;
pub mod endpoint;
pub mod error;
pub mod health;
pub mod models;
pub mod registry;
pub mod repository;
pub mod routing;
pub mod status_tracker;

pub use balancer::{EndpointSelector, SelectorFactory};
pub use circuit_breaker::{BreakerConfig, EndpointCircuitBreaker};
pub use connection_stats::ConnectionTracker;
pub use endpoint::{Endpoint, EndpointStatus};
pub use error::{RegistryError, RoutingError, SelectionError};
pub use health::{
    HealthCheckResult, HealthClient, HealthClientConfig, HealthMonitor, HealthMonitorConfig,
    ProbeErrorKind, RecoveryListener, ReqwestTransport,
};
pub use models::{ModelInfo, UnifiedModel};
pub use registry::{ModelRegistry, ModelUnifier, UnifiedRegistry};
pub use repository::{EndpointRepository, InMemoryEndpointRepository, RepositoryError};
pub use routing::{ModelRoutingStrategy, RouteAction, RoutingDecision, StrictRoutingStrategy};
pub use status_tracker::StatusTransitionTracker;
