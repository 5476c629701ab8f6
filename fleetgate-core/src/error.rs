//! # Error Types
//!
//! This module defines the error taxonomy surfaced by the Fleetgate core.
//! Each subsystem gets its own `thiserror` enum so callers can match on the
//! failures they actually care about instead of string-comparing messages.
//!
//! ## Overview
//!
//! - **RegistryError**: input validation and not-found failures from the
//!   model registry and endpoint repository
//! - **SelectionError**: load-balancer failures, including the two literal
//!   messages routing callers retry on ("no endpoints available",
//!   "no routable endpoints")
//! - **RoutingError**: structured routing rejections that the HTTP layer
//!   translates to 404/503 responses
//!
//! Transport-level probe failures never appear here; they are folded into the
//! endpoint's observable status by the health worker (see
//! [`crate::health::ProbeErrorKind`]).

use thiserror::Error;

/// Registry and repository operation errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Empty, whitespace-only, or otherwise malformed input
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Endpoint URL did not parse or lacks scheme/host
    #[error("invalid endpoint url {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Model is not registered anywhere
    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// Endpoint is not in the repository
    #[error("endpoint not found: {url}")]
    EndpointNotFound { url: String },

    /// Alias did not resolve to any unified model
    #[error("alias not found: {alias}")]
    AliasNotFound { alias: String },
}

/// Load-balancer selection errors.
///
/// These are safe to retry with a refreshed candidate set.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    /// The candidate set was empty
    #[error("no endpoints available")]
    NoEndpoints,

    /// Candidates existed but none were in a routable state
    #[error("no routable endpoints")]
    NoRoutableEndpoints,

    /// Factory lookup for an unregistered strategy name
    #[error("unknown selector strategy: {name}")]
    UnknownStrategy { name: String },
}

/// Structured routing rejections.
///
/// Each rejection carries the strategy that produced it plus the candidate
/// counts, so the HTTP layer can answer 404 (`ModelNotFound`) or 503
/// (`ModelUnavailable`) with the endpoints that were considered.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// The requested model is not in the registry at all
    #[error("model {model:?} is not available on any endpoint")]
    ModelNotFound { model: String, strategy: String },

    /// The model exists, but every endpoint hosting it is down
    #[error(
        "model {model:?} is hosted on {known} endpoint(s) but none are healthy \
         ({healthy} healthy in fleet)"
    )]
    ModelUnavailable {
        model: String,
        strategy: String,
        /// Endpoints the registry knows host the model
        known: usize,
        /// Healthy endpoints in the whole fleet
        healthy: usize,
        /// Names of the endpoints that were considered and rejected
        considered: Vec<String>,
    },
}

impl RoutingError {
    /// Machine-readable rejection reason, mirrored into routing decisions
    /// and response payloads.
    pub fn reason(&self) -> &'static str {
        match self {
            RoutingError::ModelNotFound { .. } => "model_not_found",
            RoutingError::ModelUnavailable { .. } => "model_unavailable",
        }
    }

    pub fn strategy(&self) -> &str {
        match self {
            RoutingError::ModelNotFound { strategy, .. } => strategy,
            RoutingError::ModelUnavailable { strategy, .. } => strategy,
        }
    }
}
