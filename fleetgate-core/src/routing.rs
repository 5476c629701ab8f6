//! # Model-Aware Routing Strategy
//!
//! Turns "a request for model X" plus the fleet's current health into the
//! candidate set handed to a load-balancing selector. The strategy itself is
//! pure set algebra; the unified registry feeds it the endpoints known to
//! host the model and the repository feeds it the healthy fleet.
//!
//! The default (and only shipped) strategy is **strict**: a model the
//! registry has never heard of is rejected with `model_not_found`, a model
//! whose hosts are all down is rejected with `model_unavailable`, and
//! anything else routes to exactly the healthy ∩ hosting intersection.
//! Rejections carry enough structure for the HTTP layer to answer 404/503
//! with the endpoints that were considered.

use crate::endpoint::Endpoint;
use crate::error::RoutingError;
use serde::Serialize;
use std::collections::HashSet;

/// What the strategy decided to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    Routed,
    Rejected,
}

/// Structured routing decision, logged and surfaced in status payloads.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub action: RouteAction,
    /// `model_found`, `model_not_found` or `model_unavailable`
    pub reason: &'static str,
    pub strategy: String,
    /// Candidates that survived filtering
    pub candidate_count: usize,
}

/// Expands a requested model name into the underlying names to look up.
///
/// Deterministic by contract: the same input must always produce the same
/// expansion list, in the same order. When two expansions match the same
/// endpoint, the earlier one wins.
pub trait AliasExpander: Send + Sync {
    fn expand(&self, name: &str) -> Vec<String>;
}

/// Produces routing candidates for a requested model.
pub trait ModelRoutingStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Filter `healthy` down to the endpoints that can serve `model`.
    ///
    /// `model_endpoints` is the set of URLs the registry knows host the
    /// model. Returns the candidates and a `Routed` decision, or a
    /// [`RoutingError`] rejection.
    fn routable_endpoints(
        &self,
        model: &str,
        healthy: &[Endpoint],
        model_endpoints: &HashSet<String>,
    ) -> Result<(Vec<Endpoint>, RoutingDecision), RoutingError>;
}

/// The strict strategy: route only to endpoints that both host the model
/// and are currently healthy.
#[derive(Debug, Default)]
pub struct StrictRoutingStrategy;

impl StrictRoutingStrategy {
    pub const NAME: &'static str = "strict";
}

impl ModelRoutingStrategy for StrictRoutingStrategy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn routable_endpoints(
        &self,
        model: &str,
        healthy: &[Endpoint],
        model_endpoints: &HashSet<String>,
    ) -> Result<(Vec<Endpoint>, RoutingDecision), RoutingError> {
        if model_endpoints.is_empty() {
            tracing::debug!(model, strategy = Self::NAME, "model not in registry");
            return Err(RoutingError::ModelNotFound {
                model: model.to_string(),
                strategy: Self::NAME.to_string(),
            });
        }

        let candidates: Vec<Endpoint> = healthy
            .iter()
            .filter(|e| model_endpoints.contains(e.url_str()))
            .cloned()
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                model,
                strategy = Self::NAME,
                known = model_endpoints.len(),
                healthy = healthy.len(),
                "model has no healthy endpoints"
            );
            let mut considered: Vec<String> = model_endpoints.iter().cloned().collect();
            considered.sort();
            return Err(RoutingError::ModelUnavailable {
                model: model.to_string(),
                strategy: Self::NAME.to_string(),
                known: model_endpoints.len(),
                healthy: healthy.len(),
                considered,
            });
        }

        let decision = RoutingDecision {
            action: RouteAction::Routed,
            reason: "model_found",
            strategy: Self::NAME.to_string(),
            candidate_count: candidates.len(),
        };
        Ok((candidates, decision))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointStatus;

    fn endpoint(name: &str, url: &str, status: EndpointStatus) -> Endpoint {
        let mut e = Endpoint::new(name, url.parse().unwrap(), "ollama");
        e.status = status;
        e
    }

    fn urls(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unknown_model_is_rejected_not_found() {
        let strategy = StrictRoutingStrategy;
        let healthy = vec![endpoint("e1", "http://e1:11434", EndpointStatus::Healthy)];
        let err = strategy
            .routable_endpoints("mistral:7b", &healthy, &HashSet::new())
            .unwrap_err();
        assert_eq!(err.reason(), "model_not_found");
    }

    #[test]
    fn known_model_with_no_healthy_hosts_is_unavailable() {
        let strategy = StrictRoutingStrategy;
        // model lives only on e3, which is not in the healthy set
        let healthy = vec![
            endpoint("e1", "http://e1:11434", EndpointStatus::Healthy),
            endpoint("e2", "http://e2:11434", EndpointStatus::Healthy),
        ];
        let err = strategy
            .routable_endpoints("mistral:7b", &healthy, &urls(&["http://e3:11434/"]))
            .unwrap_err();
        assert_eq!(err.reason(), "model_unavailable");
        match err {
            RoutingError::ModelUnavailable {
                known,
                healthy,
                considered,
                ..
            } => {
                assert_eq!(known, 1);
                assert_eq!(healthy, 2);
                assert_eq!(considered, vec!["http://e3:11434/"]);
            }
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[test]
    fn routes_to_exactly_the_intersection() {
        let strategy = StrictRoutingStrategy;
        let healthy = vec![
            endpoint("e1", "http://e1:11434", EndpointStatus::Healthy),
            endpoint("e2", "http://e2:11434", EndpointStatus::Healthy),
            endpoint("e3", "http://e3:11434", EndpointStatus::Healthy),
        ];
        let hosts = urls(&["http://e1:11434/", "http://e2:11434/", "http://e9:11434/"]);
        let (candidates, decision) = strategy
            .routable_endpoints("llama3:8b", &healthy, &hosts)
            .unwrap();

        let names: Vec<&str> = candidates.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["e1", "e2"]);
        assert_eq!(decision.action, RouteAction::Routed);
        assert_eq!(decision.reason, "model_found");
        assert_eq!(decision.candidate_count, 2);
    }
}
