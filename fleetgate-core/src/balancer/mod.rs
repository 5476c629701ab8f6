//! # Load-Balancing Selectors
//!
//! Given the routing strategy's candidate set, a selector picks the one
//! endpoint a request is forwarded to. Three strategies ship behind a common
//! trait, constructed by a string-keyed [`SelectorFactory`]:
//!
//! - **priority** (default): top priority tier, weighted random by each
//!   status's traffic weight within the tier
//! - **round-robin**: wrapping atomic counter over the routable set
//! - **least-connections**: fewest in-flight connections per the shared
//!   [`ConnectionTracker`](crate::connection_stats::ConnectionTracker)
//!
//! Every selector first drops non-routable endpoints; selection over an
//! empty input fails with `no endpoints available` and over an input with
//! nothing routable with `no routable endpoints`. Decisions are best-effort
//! snapshots: two concurrent selections may legitimately pick the same
//! endpoint.

pub mod least_connections;
pub mod priority;
pub mod round_robin;

pub use least_connections::LeastConnectionsSelector;
pub use priority::PrioritySelector;
pub use round_robin::RoundRobinSelector;

use crate::connection_stats::ConnectionTracker;
use crate::endpoint::Endpoint;
use crate::error::SelectionError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Picks one endpoint from a candidate set.
pub trait EndpointSelector: Send + Sync {
    /// Select a routable endpoint from `endpoints`.
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, SelectionError>;

    /// Count a forwarded request against the endpoint.
    fn increment_connections(&self, endpoint: &Endpoint);

    /// Count a completed request off the endpoint.
    fn decrement_connections(&self, endpoint: &Endpoint);

    fn name(&self) -> &str;
}

/// Shared filtering step: routable endpoints only, with the two literal
/// error cases every selector agrees on.
pub(crate) fn routable_candidates(endpoints: &[Endpoint]) -> Result<Vec<Endpoint>, SelectionError> {
    if endpoints.is_empty() {
        return Err(SelectionError::NoEndpoints);
    }
    let routable: Vec<Endpoint> = endpoints
        .iter()
        .filter(|e| e.status.is_routable())
        .cloned()
        .collect();
    if routable.is_empty() {
        return Err(SelectionError::NoRoutableEndpoints);
    }
    Ok(routable)
}

type SelectorBuilder =
    Box<dyn Fn(Arc<ConnectionTracker>) -> Arc<dyn EndpointSelector> + Send + Sync>;

/// String-keyed selector construction, open for registration.
///
/// The built-in names are `priority`, `round-robin` and
/// `least-connections`; deployments can register their own strategies
/// before config resolution runs.
pub struct SelectorFactory {
    builders: RwLock<HashMap<String, SelectorBuilder>>,
    stats: Arc<ConnectionTracker>,
}

impl SelectorFactory {
    /// A factory with the three built-in strategies registered.
    pub fn with_defaults(stats: Arc<ConnectionTracker>) -> Self {
        let factory = Self {
            builders: RwLock::new(HashMap::new()),
            stats,
        };
        factory.register(PrioritySelector::NAME, |stats| {
            Arc::new(PrioritySelector::new(stats))
        });
        factory.register(RoundRobinSelector::NAME, |stats| {
            Arc::new(RoundRobinSelector::new(stats))
        });
        factory.register(LeastConnectionsSelector::NAME, |stats| {
            Arc::new(LeastConnectionsSelector::new(stats))
        });
        factory
    }

    /// Register (or replace) a strategy under `name`.
    pub fn register<F>(&self, name: &str, builder: F)
    where
        F: Fn(Arc<ConnectionTracker>) -> Arc<dyn EndpointSelector> + Send + Sync + 'static,
    {
        self.builders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), Box::new(builder));
    }

    /// Build the selector registered under `name`.
    pub fn create(&self, name: &str) -> Result<Arc<dyn EndpointSelector>, SelectionError> {
        let builders = self.builders.read().unwrap_or_else(|e| e.into_inner());
        match builders.get(name) {
            Some(builder) => Ok(builder(self.stats.clone())),
            None => Err(SelectionError::UnknownStrategy {
                name: name.to_string(),
            }),
        }
    }

    pub fn stats(&self) -> &Arc<ConnectionTracker> {
        &self.stats
    }
}
