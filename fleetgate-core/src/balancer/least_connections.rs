//! Least-connections selector.
//!
//! Picks the routable endpoint with the fewest in-flight connections
//! according to the shared [`ConnectionTracker`]. Endpoints the tracker has
//! never seen count as zero, and so do transiently negative counters. Ties
//! go to the first endpoint in iteration order.

use super::{routable_candidates, EndpointSelector};
use crate::connection_stats::ConnectionTracker;
use crate::endpoint::Endpoint;
use crate::error::SelectionError;
use std::sync::Arc;

pub struct LeastConnectionsSelector {
    stats: Arc<ConnectionTracker>,
}

impl LeastConnectionsSelector {
    pub const NAME: &'static str = "least-connections";

    pub fn new(stats: Arc<ConnectionTracker>) -> Self {
        Self { stats }
    }
}

impl EndpointSelector for LeastConnectionsSelector {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, SelectionError> {
        let routable = routable_candidates(endpoints)?;
        let mut best_index = 0;
        let mut best_count = i64::MAX;
        for (index, endpoint) in routable.iter().enumerate() {
            let count = self.stats.connections(endpoint.url_str());
            if count < best_count {
                best_count = count;
                best_index = index;
            }
        }
        let mut routable = routable;
        Ok(routable.swap_remove(best_index))
    }

    fn increment_connections(&self, endpoint: &Endpoint) {
        self.stats.record_connection(endpoint.url_str(), 1);
    }

    fn decrement_connections(&self, endpoint: &Endpoint) {
        self.stats.record_connection(endpoint.url_str(), -1);
    }

    fn name(&self) -> &str {
        Self::NAME
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

    fn fleet() -> Vec<Endpoint> {
        vec![
            endpoint("A", "http://a:11434", EndpointStatus::Healthy),
            endpoint("B", "http://b:11434", EndpointStatus::Healthy),
            endpoint("C", "http://c:11434", EndpointStatus::Healthy),
        ]
    }

    #[test]
    fn picks_the_least_loaded() {
        let stats = Arc::new(ConnectionTracker::new());
        stats.record_connection("http://a:11434/", 5);
        stats.record_connection("http://b:11434/", 2);
        stats.record_connection("http://c:11434/", 7);

        let selector = LeastConnectionsSelector::new(stats);
        assert_eq!(selector.select(&fleet()).unwrap().name, "B");
    }

    #[test]
    fn unseen_endpoints_count_as_zero() {
        let stats = Arc::new(ConnectionTracker::new());
        stats.record_connection("http://a:11434/", 1);
        // b and c have no entries; first in iteration order wins the tie
        let selector = LeastConnectionsSelector::new(stats);
        assert_eq!(selector.select(&fleet()).unwrap().name, "B");
    }

    #[test]
    fn negative_counters_do_not_skew_selection() {
        let stats = Arc::new(ConnectionTracker::new());
        // over-decremented endpoint reads as zero, same as the untouched one
        stats.record_connection("http://a:11434/", -4);
        let selector = LeastConnectionsSelector::new(stats);
        // tie between all three at zero; ties go first-in-order
        assert_eq!(selector.select(&fleet()).unwrap().name, "A");
    }

    #[test]
    fn selection_follows_the_connection_lifecycle() {
        let stats = Arc::new(ConnectionTracker::new());
        let selector = LeastConnectionsSelector::new(stats);
        let endpoints = fleet();

        // drive the counters through the selector itself
        let first = selector.select(&endpoints).unwrap();
        selector.increment_connections(&first);
        let second = selector.select(&endpoints).unwrap();
        assert_ne!(first.name, second.name);

        selector.decrement_connections(&first);
        // back to an all-zero tie
        assert_eq!(selector.select(&endpoints).unwrap().name, "A");
    }

    #[test]
    fn only_routable_endpoints_are_considered() {
        let stats = Arc::new(ConnectionTracker::new());
        stats.record_connection("http://b:11434/", 9);
        let mut endpoints = fleet();
        endpoints[0].status = EndpointStatus::Offline;
        endpoints[2].status = EndpointStatus::Unhealthy;

        let selector = LeastConnectionsSelector::new(stats);
        // B is loaded but it is the only routable endpoint left
        assert_eq!(selector.select(&endpoints).unwrap().name, "B");
    }
}
