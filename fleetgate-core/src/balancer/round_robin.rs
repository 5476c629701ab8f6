//! Round-robin selector: a wrapping atomic counter over the routable set.
//!
//! With a stable candidate set the distribution is exactly fair; when the
//! set changes size mid-flight the counter simply re-wraps, which is as good
//! as round-robin gets without coordination.

use super::{routable_candidates, EndpointSelector};
use crate::connection_stats::ConnectionTracker;
use crate::endpoint::Endpoint;
use crate::error::SelectionError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct RoundRobinSelector {
    stats: Arc<ConnectionTracker>,
    counter: AtomicU64,
}

impl RoundRobinSelector {
    pub const NAME: &'static str = "round-robin";

    pub fn new(stats: Arc<ConnectionTracker>) -> Self {
        Self {
            stats,
            counter: AtomicU64::new(0),
        }
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, SelectionError> {
        let mut routable = routable_candidates(endpoints)?;
        // fetch_add wraps on overflow, which keeps the modulo cycling
        let ticket = self.counter.fetch_add(1, Ordering::Relaxed);
        let index = (ticket % routable.len() as u64) as usize;
        Ok(routable.swap_remove(index))
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
    use std::collections::HashMap;

    fn endpoint(name: &str, url: &str, status: EndpointStatus) -> Endpoint {
        let mut e = Endpoint::new(name, url.parse().unwrap(), "ollama");
        e.status = status;
        e
    }

    fn fleet() -> Vec<Endpoint> {
        vec![
            endpoint("E1", "http://e1:11434", EndpointStatus::Healthy),
            endpoint("E2", "http://e2:11434", EndpointStatus::Healthy),
            endpoint("E3", "http://e3:11434", EndpointStatus::Healthy),
        ]
    }

    #[test]
    fn cycles_in_order() {
        let selector = RoundRobinSelector::new(Arc::new(ConnectionTracker::new()));
        let endpoints = fleet();
        let picked: Vec<String> = (0..6)
            .map(|_| selector.select(&endpoints).unwrap().name)
            .collect();
        assert_eq!(picked, vec!["E1", "E2", "E3", "E1", "E2", "E3"]);
    }

    #[test]
    fn distribution_is_exactly_fair() {
        let selector = RoundRobinSelector::new(Arc::new(ConnectionTracker::new()));
        let endpoints = fleet();
        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..300 {
            let picked = selector.select(&endpoints).unwrap();
            *picks.entry(picked.name).or_default() += 1;
        }
        assert_eq!(picks["E1"], 100);
        assert_eq!(picks["E2"], 100);
        assert_eq!(picks["E3"], 100);
    }

    #[test]
    fn skips_unroutable_endpoints() {
        let selector = RoundRobinSelector::new(Arc::new(ConnectionTracker::new()));
        let mut endpoints = fleet();
        endpoints[1].status = EndpointStatus::Offline;
        for _ in 0..10 {
            let picked = selector.select(&endpoints).unwrap();
            assert_ne!(picked.name, "E2");
        }
    }

    #[test]
    fn counter_wrap_is_harmless() {
        let selector = RoundRobinSelector::new(Arc::new(ConnectionTracker::new()));
        selector.counter.store(u64::MAX, Ordering::Relaxed);
        let endpoints = fleet();
        // crossing the wrap point keeps selecting valid endpoints
        for _ in 0..6 {
            selector.select(&endpoints).unwrap();
        }
    }
}
