//! Priority-tier selector, the default strategy.
//!
//! Routable candidates are narrowed to the highest priority tier present,
//! then one is drawn by weighted random over each endpoint's status traffic
//! weight (Healthy 1.0, Busy 0.3, Warming 0.1). A tier whose total weight
//! is zero falls back to a uniform draw.

use super::{routable_candidates, EndpointSelector};
use crate::connection_stats::ConnectionTracker;
use crate::endpoint::Endpoint;
use crate::error::SelectionError;
use rand::Rng;
use std::sync::Arc;

pub struct PrioritySelector {
    stats: Arc<ConnectionTracker>,
}

impl PrioritySelector {
    pub const NAME: &'static str = "priority";

    pub fn new(stats: Arc<ConnectionTracker>) -> Self {
        Self { stats }
    }
}

impl EndpointSelector for PrioritySelector {
    fn select(&self, endpoints: &[Endpoint]) -> Result<Endpoint, SelectionError> {
        let mut routable = routable_candidates(endpoints)?;

        let top_priority = routable.iter().map(|e| e.priority).max().unwrap_or(0);
        routable.retain(|e| e.priority == top_priority);
        if routable.len() == 1 {
            return Ok(routable.remove(0));
        }

        let weights: Vec<f64> = routable
            .iter()
            .map(|e| e.status.traffic_weight())
            .collect();
        let total: f64 = weights.iter().sum();
        let mut rng = rand::thread_rng();

        if total <= 0.0 {
            // degenerate tier (all weights zero): uniform draw
            let index = rng.gen_range(0..routable.len());
            return Ok(routable.swap_remove(index));
        }

        let mut remaining = rng.gen_range(0.0..total);
        for (index, weight) in weights.iter().enumerate() {
            remaining -= weight;
            if remaining < 0.0 {
                return Ok(routable.swap_remove(index));
            }
        }
        // float edge: the draw landed exactly on the upper bound
        Ok(routable.pop().expect("tier is non-empty"))
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

    fn endpoint(name: &str, url: &str, priority: u32, status: EndpointStatus) -> Endpoint {
        let mut e = Endpoint::new(name, url.parse().unwrap(), "ollama");
        e.priority = priority;
        e.status = status;
        e
    }

    fn selector() -> PrioritySelector {
        PrioritySelector::new(Arc::new(ConnectionTracker::new()))
    }

    #[test]
    fn lower_tiers_never_win() {
        let endpoints = vec![
            endpoint("A", "http://a:11434", 300, EndpointStatus::Healthy),
            endpoint("B", "http://b:11434", 300, EndpointStatus::Busy),
            endpoint("C", "http://c:11434", 200, EndpointStatus::Healthy),
        ];
        let selector = selector();
        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..100 {
            let picked = selector.select(&endpoints).unwrap();
            *picks.entry(picked.name).or_default() += 1;
        }
        assert_eq!(picks.get("C"), None);
        assert!(picks["A"] > 0);
        assert!(picks["B"] > 0);
    }

    #[test]
    fn weighted_draw_orders_by_traffic_weight() {
        let endpoints = vec![
            endpoint("H", "http://h:11434", 100, EndpointStatus::Healthy),
            endpoint("U", "http://u:11434", 100, EndpointStatus::Busy),
            endpoint("W", "http://w:11434", 100, EndpointStatus::Warming),
        ];
        let selector = selector();
        let mut picks: HashMap<String, usize> = HashMap::new();
        for _ in 0..1000 {
            let picked = selector.select(&endpoints).unwrap();
            *picks.entry(picked.name).or_default() += 1;
        }
        let healthy = picks.get("H").copied().unwrap_or(0);
        let busy = picks.get("U").copied().unwrap_or(0);
        let warming = picks.get("W").copied().unwrap_or(0);
        assert!(healthy > busy, "healthy={healthy} busy={busy}");
        assert!(busy > warming, "busy={busy} warming={warming}");
        assert!(warming > 0);
    }

    #[test]
    fn single_endpoint_tier_short_circuits() {
        let endpoints = vec![
            endpoint("A", "http://a:11434", 500, EndpointStatus::Warming),
            endpoint("B", "http://b:11434", 100, EndpointStatus::Healthy),
        ];
        let picked = selector().select(&endpoints).unwrap();
        assert_eq!(picked.name, "A");
    }

    #[test]
    fn unroutable_candidates_are_filtered_before_tiering() {
        // the highest-priority endpoint is offline; the tier below wins
        let endpoints = vec![
            endpoint("A", "http://a:11434", 500, EndpointStatus::Offline),
            endpoint("B", "http://b:11434", 100, EndpointStatus::Healthy),
        ];
        let picked = selector().select(&endpoints).unwrap();
        assert_eq!(picked.name, "B");
    }

    #[test]
    fn connection_counting_delegates_to_tracker() {
        let stats = Arc::new(ConnectionTracker::new());
        let selector = PrioritySelector::new(stats.clone());
        let e = endpoint("A", "http://a:11434", 100, EndpointStatus::Healthy);
        selector.increment_connections(&e);
        selector.increment_connections(&e);
        selector.decrement_connections(&e);
        assert_eq!(stats.connections("http://a:11434/"), 1);
    }
}
