//! # Endpoint Repository
//!
//! In-memory store of the configured fleet. Read-heavy: the routing path
//! asks for healthy/routable snapshots on every request, while only the
//! health worker and config loading ever write.
//!
//! The trait exists so the health subsystem can be tested against a
//! scriptable repository; production uses [`InMemoryEndpointRepository`].

use crate::endpoint::{Endpoint, EndpointStatus};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RepositoryError {
    /// The endpoint was removed (config reload) between read and write-back
    #[error("endpoint not found: {url}")]
    NotFound { url: String },
}

/// Read-mostly store of configured endpoints, keyed by URL.
pub trait EndpointRepository: Send + Sync {
    /// Every configured endpoint.
    fn get_all(&self) -> Vec<Endpoint>;

    /// Endpoints with status `Healthy` only.
    fn get_healthy(&self) -> Vec<Endpoint>;

    /// Endpoints in any routable state (`Healthy`, `Busy`, `Warming`).
    fn get_routable(&self) -> Vec<Endpoint>;

    /// Write back a mutated endpoint. Fails with [`RepositoryError::NotFound`]
    /// when the record was concurrently removed; the caller drops the update.
    fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError>;

    /// Cheap membership test used by health workers before writing back a
    /// potentially stale endpoint.
    fn exists(&self, url: &str) -> bool;
}

/// The production repository: one `RwLock` around a URL-keyed map.
#[derive(Debug, Default)]
pub struct InMemoryEndpointRepository {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl InMemoryEndpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the configured fleet wholesale, returning the URLs that were
    /// dropped so the owner can purge breaker and tracker state for them.
    /// Endpoints that survive the reload keep their observed health state.
    pub fn replace_all(&self, endpoints: Vec<Endpoint>) -> Vec<String> {
        let mut map = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        let mut next: HashMap<String, Endpoint> = HashMap::with_capacity(endpoints.len());
        for mut endpoint in endpoints {
            if let Some(existing) = map.get(endpoint.url_str()) {
                endpoint.status = existing.status;
                endpoint.last_checked = existing.last_checked;
                endpoint.last_latency = existing.last_latency;
                endpoint.next_check_time = existing.next_check_time;
                endpoint.consecutive_failures = existing.consecutive_failures;
                endpoint.backoff_multiplier = existing.backoff_multiplier;
            }
            next.insert(endpoint.url_str().to_string(), endpoint);
        }
        let removed = map
            .keys()
            .filter(|url| !next.contains_key(*url))
            .cloned()
            .collect();
        *map = next;
        removed
    }

    fn snapshot<F>(&self, keep: F) -> Vec<Endpoint>
    where
        F: Fn(&Endpoint) -> bool,
    {
        let map = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        let mut endpoints: Vec<Endpoint> = map.values().filter(|e| keep(e)).cloned().collect();
        // deterministic order keeps round-robin and tests stable
        endpoints.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.url.cmp(&b.url)));
        endpoints
    }
}

impl EndpointRepository for InMemoryEndpointRepository {
    fn get_all(&self) -> Vec<Endpoint> {
        self.snapshot(|_| true)
    }

    fn get_healthy(&self) -> Vec<Endpoint> {
        self.snapshot(|e| e.status == EndpointStatus::Healthy)
    }

    fn get_routable(&self) -> Vec<Endpoint> {
        self.snapshot(|e| e.status.is_routable())
    }

    fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError> {
        let mut map = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        match map.get_mut(endpoint.url_str()) {
            Some(existing) => {
                *existing = endpoint.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound {
                url: endpoint.url_str().to_string(),
            }),
        }
    }

    fn exists(&self, url: &str) -> bool {
        self.endpoints
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(url)
    }
}
