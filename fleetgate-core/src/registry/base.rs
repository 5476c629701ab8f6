//! # Base Model Registry
//!
//! The authoritative record of who hosts what, in native terms. Two indexed
//! maps under one `RwLock`:
//!
//! - `endpoint_models`: endpoint URL → the models it last reported
//! - `model_to_endpoints`: native model name → the endpoints reporting it
//!
//! The two maps are mutated together under the write lock, so the
//! cross-index invariant (a URL is in `model_to_endpoints[name]` iff that
//! endpoint's record contains `name`) holds after every operation. Stats are
//! recomputed in the same critical section.
//!
//! Everything returned to callers is a deep copy; registry internals never
//! escape the lock.

use crate::error::RegistryError;
use crate::models::{ModelInfo, RegistryStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use url::Url;

/// One endpoint's catalog as last reported.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointModels {
    pub endpoint_url: String,
    pub models: Vec<ModelInfo>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RegistryState {
    endpoint_models: HashMap<String, EndpointModels>,
    model_to_endpoints: HashMap<String, BTreeSet<String>>,
    stats: RegistryStats,
}

impl RegistryState {
    fn detach_endpoint(&mut self, url: &str) {
        self.endpoint_models.remove(url);
        self.model_to_endpoints.retain(|_, endpoints| {
            endpoints.remove(url);
            !endpoints.is_empty()
        });
    }

    fn recompute_stats(&mut self) {
        self.stats = RegistryStats {
            total_endpoints: self.endpoint_models.len(),
            total_models: self.model_to_endpoints.len(),
            models_per_endpoint: self
                .endpoint_models
                .iter()
                .map(|(url, entry)| (url.clone(), entry.models.len()))
                .collect(),
            last_updated: Some(Utc::now()),
        };
    }
}

/// Validate and canonicalise an endpoint URL.
///
/// The canonical form (`Url::as_str` after parsing) is the key used across
/// every per-endpoint map, so lookups done with a raw config string and ones
/// done with [`Endpoint::url_str`](crate::endpoint::Endpoint::url_str) agree.
pub fn canonical_endpoint_url(url: &str) -> Result<String, RegistryError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(RegistryError::InvalidInput {
            message: "endpoint url must not be empty".to_string(),
        });
    }
    let parsed = Url::parse(trimmed).map_err(|e| RegistryError::InvalidUrl {
        url: trimmed.to_string(),
        message: e.to_string(),
    })?;
    if parsed.host_str().is_none() || parsed.scheme().is_empty() {
        return Err(RegistryError::InvalidUrl {
            url: trimmed.to_string(),
            message: "url must have a scheme and host".to_string(),
        });
    }
    Ok(parsed.as_str().to_string())
}

fn validate_model_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::InvalidInput {
            message: "model name must not be empty".to_string(),
        });
    }
    Ok(())
}

/// The base registry. See the module docs for the data model.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    state: RwLock<RegistryState>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a single model for an endpoint: a record with the same name is
    /// replaced, anything else is appended.
    pub async fn register_model(&self, url: &str, model: ModelInfo) -> Result<(), RegistryError> {
        let url = canonical_endpoint_url(url)?;
        validate_model_name(&model.name)?;

        let mut state = self.state.write().await;
        let entry = state
            .endpoint_models
            .entry(url.clone())
            .or_insert_with(|| EndpointModels {
                endpoint_url: url.clone(),
                models: Vec::new(),
                last_updated: Utc::now(),
            });
        match entry.models.iter_mut().find(|m| m.name == model.name) {
            Some(existing) => *existing = model.clone(),
            None => entry.models.push(model.clone()),
        }
        entry.last_updated = Utc::now();
        state
            .model_to_endpoints
            .entry(model.name.clone())
            .or_default()
            .insert(url);
        state.recompute_stats();
        Ok(())
    }

    /// Atomically replace an endpoint's whole catalog.
    ///
    /// The endpoint is first detached from every reverse-index entry, then
    /// re-registered with the new list. An empty list removes the endpoint
    /// entirely. Duplicate names in the input collapse, later entry winning.
    pub async fn register_models(
        &self,
        url: &str,
        models: Vec<ModelInfo>,
    ) -> Result<(), RegistryError> {
        let url = canonical_endpoint_url(url)?;
        for model in &models {
            validate_model_name(&model.name)?;
        }

        let mut state = self.state.write().await;
        state.detach_endpoint(&url);

        if !models.is_empty() {
            let mut deduped: Vec<ModelInfo> = Vec::with_capacity(models.len());
            for model in models {
                if let Some(existing) = deduped.iter_mut().find(|m| m.name == model.name) {
                    *existing = model;
                } else {
                    deduped.push(model);
                }
            }
            for model in &deduped {
                state
                    .model_to_endpoints
                    .entry(model.name.clone())
                    .or_default()
                    .insert(url.clone());
            }
            state.endpoint_models.insert(
                url.clone(),
                EndpointModels {
                    endpoint_url: url,
                    models: deduped,
                    last_updated: Utc::now(),
                },
            );
        }
        state.recompute_stats();
        Ok(())
    }

    /// Remove an endpoint and every reverse-index reference to it.
    pub async fn remove_endpoint(&self, url: &str) -> Result<(), RegistryError> {
        let url = canonical_endpoint_url(url)?;
        let mut state = self.state.write().await;
        state.detach_endpoint(&url);
        state.recompute_stats();
        Ok(())
    }

    pub async fn models_for_endpoint(&self, url: &str) -> Vec<ModelInfo> {
        let Ok(url) = canonical_endpoint_url(url) else {
            return Vec::new();
        };
        let state = self.state.read().await;
        state
            .endpoint_models
            .get(&url)
            .map(|entry| entry.models.clone())
            .unwrap_or_default()
    }

    /// URLs of every endpoint reporting `name`, sorted.
    pub async fn endpoints_for_model(&self, name: &str) -> Vec<String> {
        let state = self.state.read().await;
        state
            .model_to_endpoints
            .get(name)
            .map(|endpoints| endpoints.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_model_available(&self, name: &str) -> bool {
        let state = self.state.read().await;
        state.model_to_endpoints.contains_key(name)
    }

    /// Distinct native model names across the fleet, sorted.
    pub async fn all_models(&self) -> Vec<String> {
        let state = self.state.read().await;
        let mut names: Vec<String> = state.model_to_endpoints.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every endpoint's catalog; a deep copy.
    pub async fn all_endpoint_models(&self) -> Vec<EndpointModels> {
        let state = self.state.read().await;
        let mut entries: Vec<EndpointModels> = state.endpoint_models.values().cloned().collect();
        entries.sort_by(|a, b| a.endpoint_url.cmp(&b.endpoint_url));
        entries
    }

    pub async fn stats(&self) -> RegistryStats {
        self.state.read().await.stats.clone()
    }
}
