//! # Unified Registry
//!
//! The composed read API the request path talks to. Wraps the base registry
//! (native truth), the unifier (canonical view) and a routing strategy
//! (candidate production) behind one struct, so callers never have to know
//! which layer answers a question.
//!
//! Registration updates the base first, then unifies; the base registry
//! state stays authoritative even if unification were ever to misbehave.
//! Lookups try native names first and fall back to the unified index, so a
//! request can name a model in any dialect any endpoint speaks.

use crate::endpoint::Endpoint;
use crate::error::{RegistryError, RoutingError};
use crate::models::{capability, ModelInfo, RegistryStats, UnifiedModel, UnifierStats};
use crate::registry::base::{canonical_endpoint_url, ModelRegistry};
use crate::registry::unifier::ModelUnifier;
use crate::repository::EndpointRepository;
use crate::routing::{AliasExpander, ModelRoutingStrategy, RoutingDecision};
use std::collections::HashSet;
use std::sync::Arc;

/// Base registry + unifier + routing strategy, composed.
pub struct UnifiedRegistry {
    base: ModelRegistry,
    unifier: ModelUnifier,
    strategy: Arc<dyn ModelRoutingStrategy>,
    expander: Option<Arc<dyn AliasExpander>>,
}

impl UnifiedRegistry {
    pub fn new(
        base: ModelRegistry,
        unifier: ModelUnifier,
        strategy: Arc<dyn ModelRoutingStrategy>,
    ) -> Self {
        Self {
            base,
            unifier,
            strategy,
            expander: None,
        }
    }

    /// Install an alias expander applied ahead of the routing strategy.
    pub fn with_alias_expander(mut self, expander: Arc<dyn AliasExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Replace an endpoint's catalog: base registry first, then the unified
    /// index. Validation failures abort before either layer is touched.
    pub async fn register_models(
        &self,
        endpoint: &Endpoint,
        models: Vec<ModelInfo>,
    ) -> Result<(), RegistryError> {
        self.base
            .register_models(endpoint.url_str(), models.clone())
            .await?;
        self.unifier.apply_endpoint(endpoint, &models).await;
        tracing::debug!(
            endpoint = %endpoint.name,
            url = endpoint.url_str(),
            models = models.len(),
            "registered endpoint catalog"
        );
        Ok(())
    }

    /// Deregister an endpoint from both layers.
    pub async fn remove_endpoint(&self, url: &str) -> Result<(), RegistryError> {
        let canonical = canonical_endpoint_url(url)?;
        self.base.remove_endpoint(&canonical).await?;
        self.unifier.remove_endpoint(&canonical).await;
        Ok(())
    }

    pub async fn unified_models(&self) -> Vec<UnifiedModel> {
        self.unifier.all().await
    }

    /// Direct ID lookup, then alias lookup.
    pub async fn unified_model(&self, id_or_alias: &str) -> Result<UnifiedModel, RegistryError> {
        self.unifier.resolve_alias(id_or_alias).await
    }

    /// True when the base registry has the native name or any unified alias
    /// resolves to it.
    pub async fn is_model_available(&self, name: &str) -> bool {
        if self.base.is_model_available(name).await {
            return true;
        }
        self.unifier.resolve_alias(name).await.is_ok()
    }

    /// Endpoints hosting `name`: native index first, unified fallback.
    pub async fn endpoints_for_model(&self, name: &str) -> Vec<String> {
        let native = self.base.endpoints_for_model(name).await;
        if !native.is_empty() {
            return native;
        }
        match self.unifier.resolve_alias(name).await {
            Ok(model) => {
                let mut urls: Vec<String> = model
                    .source_endpoints
                    .iter()
                    .map(|s| s.endpoint_url.clone())
                    .collect();
                urls.sort();
                urls
            }
            Err(_) => Vec::new(),
        }
    }

    /// Intersection of the model's hosts with the repository's healthy set.
    pub async fn healthy_endpoints_for_model(
        &self,
        name: &str,
        repository: &dyn EndpointRepository,
    ) -> Vec<Endpoint> {
        let hosts: HashSet<String> = self.endpoints_for_model(name).await.into_iter().collect();
        repository
            .get_healthy()
            .into_iter()
            .filter(|e| hosts.contains(e.url_str()))
            .collect()
    }

    /// Unified models advertising a capability, spelling variants included.
    pub async fn models_by_capability(&self, requested: &str) -> Vec<UnifiedModel> {
        self.unifier
            .all()
            .await
            .into_iter()
            .filter(|model| {
                model
                    .capabilities
                    .iter()
                    .any(|cap| capability::matches(cap, requested))
            })
            .collect()
    }

    /// Produce routing candidates for `model` given the currently healthy
    /// fleet. Applies the alias expander (first expansion wins per
    /// endpoint), then delegates to the routing strategy.
    pub async fn routable_endpoints_for_model(
        &self,
        model: &str,
        healthy: &[Endpoint],
    ) -> Result<(Vec<Endpoint>, RoutingDecision), RoutingError> {
        let expansions = match &self.expander {
            Some(expander) => {
                let expanded = expander.expand(model);
                if expanded.is_empty() {
                    vec![model.to_string()]
                } else {
                    expanded
                }
            }
            None => vec![model.to_string()],
        };

        let mut model_endpoints: HashSet<String> = HashSet::new();
        for name in &expansions {
            for url in self.endpoints_for_model(name).await {
                // first expansion to claim an endpoint wins; later aliases
                // cannot re-claim it
                model_endpoints.insert(url);
            }
        }

        self.strategy
            .routable_endpoints(model, healthy, &model_endpoints)
    }

    pub async fn stats(&self) -> (RegistryStats, UnifierStats) {
        (self.base.stats().await, self.unifier.stats().await)
    }

    pub fn base(&self) -> &ModelRegistry {
        &self.base
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }
}
