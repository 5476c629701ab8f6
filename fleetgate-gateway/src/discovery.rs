//! # Catalog Discovery
//!
//! Periodically asks each routable endpoint what models it hosts and feeds
//! the answers into the unified registry. The fetch is shape-tolerant: it
//! understands both the OpenAI-style `{"data": [{"id": ...}]}` listing
//! (vLLM, LM Studio, OpenAI-compatible servers) and the Ollama-style
//! `{"models": [{"name": ..., "size": ...}]}` listing, and ignores fields it
//! does not know.
//!
//! A fetch failure leaves the endpoint's previous catalog in place; the
//! registry only changes on a successful (possibly empty) listing.

use chrono::Utc;
use fleetgate_core::endpoint::Endpoint;
use fleetgate_core::models::ModelInfo;
use fleetgate_core::registry::UnifiedRegistry;
use fleetgate_core::repository::EndpointRepository;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Model-listing paths per provider dialect.
fn catalog_path(provider: &str) -> &'static str {
    match provider {
        "ollama" => "/api/tags",
        _ => "/v1/models",
    }
}

/// Parse whichever listing shape the endpoint answered with.
pub fn parse_catalog(body: &Value) -> Vec<ModelInfo> {
    let entries = body
        .get("models")
        .or_else(|| body.get("data"))
        .and_then(Value::as_array);
    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry
                .get("name")
                .or_else(|| entry.get("id"))
                .and_then(Value::as_str)?;
            let mut model = ModelInfo::new(name);
            model.size = entry.get("size").and_then(Value::as_u64).unwrap_or(0);
            model.last_seen = Utc::now();
            let mut details: HashMap<String, Value> = HashMap::new();
            for key in ["format", "state", "max_context_length", "family"] {
                if let Some(value) = entry.get(key) {
                    details.insert(key.to_string(), value.clone());
                }
            }
            // ollama nests format under "details"
            if let Some(nested) = entry.get("details") {
                if let Some(format) = nested.get("format") {
                    details.entry("format".to_string()).or_insert(format.clone());
                }
            }
            model.details = details;
            Some(model)
        })
        .collect()
}

/// The poller task owner.
pub struct CatalogPoller {
    repository: Arc<dyn EndpointRepository>,
    registry: Arc<UnifiedRegistry>,
    http: reqwest::Client,
    interval: Duration,
}

impl CatalogPoller {
    pub fn new(
        repository: Arc<dyn EndpointRepository>,
        registry: Arc<UnifiedRegistry>,
        http: reqwest::Client,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            registry,
            http,
            interval,
        }
    }

    /// Spawn the polling loop; it stops when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                self.refresh_fleet().await;
            }
        })
    }

    /// One pass over the routable fleet.
    pub async fn refresh_fleet(&self) {
        for endpoint in self.repository.get_routable() {
            if let Err(err) = self.refresh_endpoint(&endpoint).await {
                tracing::debug!(
                    endpoint = %endpoint.name,
                    url = endpoint.url_str(),
                    error = %err,
                    "catalog refresh failed, keeping previous catalog"
                );
            }
        }
    }

    async fn refresh_endpoint(&self, endpoint: &Endpoint) -> anyhow::Result<()> {
        let url = endpoint
            .url
            .join(catalog_path(&endpoint.provider).trim_start_matches('/'))?;
        let body: Value = self
            .http
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let models = parse_catalog(&body);
        tracing::debug!(
            endpoint = %endpoint.name,
            models = models.len(),
            "refreshed endpoint catalog"
        );
        self.registry.register_models(endpoint, models).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::registry::{ModelRegistry, ModelUnifier};
    use fleetgate_core::repository::InMemoryEndpointRepository;
    use fleetgate_core::routing::StrictRoutingStrategy;
    use fleetgate_core::EndpointStatus;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_ollama_listing() {
        let body = json!({
            "models": [
                {"name": "llama3:8b", "size": 4661211808u64, "details": {"format": "gguf"}},
                {"name": "nomic-embed-text", "size": 274302450u64}
            ]
        });
        let models = parse_catalog(&body);
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "llama3:8b");
        assert_eq!(models[0].size, 4661211808);
        assert_eq!(models[0].details["format"], json!("gguf"));
    }

    #[test]
    fn parses_openai_listing() {
        let body = json!({
            "object": "list",
            "data": [
                {"id": "mistralai/Mistral-7B-Instruct", "object": "model"},
            ]
        });
        let models = parse_catalog(&body);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "mistralai/Mistral-7B-Instruct");
    }

    #[test]
    fn tolerates_garbage() {
        assert!(parse_catalog(&json!({"error": "nope"})).is_empty());
        assert!(parse_catalog(&json!([1, 2, 3])).is_empty());
        // entries without a usable name are skipped, not fatal
        let body = json!({"models": [{"size": 1}, {"name": "ok"}]});
        assert_eq!(parse_catalog(&body).len(), 1);
    }

    #[tokio::test]
    async fn refresh_registers_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3:8b", "size": 100}]
            })))
            .mount(&server)
            .await;

        let repo = Arc::new(InMemoryEndpointRepository::new());
        let mut endpoint = Endpoint::new("a", server.uri().parse().unwrap(), "ollama");
        endpoint.status = EndpointStatus::Healthy;
        repo.replace_all(vec![endpoint]);

        let registry = Arc::new(UnifiedRegistry::new(
            ModelRegistry::new(),
            ModelUnifier::default(),
            Arc::new(StrictRoutingStrategy),
        ));
        let poller = CatalogPoller::new(
            repo.clone(),
            registry.clone(),
            reqwest::Client::new(),
            Duration::from_secs(30),
        );
        poller.refresh_fleet().await;

        assert!(registry.is_model_available("llama3:8b").await);
        let (stats, unifier_stats) = registry.stats().await;
        assert_eq!(stats.total_endpoints, 1);
        assert_eq!(unifier_stats.total_unified_models, 1);
    }
}
