//! # Configuration Management Module
//!
//! TOML configuration for the Fleetgate proxy: the listening socket, the
//! backend fleet, probe cadences, the selector strategy and catalog
//! discovery. Loading goes through three steps (parse, environment
//! overrides, validation) and the server refuses to start unless all three
//! pass.
//!
//! ## Configuration File Example
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//! request_timeout = "120s"
//!
//! [proxy]
//! strategy = "priority"
//!
//! [health]
//! worker_count = 10
//! base_queue_size = 50
//! queue_scale_factor = 2
//! max_backoff = "60s"
//! max_backoff_multiplier = 16
//!
//! [discovery]
//! interval = "30s"
//!
//! [[endpoints]]
//! name = "local-ollama"
//! url = "http://localhost:11434"
//! provider = "ollama"
//! priority = 100
//! check_interval = "5s"
//! check_timeout = "2s"
//! # health_check_url defaults to the endpoint url
//! ```
//!
//! ## Environment Variables
//!
//! - `FLEETGATE_HOST`: override the bind host
//! - `FLEETGATE_PORT`: override the bind port
//! - `FLEETGATE_STRATEGY`: override the selector strategy

use fleetgate_core::duration_serde;
use fleetgate_core::endpoint::Endpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound on a proxied request, including model inference time
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Selector strategy name resolved through the factory
    pub strategy: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            strategy: "priority".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub worker_count: usize,
    pub base_queue_size: usize,
    pub queue_scale_factor: usize,
    #[serde(with = "duration_serde")]
    pub max_backoff: Duration,
    pub max_backoff_multiplier: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            base_queue_size: 50,
            queue_scale_factor: 2,
            max_backoff: Duration::from_secs(60),
            max_backoff_multiplier: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How often to refresh each endpoint's model catalog
    #[serde(with = "duration_serde")]
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    /// Defaults to `url` when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    /// Catalog dialect ("ollama", "lmstudio", "vllm", "openai")
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(with = "duration_serde", default = "default_check_interval")]
    pub check_interval: Duration,
    #[serde(with = "duration_serde", default = "default_check_timeout")]
    pub check_timeout: Duration,
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_priority() -> u32 {
    Endpoint::DEFAULT_PRIORITY
}
fn default_check_interval() -> Duration {
    Endpoint::DEFAULT_CHECK_INTERVAL
}
fn default_check_timeout() -> Duration {
    Endpoint::DEFAULT_CHECK_TIMEOUT
}

impl Config {
    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("cannot read config file {:?}: {e}", path.as_ref())
        })?;
        let mut config: Config = toml::from_str(&raw)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(host) = env::var("FLEETGATE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("FLEETGATE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| anyhow::anyhow!("FLEETGATE_PORT must be a port number, got {port:?}"))?;
        }
        if let Ok(strategy) = env::var("FLEETGATE_STRATEGY") {
            self.proxy.strategy = strategy;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.endpoints.is_empty() {
            anyhow::bail!("at least one endpoint must be configured");
        }
        let mut seen: HashSet<String> = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                anyhow::bail!("endpoint name must not be empty");
            }
            let url: Url = endpoint
                .url
                .parse()
                .map_err(|e| anyhow::anyhow!("endpoint {:?} has a bad url: {e}", endpoint.name))?;
            if url.host_str().is_none() {
                anyhow::bail!("endpoint {:?} url must have a host", endpoint.name);
            }
            if let Some(health_url) = &endpoint.health_check_url {
                health_url.parse::<Url>().map_err(|e| {
                    anyhow::anyhow!("endpoint {:?} has a bad health url: {e}", endpoint.name)
                })?;
            }
            if !seen.insert(url.as_str().to_string()) {
                anyhow::bail!("duplicate endpoint url: {}", url);
            }
            if endpoint.check_interval < Duration::from_millis(100) {
                anyhow::bail!(
                    "endpoint {:?} check_interval below 100ms would flood the backend",
                    endpoint.name
                );
            }
        }
        if self.health.worker_count == 0 {
            anyhow::bail!("health.worker_count must be at least 1");
        }
        if self.health.max_backoff_multiplier == 0 {
            anyhow::bail!("health.max_backoff_multiplier must be at least 1");
        }
        Ok(())
    }

    /// Materialise the configured fleet as core endpoint records.
    pub fn to_endpoints(&self) -> anyhow::Result<Vec<Endpoint>> {
        self.endpoints
            .iter()
            .map(|config| {
                let url: Url = config.url.parse()?;
                let mut endpoint = Endpoint::new(config.name.clone(), url, config.provider.clone());
                if let Some(health_url) = &config.health_check_url {
                    endpoint.health_check_url = health_url.parse()?;
                }
                endpoint.priority = config.priority;
                endpoint.check_interval = config.check_interval;
                endpoint.check_timeout = config.check_timeout;
                Ok(endpoint)
            })
            .collect()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            proxy: ProxyConfig::default(),
            health: HealthConfig::default(),
            discovery: DiscoveryConfig::default(),
            endpoints: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        host = "0.0.0.0"
        port = 9090
        request_timeout = "90s"

        [proxy]
        strategy = "round-robin"

        [[endpoints]]
        name = "local-ollama"
        url = "http://localhost:11434"
        provider = "ollama"
        priority = 300
        check_interval = "5s"
        check_timeout = "2s"

        [[endpoints]]
        name = "gpu-box"
        url = "http://10.0.0.5:8000"
        health_check_url = "http://10.0.0.5:8000/health"
        provider = "vllm"
    "#;

    #[test]
    fn parses_sample_config() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.proxy.strategy, "round-robin");
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].priority, 300);
        // defaults fill the second endpoint
        assert_eq!(config.endpoints[1].priority, Endpoint::DEFAULT_PRIORITY);
        assert_eq!(
            config.endpoints[1].check_interval,
            Endpoint::DEFAULT_CHECK_INTERVAL
        );
    }

    #[test]
    fn to_endpoints_maps_fields() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let endpoints = config.to_endpoints().unwrap();
        assert_eq!(endpoints[0].name, "local-ollama");
        assert_eq!(endpoints[0].provider, "ollama");
        assert_eq!(endpoints[0].health_check_url.as_str(), "http://localhost:11434/");
        assert_eq!(
            endpoints[1].health_check_url.as_str(),
            "http://10.0.0.5:8000/health"
        );
    }

    #[test]
    fn rejects_empty_fleet_and_duplicates() {
        let empty: Config = toml::from_str("").unwrap();
        assert!(empty.validate().is_err());

        let dup = r#"
            [[endpoints]]
            name = "a"
            url = "http://localhost:11434"
            [[endpoints]]
            name = "b"
            url = "http://localhost:11434"
        "#;
        let config: Config = toml::from_str(dup).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_probe_flooding() {
        let fast = r#"
            [[endpoints]]
            name = "a"
            url = "http://localhost:11434"
            check_interval = "10ms"
        "#;
        let config: Config = toml::from_str(fast).unwrap();
        assert!(config.validate().is_err());
    }
}
