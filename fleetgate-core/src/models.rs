//! # Model Records
//!
//! This module defines the model catalog data structures shared by the
//! registry and the unifier. Two layers exist on purpose:
//!
//! - **ModelInfo** is the native record exactly as an endpoint reported it.
//!   The registry stores these verbatim; beyond `name` they are opaque.
//! - **UnifiedModel** is the canonical, provider-agnostic record the unifier
//!   derives from native records. One unified model may span several
//!   endpoints that each advertise it under a different native name
//!   ("llama3:8b" on Ollama, "meta-llama-3-8b-instruct" on LM Studio).
//!
//! ## Capabilities
//!
//! Capability names are plain strings so providers can report anything, but
//! the well-known set lives in [`capability`] and lookups go through
//! [`capability::matches`], which folds the common spelling variants
//! together (`embedding`/`embeddings`, `vision`/`image`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A model exactly as one endpoint reported it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Native model name; the only field the registry interprets
    pub name: String,
    /// On-disk size in bytes, when the provider reports one
    #[serde(default)]
    pub size: u64,
    /// Provider's own type tag ("llm", "embedding", ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When this record was last confirmed by the endpoint's catalog
    pub last_seen: DateTime<Utc>,
    /// Provider-specific leftovers, kept verbatim
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, serde_json::Value>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            model_type: None,
            description: None,
            last_seen: Utc::now(),
            details: HashMap::new(),
        }
    }
}

/// A provider-specific name for a unified model.
///
/// Order matters: aliases are kept in insertion order and the first alias is
/// the one shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAlias {
    /// The name as requested/reported
    pub name: String,
    /// Provider tag the name came from ("ollama", "lmstudio", ...)
    pub source: String,
}

/// One endpoint's view of a unified model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEndpoint {
    pub endpoint_url: String,
    pub endpoint_name: String,
    /// The name this endpoint advertises the model under
    pub native_name: String,
    /// Provider-reported availability state ("available", "loaded", ...)
    pub state: String,
    /// On-disk size at this endpoint, bytes
    pub disk_size: u64,
}

/// Canonical, provider-agnostic model record.
///
/// Invariants maintained by the unifier:
/// - `id` is stable: the same native input always canonicalises to it
/// - `source_endpoints` is never empty for a model held in the global index
/// - `aliases` preserves insertion order with `(name, source)` duplicates
///   collapsed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedModel {
    /// Stable canonical ID, e.g. `llama3:8b:q4km`
    pub id: String,
    /// Model family ("llama3", "mistral", "phi")
    pub family: String,
    /// Variant within the family ("instruct", "chat"), when detectable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Human form of the parameter count ("8b", "70b")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    /// Parameter count in units, when the size token parses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_count: Option<u64>,
    /// Quantization tag, normalised lowercase without separators ("q4km")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    /// Container format ("gguf", "safetensors")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_length: Option<u64>,
    pub aliases: Vec<ModelAlias>,
    pub source_endpoints: Vec<SourceEndpoint>,
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Total bytes across distinct endpoints
    pub disk_size: u64,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template_id: Option<String>,
}

impl UnifiedModel {
    /// Whether any alias matches `name` exactly.
    pub fn has_alias(&self, name: &str) -> bool {
        self.id == name || self.aliases.iter().any(|a| a.name == name)
    }

    /// Push an alias, collapsing `(name, source)` duplicates and keeping
    /// insertion order.
    pub fn add_alias(&mut self, alias: ModelAlias) {
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }

    /// Upsert a source endpoint by URL; a later report from the same
    /// endpoint replaces the earlier one.
    pub fn upsert_source(&mut self, source: SourceEndpoint) {
        match self
            .source_endpoints
            .iter_mut()
            .find(|s| s.endpoint_url == source.endpoint_url)
        {
            Some(existing) => *existing = source,
            None => self.source_endpoints.push(source),
        }
        self.disk_size = self.source_endpoints.iter().map(|s| s.disk_size).sum();
    }

    /// Remove one endpoint's view; returns true when no source remains and
    /// the model should be dropped from the index.
    pub fn remove_source(&mut self, endpoint_url: &str) -> bool {
        self.source_endpoints.retain(|s| s.endpoint_url != endpoint_url);
        self.disk_size = self.source_endpoints.iter().map(|s| s.disk_size).sum();
        self.source_endpoints.is_empty()
    }
}

/// Well-known capability names and their spelling variants.
pub mod capability {
    pub const CHAT: &str = "chat";
    pub const COMPLETION: &str = "completion";
    pub const EMBEDDINGS: &str = "embeddings";
    pub const VISION: &str = "vision";
    pub const CODE: &str = "code";
    pub const FUNCTION_CALLING: &str = "function_calling";
    pub const STREAMING: &str = "streaming";

    /// Fold a requested capability name onto its canonical spelling.
    pub fn canonical(name: &str) -> &str {
        match name {
            "chat" | "chat_completion" => CHAT,
            "completion" | "text_completion" => COMPLETION,
            "embedding" | "embeddings" => EMBEDDINGS,
            "vision" | "image" => VISION,
            "code" | "code_generation" => CODE,
            "function" | "function_calling" | "tools" => FUNCTION_CALLING,
            "streaming" | "stream" => STREAMING,
            other => other,
        }
    }

    /// Whether a model capability satisfies a requested one, spelling
    /// variants included.
    pub fn matches(model_capability: &str, requested: &str) -> bool {
        canonical(model_capability) == canonical(requested)
    }
}

/// Aggregate registry counters, recomputed on each mutation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_endpoints: usize,
    /// Distinct native model names across the fleet
    pub total_models: usize,
    pub models_per_endpoint: HashMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Unifier counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UnifierStats {
    pub total_unified_models: usize,
    pub total_aliases: usize,
    /// Unification passes since startup
    pub unification_runs: u64,
}
