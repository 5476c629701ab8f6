//! # Model Unifier
//!
//! Folds provider-specific catalogs into canonical
//! [`UnifiedModel`](crate::models::UnifiedModel) records. The same weights
//! served by an Ollama box as `llama3:8b` and by an LM Studio box as
//! `llama-3-8b` should count as one model with two source endpoints.
//!
//! ## Canonicalisation
//!
//! Deterministic by construction: the canonical ID is derived purely from
//! the native name and the provider profile, so the same input always lands
//! on the same ID. The name is lowercased, the org prefix (`meta/...`) is
//! stripped when the profile says so, and the remaining tokens are scanned
//! for a parameter-size token (`8b`, `0.5b`, `700m`), a quantization token
//! (`q4_k_m`, `fp16`, ...) and a variant keyword (`instruct`, `chat`, ...).
//! Whatever remains is the family, with bare digit tokens merged into the
//! preceding word so `llama-3` and `llama3` agree.
//!
//! ID layout: `family[:parameter_size][:quant]`, quant normalised to
//! lowercase without separators (`q4_k_m` → `q4km`).
//!
//! ## Concurrency
//!
//! The global unified index lives behind a single async mutex. Catalog
//! refreshes for different endpoints serialise on it, which keeps the
//! cross-endpoint invariants (each `(endpoint, native name)` under exactly
//! one model, no empty `source_endpoints`) trivially true.

use crate::endpoint::Endpoint;
use crate::error::RegistryError;
use crate::models::{capability, ModelAlias, ModelInfo, SourceEndpoint, UnifiedModel, UnifierStats};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Canonicalisation rules for one provider dialect.
///
/// Supplied as data; the unifier itself has no provider-specific branches.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    /// Provider tag ("ollama", "lmstudio", "vllm", "openai")
    pub source: String,
    /// Container format implied by the provider when the name says nothing
    pub default_format: Option<String>,
    /// Whether `org/name` prefixes should be stripped before parsing
    pub strip_org_prefix: bool,
}

/// Thread-safe provider-tag → profile lookup table.
#[derive(Debug, Clone)]
pub struct ProviderProfileRegistry {
    profiles: Arc<HashMap<String, ProviderProfile>>,
    fallback: ProviderProfile,
}

impl Default for ProviderProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderProfileRegistry {
    /// Profiles for the backends Fleetgate ships support for.
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        for (source, default_format, strip_org_prefix) in [
            ("ollama", Some("gguf"), false),
            ("lmstudio", Some("gguf"), true),
            ("llamacpp", Some("gguf"), true),
            ("vllm", Some("safetensors"), true),
            ("openai", None, true),
        ] {
            profiles.insert(
                source.to_string(),
                ProviderProfile {
                    source: source.to_string(),
                    default_format: default_format.map(str::to_string),
                    strip_org_prefix,
                },
            );
        }
        Self {
            profiles: Arc::new(profiles),
            fallback: ProviderProfile {
                source: "unknown".to_string(),
                default_format: None,
                strip_org_prefix: true,
            },
        }
    }

    pub fn get(&self, source: &str) -> &ProviderProfile {
        self.profiles.get(source).unwrap_or(&self.fallback)
    }
}

/// Pieces extracted from a native name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalName {
    pub id: String,
    pub family: String,
    pub variant: Option<String>,
    pub parameter_size: Option<String>,
    pub parameter_count: Option<u64>,
    pub quantization: Option<String>,
}

const VARIANT_KEYWORDS: &[&str] = &[
    "instruct", "chat", "base", "code", "vision", "mini", "it", "text",
];
const QUANT_KEYWORDS: &[&str] = &[
    "fp16", "fp32", "f16", "f32", "bf16", "int8", "int4", "awq", "gptq", "gguf",
];

fn is_parameter_size(token: &str) -> bool {
    let Some(unit) = token.chars().last() else {
        return false;
    };
    if unit != 'b' && unit != 'm' {
        return false;
    }
    let digits = &token[..token.len() - 1];
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn parameter_count(size: &str) -> Option<u64> {
    let unit = size.chars().last()?;
    let value: f64 = size[..size.len() - 1].parse().ok()?;
    let scale = match unit {
        'b' => 1_000_000_000f64,
        'm' => 1_000_000f64,
        _ => return None,
    };
    Some((value * scale) as u64)
}

fn is_quantization(token: &str) -> bool {
    if QUANT_KEYWORDS.contains(&token) {
        return true;
    }
    // q4, q4_k_m, q8_0 style tags arrive as a leading "q<digit>" token once
    // separators are split away; match the joined form too
    let mut chars = token.chars();
    chars.next() == Some('q') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Derive the canonical identity for one native name. Pure and total;
/// garbage in produces a (stable) garbage family rather than an error.
pub fn canonicalise(native_name: &str, profile: &ProviderProfile) -> CanonicalName {
    let mut name = native_name.trim().to_ascii_lowercase();
    if profile.strip_org_prefix {
        if let Some((_, rest)) = name.split_once('/') {
            name = rest.to_string();
        }
    }

    // "q4_k_m" must survive tokenisation as one unit; fold underscores away
    // before splitting on the remaining separators
    let glued = name.replace('_', "");
    let tokens = glued.split([':', '-', ' ', '@']);

    let mut family_parts: Vec<String> = Vec::new();
    let mut variant = None;
    let mut parameter_size = None;
    let mut quantization = None;
    for token in tokens {
        if token.is_empty() {
            continue;
        }
        if parameter_size.is_none() && is_parameter_size(token) {
            parameter_size = Some(token.to_string());
        } else if quantization.is_none() && is_quantization(token) {
            quantization = Some(token.to_string());
        } else if variant.is_none() && VARIANT_KEYWORDS.contains(&token) {
            variant = Some(token.to_string());
        } else if token.chars().all(|c| c.is_ascii_digit()) {
            // bare version digits glue onto the preceding word: llama + 3
            match family_parts.last_mut() {
                Some(last) => last.push_str(token),
                None => family_parts.push(token.to_string()),
            }
        } else {
            family_parts.push(token.to_string());
        }
    }

    let family = if family_parts.is_empty() {
        glued.clone()
    } else {
        family_parts.join("-")
    };

    let mut id = family.clone();
    if let Some(size) = &parameter_size {
        id.push(':');
        id.push_str(size);
    }
    if let Some(quant) = &quantization {
        id.push(':');
        id.push_str(quant);
    }

    let parameter_count = parameter_size.as_deref().and_then(parameter_count);
    CanonicalName {
        id,
        family,
        variant,
        parameter_size,
        parameter_count,
        quantization,
    }
}

fn infer_capabilities(model: &ModelInfo) -> Vec<String> {
    let name = model.name.to_ascii_lowercase();
    let type_tag = model
        .model_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if name.contains("embed") || type_tag.contains("embed") {
        return vec![capability::EMBEDDINGS.to_string()];
    }
    let mut caps = vec![
        capability::CHAT.to_string(),
        capability::COMPLETION.to_string(),
        capability::STREAMING.to_string(),
    ];
    if name.contains("llava") || name.contains("vision") {
        caps.push(capability::VISION.to_string());
    }
    if name.contains("code") {
        caps.push(capability::CODE.to_string());
    }
    caps
}

#[derive(Default)]
struct UnifierIndex {
    by_id: HashMap<String, UnifiedModel>,
    alias_to_id: HashMap<String, String>,
    /// endpoint URL → unified IDs it currently contributes to
    endpoint_ids: HashMap<String, HashSet<String>>,
}

impl UnifierIndex {
    fn index_aliases(&mut self, model: &UnifiedModel) {
        for alias in &model.aliases {
            self.alias_to_id
                .entry(alias.name.clone())
                .or_insert_with(|| model.id.clone());
        }
    }

    fn drop_model(&mut self, id: &str) {
        if let Some(model) = self.by_id.remove(id) {
            for alias in &model.aliases {
                if self.alias_to_id.get(&alias.name).map(String::as_str) == Some(id) {
                    self.alias_to_id.remove(&alias.name);
                }
            }
        }
    }

    fn strip_endpoint_from(&mut self, id: &str, url: &str) {
        let became_empty = match self.by_id.get_mut(id) {
            Some(model) => model.remove_source(url),
            None => false,
        };
        if became_empty {
            self.drop_model(id);
        }
    }
}

/// The unifier: canonicalisation plus the global unified index.
pub struct ModelUnifier {
    profiles: ProviderProfileRegistry,
    index: Mutex<UnifierIndex>,
    unification_runs: AtomicU64,
}

impl Default for ModelUnifier {
    fn default() -> Self {
        Self::new(ProviderProfileRegistry::builtin())
    }
}

impl ModelUnifier {
    pub fn new(profiles: ProviderProfileRegistry) -> Self {
        Self {
            profiles,
            index: Mutex::new(UnifierIndex::default()),
            unification_runs: AtomicU64::new(0),
        }
    }

    /// Produce one unified record per native model, each carrying a single
    /// source endpoint. Pure with respect to the global index.
    pub fn unify_models(&self, models: &[ModelInfo], endpoint: &Endpoint) -> Vec<UnifiedModel> {
        let profile = self.profiles.get(&endpoint.provider);
        models
            .iter()
            .map(|model| self.unify_one(model, endpoint, profile))
            .collect()
    }

    fn unify_one(
        &self,
        model: &ModelInfo,
        endpoint: &Endpoint,
        profile: &ProviderProfile,
    ) -> UnifiedModel {
        let canonical = canonicalise(&model.name, profile);
        let state = model
            .details
            .get("state")
            .and_then(|v| v.as_str())
            .unwrap_or("available")
            .to_string();
        let format = model
            .details
            .get("format")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| profile.default_format.clone());
        let max_context_length = model
            .details
            .get("max_context_length")
            .and_then(|v| v.as_u64());

        UnifiedModel {
            id: canonical.id,
            family: canonical.family,
            variant: canonical.variant,
            parameter_size: canonical.parameter_size,
            parameter_count: canonical.parameter_count,
            quantization: canonical.quantization.map(|q| q.replace('_', "")),
            format,
            max_context_length,
            aliases: vec![ModelAlias {
                name: model.name.clone(),
                source: profile.source.clone(),
            }],
            source_endpoints: vec![SourceEndpoint {
                endpoint_url: endpoint.url_str().to_string(),
                endpoint_name: endpoint.name.clone(),
                native_name: model.name.clone(),
                state,
                disk_size: model.size,
            }],
            capabilities: infer_capabilities(model),
            metadata: HashMap::new(),
            disk_size: model.size,
            last_seen: model.last_seen,
            prompt_template_id: None,
        }
    }

    /// Fold a group of unified records sharing an ID into one.
    ///
    /// Aliases union by `(name, source)` in insertion order, source
    /// endpoints union by URL with the later report winning, capabilities
    /// union, `last_seen` takes the latest, and disk size re-sums across
    /// distinct endpoints.
    pub fn merge_unified_models(&self, group: Vec<UnifiedModel>) -> Option<UnifiedModel> {
        let mut iter = group.into_iter();
        let mut merged = iter.next()?;
        for model in iter {
            debug_assert_eq!(merged.id, model.id);
            for alias in model.aliases {
                merged.add_alias(alias);
            }
            for source in model.source_endpoints {
                merged.upsert_source(source);
            }
            for cap in model.capabilities {
                if !merged.capabilities.contains(&cap) {
                    merged.capabilities.push(cap);
                }
            }
            if model.last_seen > merged.last_seen {
                merged.last_seen = model.last_seen;
            }
            if merged.max_context_length.is_none() {
                merged.max_context_length = model.max_context_length;
            }
        }
        Some(merged)
    }

    /// Unify an endpoint's catalog and merge it into the global index,
    /// retiring this endpoint's contributions to models it no longer
    /// reports. The whole refresh runs under the unifier mutex.
    pub async fn apply_endpoint(&self, endpoint: &Endpoint, models: &[ModelInfo]) {
        let unified = self.unify_models(models, endpoint);
        let url = endpoint.url_str().to_string();
        let mut index = self.index.lock().await;

        let new_ids: HashSet<String> = unified.iter().map(|m| m.id.clone()).collect();
        let old_ids = index.endpoint_ids.remove(&url).unwrap_or_default();
        for stale in old_ids.difference(&new_ids) {
            let stale = stale.clone();
            index.strip_endpoint_from(&stale, &url);
        }

        for model in unified {
            let id = model.id.clone();
            let merged = match index.by_id.remove(&id) {
                Some(existing) => match self.merge_unified_models(vec![existing, model]) {
                    Some(merged) => merged,
                    None => continue,
                },
                None => model,
            };
            index.index_aliases(&merged);
            index.by_id.insert(id, merged);
        }
        index.endpoint_ids.insert(url, new_ids);
        self.unification_runs.fetch_add(1, Ordering::Relaxed);
    }

    /// Strip a deregistered endpoint out of every unified model; models left
    /// with no sources are dropped.
    pub async fn remove_endpoint(&self, url: &str) {
        let mut index = self.index.lock().await;
        let Some(ids) = index.endpoint_ids.remove(url) else {
            return;
        };
        for id in ids {
            index.strip_endpoint_from(&id, url);
        }
    }

    /// Resolve a name against unified IDs first, then aliases.
    pub async fn resolve_alias(&self, name: &str) -> Result<UnifiedModel, RegistryError> {
        let index = self.index.lock().await;
        if let Some(model) = index.by_id.get(name) {
            return Ok(model.clone());
        }
        index
            .alias_to_id
            .get(name)
            .and_then(|id| index.by_id.get(id))
            .cloned()
            .ok_or_else(|| RegistryError::AliasNotFound {
                alias: name.to_string(),
            })
    }

    /// Every unified model, sorted by ID; a deep copy.
    pub async fn all(&self) -> Vec<UnifiedModel> {
        let index = self.index.lock().await;
        let mut models: Vec<UnifiedModel> = index.by_id.values().cloned().collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        models
    }

    pub async fn stats(&self) -> UnifierStats {
        let index = self.index.lock().await;
        UnifierStats {
            total_unified_models: index.by_id.len(),
            total_aliases: index.alias_to_id.len(),
            unification_runs: self.unification_runs.load(Ordering::Relaxed),
        }
    }
}
