//! Process-default settings loaded from the environment, plus the
//! three-layer (defaults < dashboard < request) config merge.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub vector_store_url: Option<String>,
    pub embedding_model: String,
    pub embedding_dim: usize,
    pub vector_topk: usize,
    pub mmr_lambda: f32,
    pub similarity_threshold: f32,
    pub batch_size: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vector_store_url: None,
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dim: 768,
            vector_topk: 30,
            mmr_lambda: 0.7,
            similarity_threshold: 0.3,
            batch_size: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub compression_ratio: f32,
    pub faithfulness_threshold: f32,
    pub allow_must_keep: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            compression_ratio: 0.5,
            faithfulness_threshold: 0.85,
            allow_must_keep: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub per_type_fractions: HashMap<String, f32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let mut fractions = HashMap::new();
        fractions.insert("doc".to_string(), 0.4);
        fractions.insert("assistant".to_string(), 0.3);
        fractions.insert("tool".to_string(), 0.2);
        fractions.insert("user".to_string(), 0.1);
        Self { per_type_fractions: fractions }
    }
}

/// The fully-resolved configuration a single request's pipeline run uses.
/// This is the merge output, not any one layer on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub max_input_tokens: u32,
    pub keep_last_n_turns: usize,
    pub safety_margin_tokens: u32,
    pub min_tokens_saved: u32,
    pub min_savings_ratio: f32,
    pub enable_tool_minimization: bool,
    pub tool_allowlist: Vec<String>,
    pub semantic: SemanticConfig,
    pub compression: CompressionConfig,
    pub budget: BudgetConfig,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 8000,
            keep_last_n_turns: 2,
            safety_margin_tokens: 300,
            min_tokens_saved: 0,
            min_savings_ratio: 0.0,
            enable_tool_minimization: true,
            tool_allowlist: vec!["*".to_string()],
            semantic: SemanticConfig::default(),
            compression: CompressionConfig::default(),
            budget: BudgetConfig::default(),
        }
    }
}

/// Process-wide settings loaded once from the environment. This is the
/// lowest-precedence layer of the three-level merge.
#[derive(Debug, Clone)]
pub struct Settings {
    pub middleware_api_key: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub dashboard_base_url: Option<String>,
    pub dashboard_api_key: Option<String>,
    pub dashboard_enabled: bool,
    pub cache_ttl_secs: u64,
    pub log_level: String,
    pub run_migrations_on_startup: bool,
    pub base_config: ResolvedConfig,
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Settings {
    /// Load settings from the environment, having first loaded a local
    /// `.env` file if present (lowest-precedence source of all).
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let mut base = ResolvedConfig::default();
        base.max_input_tokens = env_num("MAX_INPUT_TOKENS", base.max_input_tokens);
        base.keep_last_n_turns = env_num("KEEP_LAST_N_TURNS", base.keep_last_n_turns);
        base.safety_margin_tokens = env_num("SAFETY_MARGIN_TOKENS", base.safety_margin_tokens);
        base.min_tokens_saved = env_num("MIN_TOKENS_SAVED", base.min_tokens_saved);
        base.min_savings_ratio = env_num("MIN_SAVINGS_RATIO", base.min_savings_ratio);
        base.semantic.enabled = env_bool("SEMANTIC_ENABLED", base.semantic.enabled);
        base.semantic.vector_store_url = env_var("VECTOR_STORE_URL");
        base.compression.enabled = env_bool("COMPRESSION_ENABLED", base.compression.enabled);

        Ok(Self {
            middleware_api_key: env_var("MIDDLEWARE_API_KEY").unwrap_or_else(|| "dev-key-12345".to_string()),
            openai_api_key: env_var("OPENAI_API_KEY"),
            anthropic_api_key: env_var("ANTHROPIC_API_KEY"),
            dashboard_base_url: env_var("DASHBOARD_BASE_URL"),
            dashboard_api_key: env_var("DASHBOARD_API_KEY"),
            dashboard_enabled: env_bool("DASHBOARD_ENABLED", false),
            cache_ttl_secs: env_num("CACHE_TTL_SECS", 600),
            log_level: env_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            run_migrations_on_startup: env_bool("RUN_MIGRATIONS_ON_STARTUP", false),
            base_config: base,
        })
    }

    pub fn dashboard_api_key(&self) -> &str {
        self.dashboard_api_key.as_deref().unwrap_or(&self.middleware_api_key)
    }
}

/// A partial config overlay — every field optional, only present keys
/// override the layer beneath. Used for both dashboard config and
/// request-scoped `user_prefs_overrides`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverlay(pub serde_json::Map<String, Value>);

/// Recursively merge `overlay` into `target`: matching nested objects are
/// merged key-by-key rather than replaced wholesale, so an overlay that
/// only sets e.g. `compression.compression_ratio` doesn't blow away
/// `compression.enabled`. `null` never overrides, at any depth.
fn deep_merge(target: &mut Value, overlay: &Value) {
    match (target, overlay) {
        (Value::Object(target_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match target_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target_slot, value) => {
            if !value.is_null() {
                *target_slot = value.clone();
            }
        }
    }
}

fn apply_overlay(merged: &mut Value, overlay: &ConfigOverlay) {
    if !merged.is_object() {
        return;
    }
    deep_merge(merged, &Value::Object(overlay.0.clone()));
}

/// Map dashboard-style field names (camelCase, product-facing) to the
/// internal `ResolvedConfig` field names, including the qualitative
/// aggressiveness → numeric compression_target special case.
pub fn map_dashboard_fields(dashboard: &serde_json::Map<String, Value>) -> ConfigOverlay {
    let mut mapped = serde_json::Map::new();
    let field_mapping: &[(&str, &str)] = &[
        ("maxHistoryMessages", "keep_last_n_turns"),
        ("maxTokensPerCall", "max_input_tokens"),
        ("maxInputTokens", "max_input_tokens"),
    ];
    for (dashboard_key, internal_key) in field_mapping {
        if let Some(value) = dashboard.get(*dashboard_key) {
            mapped.insert(internal_key.to_string(), value.clone());
        }
    }
    if let Some(Value::String(aggressiveness)) = dashboard.get("aggressiveness") {
        let target = match aggressiveness.as_str() {
            "low" => 0.3,
            "high" => 0.7,
            _ => 0.5,
        };
        mapped.insert("compression_target".to_string(), Value::from(target));
        mapped
            .entry("compression")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(Value::Object(compression)) = mapped.get_mut("compression") {
            compression.insert("compression_ratio".to_string(), Value::from(target));
        }
    }
    ConfigOverlay(mapped)
}

/// Merge base (process defaults) < dashboard < request overrides.
/// `null`/absent values never override a lower layer.
pub fn merge_config(
    base: &ResolvedConfig,
    dashboard: Option<&ConfigOverlay>,
    request: Option<&ConfigOverlay>,
) -> Result<ResolvedConfig, ConfigError> {
    let mut merged = serde_json::to_value(base).map_err(|e| ConfigError::InvalidValue {
        key: "base_config".to_string(),
        value: e.to_string(),
    })?;

    if let Some(overlay) = dashboard {
        apply_overlay(&mut merged, overlay);
    }
    if let Some(overlay) = request {
        apply_overlay(&mut merged, overlay);
    }

    serde_json::from_value(merged).map_err(|e| ConfigError::InvalidValue {
        key: "merged_config".to_string(),
        value: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(pairs: &[(&str, Value)]) -> ConfigOverlay {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.clone());
        }
        ConfigOverlay(map)
    }

    #[test]
    fn request_overrides_win_over_dashboard() {
        let base = ResolvedConfig::default();
        let dashboard = overlay(&[("max_input_tokens", Value::from(4000))]);
        let request = overlay(&[("max_input_tokens", Value::from(2000))]);
        let merged = merge_config(&base, Some(&dashboard), Some(&request)).unwrap();
        assert_eq!(merged.max_input_tokens, 2000);
    }

    #[test]
    fn null_values_do_not_override() {
        let base = ResolvedConfig::default();
        let request = overlay(&[("max_input_tokens", Value::Null)]);
        let merged = merge_config(&base, None, Some(&request)).unwrap();
        assert_eq!(merged.max_input_tokens, base.max_input_tokens);
    }

    #[test]
    fn dashboard_alone_applies_over_base() {
        let base = ResolvedConfig::default();
        let dashboard = overlay(&[("keep_last_n_turns", Value::from(7))]);
        let merged = merge_config(&base, Some(&dashboard), None).unwrap();
        assert_eq!(merged.keep_last_n_turns, 7);
    }

    #[test]
    fn aggressiveness_maps_to_compression_ratio() {
        let mut dashboard = serde_json::Map::new();
        dashboard.insert("aggressiveness".to_string(), Value::from("high"));
        let mapped = map_dashboard_fields(&dashboard);
        let base = ResolvedConfig::default();
        let merged = merge_config(&base, Some(&mapped), None).unwrap();
        assert_eq!(merged.compression.compression_ratio, 0.7);
    }

    #[test]
    fn nested_overlay_merges_instead_of_replacing_sibling_fields() {
        // A `compression: {compression_ratio: ...}` overlay must not drop
        // `compression.enabled`/`faithfulness_threshold`/`allow_must_keep`
        // from the base layer beneath it.
        let mut base = ResolvedConfig::default();
        base.compression.enabled = true;
        base.compression.faithfulness_threshold = 0.9;
        let mut compression_overlay = serde_json::Map::new();
        compression_overlay.insert("compression_ratio".to_string(), Value::from(0.7));
        let mut dashboard = serde_json::Map::new();
        dashboard.insert("compression".to_string(), Value::Object(compression_overlay));
        let merged = merge_config(&base, Some(&ConfigOverlay(dashboard)), None).unwrap();
        assert_eq!(merged.compression.compression_ratio, 0.7);
        assert!(merged.compression.enabled);
        assert_eq!(merged.compression.faithfulness_threshold, 0.9);
    }

    #[test]
    fn no_overlays_returns_base_unchanged() {
        let base = ResolvedConfig::default();
        let merged = merge_config(&base, None, None).unwrap();
        assert_eq!(merged.max_input_tokens, base.max_input_tokens);
        assert_eq!(merged.keep_last_n_turns, base.keep_last_n_turns);
    }
}
