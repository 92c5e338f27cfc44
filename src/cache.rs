//! Content-addressed memoization of end-to-end optimization results.
//! Keyed by a stable hash over the canonical serialization of every input
//! that can change the outcome; never fails the request on a backend error.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::canonicalize::{CanonicalizeInput, ToolOutput};
use crate::config::ResolvedConfig;
use crate::error::CacheError;
use crate::pipeline::OptimizeResult;

pub const DEFAULT_TTL_SECS: u64 = 600;

/// Canonical, order-preserving serialization of everything a cache key
/// depends on. `serde_json` on a fixed struct shape (not a loose `Value`
/// map) already gives us stable key ordering for the object fields that
/// matter; only `tools`, being caller-supplied JSON, could vary in field
/// order for semantically identical content, so we re-serialize it through
/// a canonical value walk before hashing.
#[derive(Serialize)]
struct CacheKeyInput<'a> {
    messages: &'a [crate::canonicalize::Message],
    tools: Option<serde_json::Value>,
    rag_context: &'a [crate::canonicalize::RagDoc],
    tool_outputs: &'a [ToolOutput],
    model: &'a str,
    config: &'a ResolvedConfig,
}

fn canonical_json(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(items) => serde_json::Value::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}

/// Compute the stable cache key for a request's full input surface.
pub fn compute_key(input: &CanonicalizeInput, model: &str, config: &ResolvedConfig) -> String {
    let key_input = CacheKeyInput {
        messages: &input.messages,
        tools: input.tools.as_ref().map(canonical_json),
        rag_context: &input.rag_context,
        tool_outputs: &input.tool_outputs,
        model,
        config,
    };
    let serialized = serde_json::to_string(&key_input).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Pluggable so a distributed cache (Redis, etc.) can swap in behind the
/// same interface without touching the orchestrator.
#[async_trait::async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<OptimizeResult>, CacheError>;

    async fn set(&self, key: &str, value: OptimizeResult, ttl: Duration) -> Result<(), CacheError>;
}

#[async_trait::async_trait]
impl ResultCache for Box<dyn ResultCache> {
    async fn get(&self, key: &str) -> Result<Option<OptimizeResult>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: OptimizeResult, ttl: Duration) -> Result<(), CacheError> {
        (**self).set(key, value, ttl).await
    }
}

/// Process-local, `moka`-backed cache. Last-writer-wins; no locking
/// required beyond what `moka` already does internally.
pub struct InMemoryResultCache {
    inner: MokaCache<String, Arc<OptimizeResult>>,
}

impl InMemoryResultCache {
    pub fn new(max_capacity: u64) -> Self {
        Self { inner: MokaCache::builder().max_capacity(max_capacity).build() }
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str) -> Result<Option<OptimizeResult>, CacheError> {
        Ok(self.inner.get(key).map(|v| (*v).clone()))
    }

    async fn set(&self, key: &str, value: OptimizeResult, _ttl: Duration) -> Result<(), CacheError> {
        // `moka::sync::Cache` is built with a fixed TTL at construction in
        // this implementation; per-entry TTL would require per-entry
        // expiration policy support, which the sync cache variant doesn't
        // carry. `with_ttl` below is where that's actually configured.
        self.inner.insert(key.to_string(), Arc::new(value));
        Ok(())
    }
}

impl InMemoryResultCache {
    pub fn with_ttl(max_capacity: u64, ttl: Duration) -> Self {
        Self { inner: MokaCache::builder().max_capacity(max_capacity).time_to_live(ttl).build() }
    }
}

/// Wrapper that swallows every backend error as a cache miss / no-op
/// write, with a warning log — cache operations must never fail a request.
pub struct ForgivingCache<C: ResultCache> {
    inner: C,
}

impl<C: ResultCache> ForgivingCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub async fn get(&self, key: &str) -> Option<OptimizeResult> {
        match self.inner.get(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("result cache get failed, treating as miss: {err}");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: OptimizeResult, ttl: Duration) {
        if let Err(err) = self.inner.set(key, value, ttl).await {
            warn!("result cache set failed, dropping write: {err}");
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntryMeta {
    pub key: String,
    pub ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize::Message;

    fn sample_input() -> CanonicalizeInput {
        CanonicalizeInput {
            messages: vec![Message { role: "user".into(), content: "hi".into() }],
            ..Default::default()
        }
    }

    #[test]
    fn same_inputs_yield_same_key() {
        let config = ResolvedConfig::default();
        let a = compute_key(&sample_input(), "gpt-4o", &config);
        let b = compute_key(&sample_input(), "gpt-4o", &config);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_model_changes_key() {
        let config = ResolvedConfig::default();
        let a = compute_key(&sample_input(), "gpt-4o", &config);
        let b = compute_key(&sample_input(), "gpt-3.5-turbo", &config);
        assert_ne!(a, b);
    }

    #[test]
    fn changing_config_changes_key() {
        let mut other = ResolvedConfig::default();
        other.max_input_tokens += 1;
        let a = compute_key(&sample_input(), "gpt-4o", &ResolvedConfig::default());
        let b = compute_key(&sample_input(), "gpt-4o", &other);
        assert_ne!(a, b);
    }

    #[test]
    fn tool_field_order_does_not_change_key() {
        let mut input_a = sample_input();
        input_a.tools = Some(serde_json::json!({"a": 1, "b": 2}));
        let mut input_b = sample_input();
        input_b.tools = Some(serde_json::json!({"b": 2, "a": 1}));
        let config = ResolvedConfig::default();
        assert_eq!(compute_key(&input_a, "gpt-4o", &config), compute_key(&input_b, "gpt-4o", &config));
    }

    #[tokio::test]
    async fn get_after_set_returns_stored_value() {
        use crate::pipeline::OptimizeResult;
        let cache = InMemoryResultCache::default();
        let key = "test-key".to_string();
        let result = OptimizeResult::empty_for_test();
        cache.set(&key, result.clone(), Duration::from_secs(60)).await.unwrap();
        let fetched = cache.get(&key).await.unwrap();
        assert!(fetched.is_some());
    }
}
