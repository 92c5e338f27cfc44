//! The orchestrator: fixed stage order (cache → canonicalize → heuristics
//! → semantic → compression → validate → fallback), with a cache
//! short-circuit on fingerprint hit and a min-savings gate that can
//! discard the whole optimization in favor of the original prompt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::block::{total_tokens, Block, BlockType};
use crate::cache::{compute_key, ForgivingCache, ResultCache};
use crate::canonicalize::{blocks_to_messages, canonicalize, CanonicalizeInput, Message, RagDoc, ToolOutput};
use crate::compressor::CompressorService;
use crate::config::{merge_config, ConfigOverlay, ResolvedConfig};
use crate::embedding::EmbeddingService;
use crate::fallback::fallback as run_fallback;
use crate::heuristics::apply_heuristics;
use crate::mmr::{diversify, Candidate};
use crate::observability::{Metrics, RouteBuilder, StageTimings};
use crate::scorer::utility;
use crate::token_counter::count_tokens;
use crate::validator::validate;
use crate::vector_store::{PersistedBlock, VectorStore};

#[derive(Debug, Clone, Default)]
pub struct OptimizeRequest {
    pub messages: Vec<Message>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
    pub tools: Option<Value>,
    pub rag_context: Vec<RagDoc>,
    pub tool_outputs: Vec<ToolOutput>,
    pub user_prefs_overrides: Option<ConfigOverlay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub tokens: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroppedBlock {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub tokens: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Stats {
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub tokens_saved: u32,
    pub compression_ratio: f32,
    pub cache_hit: bool,
    pub route: String,
    pub fallback_used: bool,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugInfo {
    pub trace_id: String,
    pub config_resolved: ResolvedConfig,
    pub stage_timings_ms: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeResult {
    pub optimized_messages: Vec<Message>,
    pub selected_blocks: Vec<SelectedBlock>,
    pub dropped_blocks: Vec<DroppedBlock>,
    pub stats: Stats,
    pub debug: DebugInfo,
}

impl OptimizeResult {
    #[cfg(test)]
    pub fn empty_for_test() -> Self {
        Self {
            optimized_messages: Vec::new(),
            selected_blocks: Vec::new(),
            dropped_blocks: Vec::new(),
            stats: Stats::default(),
            debug: DebugInfo { trace_id: "test".into(), config_resolved: ResolvedConfig::default(), stage_timings_ms: BTreeMap::new() },
        }
    }
}

fn reason_for(block: &Block) -> String {
    if block.must_keep {
        "must_keep".to_string()
    } else if block.compressed {
        "compressed".to_string()
    } else {
        "selected_under_budget".to_string()
    }
}

fn to_selected(block: &Block) -> SelectedBlock {
    SelectedBlock { id: block.id.clone(), block_type: block.block_type.as_str().to_string(), tokens: block.tokens, reason: reason_for(block) }
}

fn to_dropped(block: &Block, reason: &str) -> DroppedBlock {
    DroppedBlock { id: block.id.clone(), block_type: block.block_type.as_str().to_string(), tokens: block.tokens, reason: reason.to_string() }
}

/// Everything the orchestrator needs that isn't per-request: lazily
/// constructed services, the result cache, and the metrics registry.
/// These are the crate's process-wide singletons.
pub struct Pipeline {
    base_config: ResolvedConfig,
    embedding: Arc<EmbeddingService>,
    vector_store: Option<Arc<dyn VectorStore>>,
    compressor: Option<Arc<CompressorService>>,
    cache: ForgivingCache<Box<dyn ResultCache>>,
    cache_ttl: Duration,
    pub metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        base_config: ResolvedConfig,
        embedding: Arc<EmbeddingService>,
        vector_store: Option<Arc<dyn VectorStore>>,
        compressor: Option<Arc<CompressorService>>,
        cache: Box<dyn ResultCache>,
        cache_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { base_config, embedding, vector_store, compressor, cache: ForgivingCache::new(cache), cache_ttl, metrics }
    }

    fn resolve_config(&self, dashboard: Option<&ConfigOverlay>, request: &OptimizeRequest) -> ResolvedConfig {
        let mut request_overlay = request.user_prefs_overrides.clone().unwrap_or_default();
        if let Some(max_tokens) = request.max_tokens {
            request_overlay.0.insert("max_input_tokens".to_string(), Value::from(max_tokens));
        }
        merge_config(&self.base_config, dashboard, Some(&request_overlay)).unwrap_or_else(|err| {
            warn!("config merge failed, falling back to base config: {err}");
            self.base_config.clone()
        })
    }

    /// Run the full pipeline for one request. `dashboard_overlay` is the
    /// tenant config already fetched (or `None` on unavailability) — the
    /// pipeline itself never calls out to the dashboard.
    pub async fn run(&self, request: OptimizeRequest, dashboard_overlay: Option<&ConfigOverlay>, endpoint: &str) -> OptimizeResult {
        let started = Instant::now();
        let trace_id = Uuid::new_v4().to_string();
        let config = self.resolve_config(dashboard_overlay, &request);

        let canonical_input = CanonicalizeInput {
            messages: request.messages.clone(),
            tools: request.tools.clone(),
            rag_context: request.rag_context.clone(),
            tool_outputs: request.tool_outputs.clone(),
        };

        let cache_key = compute_key(&canonical_input, &request.model, &config);

        if let Some(mut cached) = self.cache.get(&cache_key).await {
            cached.stats.cache_hit = true;
            cached.stats.latency_ms = started.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record_optimization(endpoint, cached.stats.tokens_before, cached.stats.tokens_after, true, &cached.stats.route);
            return cached;
        }

        let mut timings = StageTimings::default();
        let mut route = RouteBuilder::default();

        let t0 = Instant::now();
        let mut blocks = canonicalize(&canonical_input, &request.model);
        let tokens_before = total_tokens(&blocks);
        timings.record("canonicalize", t0);

        let t0 = Instant::now();
        blocks = apply_heuristics(blocks, &config, &request.model);
        route.push("heuristic");
        timings.record("heuristics", t0);

        let mut dropped: Vec<DroppedBlock> = Vec::new();

        if config.semantic.enabled && total_tokens(&blocks) > config.max_input_tokens {
            let t0 = Instant::now();
            let (kept, semantic_dropped) = self.run_semantic(blocks, &config, request.tenant_id.as_deref()).await;
            blocks = kept;
            dropped.extend(semantic_dropped);
            route.push("semantic");
            timings.record("semantic", t0);
        }

        if config.compression.enabled && total_tokens(&blocks) > config.max_input_tokens {
            if let Some(compressor) = &self.compressor {
                let t0 = Instant::now();
                blocks = self.run_compression(blocks, compressor, &config, &request.model).await;
                route.push("compression");
                timings.record("compression", t0);
            }
        }

        let t0 = Instant::now();
        let validation = validate(&blocks, &config);
        timings.record("validate", t0);

        let mut fallback_used = false;
        if validation.is_err() {
            let t0 = Instant::now();
            let pre_validation = blocks.clone();
            let outcome = run_fallback(&pre_validation, &config, &request.model);
            let dropped_ids: std::collections::HashSet<_> = outcome.blocks.iter().map(|b| b.id.clone()).collect();
            for block in &pre_validation {
                if !dropped_ids.contains(&block.id) {
                    dropped.push(to_dropped(block, "fallback_trim"));
                }
            }
            blocks = outcome.blocks;
            fallback_used = outcome.fallback_used;
            route.push("fallback");
            timings.record("fallback", t0);
        }

        let tokens_after = total_tokens(&blocks);
        let tokens_saved = tokens_before.saturating_sub(tokens_after);
        let savings_ratio = if tokens_before > 0 { tokens_saved as f32 / tokens_before as f32 } else { 0.0 };

        let min_savings_gate_failed =
            !fallback_used && (tokens_saved < config.min_tokens_saved || savings_ratio < config.min_savings_ratio) && tokens_before > 0;

        let (final_blocks, final_route, final_fallback_used, final_dropped) = if min_savings_gate_failed {
            let mut route_label = route.clone().into_inner();
            route_label.push("original".to_string());
            (canonicalize(&canonical_input, &request.model), route_label.join("+"), true, Vec::new())
        } else {
            (blocks, route.finish(), fallback_used, dropped)
        };

        let final_tokens_after = total_tokens(&final_blocks);
        let final_tokens_saved = tokens_before.saturating_sub(final_tokens_after);
        let compression_ratio = if tokens_before > 0 { final_tokens_after as f32 / tokens_before as f32 } else { 1.0 };

        let selected_blocks: Vec<SelectedBlock> = final_blocks.iter().map(to_selected).collect();
        let optimized_messages = blocks_to_messages(&final_blocks);

        let stats = Stats {
            tokens_before,
            tokens_after: final_tokens_after,
            tokens_saved: final_tokens_saved,
            compression_ratio,
            cache_hit: false,
            route: final_route,
            fallback_used: final_fallback_used,
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
        };

        let result = OptimizeResult {
            optimized_messages,
            selected_blocks,
            dropped_blocks: final_dropped,
            stats: stats.clone(),
            debug: DebugInfo { trace_id, config_resolved: config, stage_timings_ms: timings.0.clone() },
        };

        self.metrics.record_optimization(endpoint, stats.tokens_before, stats.tokens_after, false, &stats.route);
        self.cache.set(&cache_key, result.clone(), self.cache_ttl).await;
        info!(route = %stats.route, tokens_before = stats.tokens_before, tokens_after = stats.tokens_after, "optimization complete");

        result
    }

    /// Split must-keep/optional, embed optional blocks, score, diversify
    /// with MMR, and pass the result to the budget allocator.
    async fn run_semantic(&self, blocks: Vec<Block>, config: &ResolvedConfig, tenant_id: Option<&str>) -> (Vec<Block>, Vec<DroppedBlock>) {
        let (must_keep, optional): (Vec<Block>, Vec<Block>) = blocks.into_iter().partition(|b| b.must_keep);

        if optional.is_empty() {
            return (must_keep, Vec::new());
        }

        if !self.embedding.is_available() {
            let mut combined = must_keep;
            combined.extend(optional);
            return (combined, Vec::new());
        }

        let query_text = query_text_for(&must_keep);
        let query_embedding = self.embedding.embed_batch(&[query_text]).await.and_then(|mut v| v.pop());

        let optional_texts: Vec<String> = optional.iter().map(|b| b.content.clone()).collect();
        let optional_embeddings = self.embedding.embed_batch(&optional_texts).await;

        let Some(optional_embeddings) = optional_embeddings else {
            let mut combined = must_keep;
            combined.extend(optional);
            return (combined, Vec::new());
        };

        let now = Utc::now();
        let mut candidates: Vec<Candidate> = optional
            .into_iter()
            .zip(optional_embeddings.into_iter())
            .map(|(block, embedding)| {
                let similarity = query_embedding.as_deref().map(|q| crate::embedding::cosine_similarity(q, &embedding)).unwrap_or(0.0);
                let score = utility(&block, query_embedding.as_deref(), Some(&embedding), now);
                let mut scored_block = block;
                scored_block.metadata.insert("utility".to_string(), Value::from(score as f64));
                Candidate { block: scored_block, similarity, embedding }
            })
            .collect();
        candidates.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));

        if let (Some(store), Some(tenant)) = (&self.vector_store, tenant_id) {
            for candidate in &candidates {
                let entry = PersistedBlock {
                    tenant_key: tenant.to_string(),
                    content_hash: candidate.block.fingerprint(),
                    block: candidate.block.clone(),
                    embedding: candidate.embedding.clone(),
                    embedding_model: config.semantic.embedding_model.clone(),
                    created_at: now,
                };
                if let Err(err) = store.upsert(entry).await {
                    warn!("vector store upsert failed, continuing without persisting: {err}");
                }
            }
        }

        let diversified = diversify(&candidates, config.semantic.vector_topk, config.semantic.mmr_lambda);
        let diversified_ids: std::collections::HashSet<_> = diversified.iter().map(|b| b.id.clone()).collect();
        let dropped_by_mmr: Vec<DroppedBlock> =
            candidates.iter().filter(|c| !diversified_ids.contains(&c.block.id)).map(|c| to_dropped(&c.block, "mmr_not_diverse_enough")).collect();

        let allocation = crate::budget::allocate(
            must_keep,
            diversified,
            config.max_input_tokens,
            config.safety_margin_tokens,
            &config.budget,
        );

        let mut dropped: Vec<DroppedBlock> = dropped_by_mmr;
        dropped.extend(allocation.dropped.iter().map(|b| to_dropped(b, "over_budget")));

        (allocation.selected, dropped)
    }

    async fn run_compression(&self, blocks: Vec<Block>, compressor: &CompressorService, config: &ResolvedConfig, model: &str) -> Vec<Block> {
        let mut result = Vec::with_capacity(blocks.len());
        for mut block in blocks {
            let eligible = !block.block_type.is_compression_exempt()
                && (!block.must_keep || config.compression.allow_must_keep)
                && !block.compressed
                && block.tokens >= 100;

            if eligible {
                if let Some(compressed) = compressor.try_compress(&block.content, config.compression.compression_ratio, model).await {
                    block.content = compressed;
                    block.tokens = count_tokens(&block.content, model);
                    block.compressed = true;
                }
            }
            result.push(block);
        }
        result
    }
}

/// Query text for the semantic stage: the concatenation of the last
/// up-to-three must-keep user blocks, or the first must-keep block overall
/// if there are none.
fn query_text_for(must_keep: &[Block]) -> String {
    let user_blocks: Vec<&Block> = must_keep.iter().filter(|b| b.block_type == BlockType::User).collect();
    if !user_blocks.is_empty() {
        let start = user_blocks.len().saturating_sub(3);
        return user_blocks[start..].iter().map(|b| b.content.as_str()).collect::<Vec<_>>().join("\n");
    }
    must_keep.first().map(|b| b.content.as_str()).unwrap_or("").to_string()
}
