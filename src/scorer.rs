//! Multi-factor utility scoring: how much a block is worth keeping, given
//! a query embedding, recency, constraint/identifier/entity density, and
//! the trust of its source.

use chrono::{DateTime, Utc};

use crate::block::{Block, BlockType};
use crate::embedding::cosine_similarity;
use crate::entities::{count_entities_for_density, count_identifiers, DIRECTIVE_KEYWORDS};

const W_SIMILARITY: f32 = 0.40;
const W_RECENCY: f32 = 0.20;
const W_CONSTRAINT: f32 = 0.15;
const W_IDENTIFIER: f32 = 0.10;
const W_SOURCE_TRUST: f32 = 0.10;
const W_ENTITY: f32 = 0.05;

/// Weight applied per matched directive keyword, before the five-match
/// saturation cap — a coarse stand-in for "MUST NOT" mattering more than
/// "FORMAT" without hand-tuning a full per-keyword table.
fn keyword_weight(keyword: &str) -> f32 {
    match keyword {
        "MUST" | "NEVER" | "FORBIDDEN" => 1.0,
        "REQUIRED" | "ALWAYS" | "ONLY" => 0.85,
        _ => 0.6,
    }
}

fn constraint_density(text: &str) -> f32 {
    let mut score = 0.0;
    let mut hits = 0;
    for kw in DIRECTIVE_KEYWORDS {
        let pattern = format!(r"\b{}\b", regex::escape(kw));
        if let Ok(re) = regex::Regex::new(&pattern) {
            let count = re.find_iter(text).count();
            if count > 0 {
                hits += count;
                score += keyword_weight(kw) * count as f32;
            }
        }
    }
    let _ = hits;
    (score / 5.0).min(1.0)
}

fn identifier_density(text: &str) -> f32 {
    (count_identifiers(text) as f32 / 10.0).min(1.0)
}

fn entity_density(text: &str) -> f32 {
    (count_entities_for_density(text) as f32 / 20.0).min(1.0)
}

fn recency(timestamp: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f32 {
    match timestamp {
        None => 0.5,
        Some(ts) => {
            let age_days = (now - ts).num_seconds().max(0) as f32 / 86_400.0;
            (-age_days / 30.0).exp()
        }
    }
}

/// Resolve `source_trust` (`{system/developer: 1.0, docs: 0.9, user: 0.8,
/// inferred/other: 0.5}`) primarily off the block type, falling back to the
/// `metadata.source` tag for docs/tool provenance.
fn trust_for(block: &Block) -> f32 {
    match block.block_type {
        BlockType::System | BlockType::Constraint => 1.0,
        BlockType::User => 0.8,
        BlockType::Doc => {
            let src = block.metadata.get("source").and_then(|v| v.as_str()).unwrap_or("rag");
            if src == "docs" || src == "rag" {
                0.9
            } else {
                0.5
            }
        }
        BlockType::Tool => 0.8,
        BlockType::Assistant => 0.5,
    }
}

/// Compute the [0, 1] utility score for a single block.
pub fn utility(
    block: &Block,
    query_embedding: Option<&[f32]>,
    block_embedding: Option<&[f32]>,
    now: DateTime<Utc>,
) -> f32 {
    let similarity = match (query_embedding, block_embedding) {
        (Some(q), Some(b)) => cosine_similarity(q, b),
        _ => 0.0,
    };
    let score = W_SIMILARITY * similarity
        + W_RECENCY * recency(block.timestamp, now)
        + W_CONSTRAINT * constraint_density(&block.content)
        + W_IDENTIFIER * identifier_density(&block.content)
        + W_SOURCE_TRUST * trust_for(block)
        + W_ENTITY * entity_density(&block.content);
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;

    #[test]
    fn utility_is_clamped_to_unit_interval() {
        let block = Block::new(BlockType::System, "MUST NEVER ALWAYS REQUIRED FORBIDDEN", 10);
        let now = Utc::now();
        let score = utility(&block, Some(&[1.0, 0.0]), Some(&[1.0, 0.0]), now);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn no_embeddings_means_zero_similarity_contribution() {
        let block = Block::new(BlockType::Assistant, "plain text", 5);
        let now = Utc::now();
        let with = utility(&block, Some(&[1.0, 0.0]), Some(&[1.0, 0.0]), now);
        let without = utility(&block, None, None, now);
        assert!(with >= without);
    }

    #[test]
    fn missing_timestamp_scores_midpoint_recency() {
        let mut block = Block::new(BlockType::User, "hi", 2);
        block.timestamp = None;
        let now = Utc::now();
        let score = utility(&block, None, None, now);
        // source_trust(user)=0.8*0.10=0.08 + recency 0.5*0.20=0.10 => at least 0.18
        assert!(score >= 0.17);
    }

    #[test]
    fn system_blocks_get_full_source_trust() {
        let system = Block::new(BlockType::System, "plain", 2);
        let assistant = Block::new(BlockType::Assistant, "plain", 2);
        let now = Utc::now();
        assert!(utility(&system, None, None, now) > utility(&assistant, None, None, now));
    }
}
