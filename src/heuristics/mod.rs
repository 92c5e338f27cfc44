//! Deterministic, idempotent junk removal → dedup → turn retention →
//! constraint hoisting → schema minimization → log trimming → tabular
//! compaction. No step raises on any input; malformed per-block data is
//! logged and the block is left as-is.

mod constraints;
mod dedup;
mod junk;
mod logs;
mod schema;
mod tabular;
mod turns;

use crate::block::{total_tokens, Block};
use crate::config::ResolvedConfig;

pub use tabular::compress_json_toon;

/// Run the full heuristics sequence, in order, recomputing tokens for
/// every block a step mutates.
pub fn apply_heuristics(blocks: Vec<Block>, config: &ResolvedConfig, model: &str) -> Vec<Block> {
    let blocks = junk::remove_junk(blocks);
    let blocks = dedup::deduplicate(blocks);
    let blocks = turns::keep_last_n_turns(blocks, config.keep_last_n_turns);
    let blocks = constraints::hoist_constraints(blocks, model);
    let blocks = if config.enable_tool_minimization {
        schema::minimize_tool_schemas(blocks, &config.tool_allowlist, model)
    } else {
        blocks
    };
    let blocks = logs::trim_assistant_logs(blocks, model);
    tabular::compact_tabular_docs(blocks, 200, model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::canonicalize::{canonicalize, CanonicalizeInput, Message};

    fn msg(role: &str, content: &str) -> Message {
        Message { role: role.into(), content: content.into() }
    }

    #[test]
    fn is_idempotent_on_already_clean_input() {
        let input = CanonicalizeInput {
            messages: vec![msg("system", "You are helpful."), msg("user", "Hi")],
            ..Default::default()
        };
        let config = ResolvedConfig::default();
        let blocks = canonicalize(&input, "gpt-4o");
        let once = apply_heuristics(blocks, &config, "gpt-4o");
        let twice = apply_heuristics(once.clone(), &config, "gpt-4o");

        let once_pairs: Vec<_> = once.iter().map(|b| (b.content.clone(), b.must_keep, b.compressed)).collect();
        let twice_pairs: Vec<_> = twice.iter().map(|b| (b.content.clone(), b.must_keep, b.compressed)).collect();
        assert_eq!(once_pairs, twice_pairs);
    }

    #[test]
    fn dedup_never_touches_must_keep_blocks_end_to_end() {
        let input = CanonicalizeInput {
            messages: vec![msg("user", "Hello"), msg("user", "Hello"), msg("user", "Hello")],
            ..Default::default()
        };
        let config = ResolvedConfig::default();
        let blocks = canonicalize(&input, "gpt-4o");
        let result = apply_heuristics(blocks, &config, "gpt-4o");
        let must_keep_count = result.iter().filter(|b| b.block_type == BlockType::User && b.must_keep).count();
        assert_eq!(must_keep_count, 1);
    }

    #[test]
    fn tokens_are_recomputed_after_mutation() {
        let input = CanonicalizeInput {
            messages: vec![msg("system", "You MUST output JSON. NEVER include PII."), msg("user", "hi")],
            ..Default::default()
        };
        let config = ResolvedConfig::default();
        let blocks = canonicalize(&input, "gpt-4o");
        let result = apply_heuristics(blocks, &config, "gpt-4o");
        for block in &result {
            let recount = crate::token_counter::count_tokens(&block.content, "gpt-4o");
            assert_eq!(block.tokens, recount);
        }
    }

    #[test]
    fn total_tokens_never_increases_from_constraint_hoisting_alone() {
        let input = CanonicalizeInput {
            messages: vec![msg("system", "You MUST output JSON. NEVER include PII. ALWAYS be concise.")],
            ..Default::default()
        };
        let config = ResolvedConfig::default();
        let blocks = canonicalize(&input, "gpt-4o");
        let before = total_tokens(&blocks);
        let result = apply_heuristics(blocks, &config, "gpt-4o");
        assert!(total_tokens(&result) <= before);
    }
}
