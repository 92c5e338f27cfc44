//! Progressive degradation when validation fails: trim to must-keep,
//! then truncate a single block if still over budget, then give up with
//! whatever's left. Never errors — the worst case is a minimal but valid
//! (or explicitly flagged invalid) prompt.

use serde_json::Value;

use crate::block::{total_tokens, Block, BlockType};
use crate::config::ResolvedConfig;
use crate::token_counter::count_tokens;
use crate::validator::effective_safety_margin;

pub const HEAD_FRACTION: f32 = 0.4;

#[derive(Debug, Clone)]
pub struct FallbackOutcome {
    pub blocks: Vec<Block>,
    pub fallback_used: bool,
}

fn truncate_block_content(block: &mut Block, max_tokens: u32, model: &str) {
    let head_budget = ((max_tokens as f32) * HEAD_FRACTION).floor() as u32;
    let tail_budget = max_tokens.saturating_sub(head_budget);

    let head = crate::token_counter::truncate_to_tokens(&block.content, head_budget, model);
    let reversed: String = block.content.chars().rev().collect();
    let tail_reversed = crate::token_counter::truncate_to_tokens(&reversed, tail_budget, model);
    let tail: String = tail_reversed.chars().rev().collect();

    block.content = if tail.is_empty() { head } else { format!("{head}\n... [truncated] ...\n{tail}") };
    block.tokens = count_tokens(&block.content, model);
    block.metadata.insert("truncated_to_budget".to_string(), Value::Bool(true));
}

/// Pick the block to truncate: last user block first, else the largest
/// non-system/non-constraint block.
fn pick_truncation_target(blocks: &mut [Block]) -> Option<usize> {
    if let Some(idx) = blocks.iter().enumerate().rev().find(|(_, b)| b.block_type == BlockType::User).map(|(i, _)| i) {
        return Some(idx);
    }
    blocks
        .iter()
        .enumerate()
        .filter(|(_, b)| !matches!(b.block_type, BlockType::System | BlockType::Constraint))
        .max_by_key(|(_, b)| b.tokens)
        .map(|(i, _)| i)
}

/// Run the fallback procedure against the pre-validation block set.
/// `pre_validation` is the full set the validator just rejected, used to
/// recover a last-resort user block if must-keep alone dropped every one.
pub fn fallback(pre_validation: &[Block], config: &ResolvedConfig, model: &str) -> FallbackOutcome {
    let mut blocks: Vec<Block> = pre_validation.iter().filter(|b| b.must_keep).cloned().collect();

    if !blocks.iter().any(|b| b.block_type == BlockType::User) {
        if let Some(last_user) = pre_validation.iter().rev().find(|b| b.block_type == BlockType::User) {
            blocks.push(last_user.clone());
        }
    }

    let margin = effective_safety_margin(config);
    let budget = config.max_input_tokens.saturating_sub(margin);

    if total_tokens(&blocks) > budget {
        if let Some(idx) = pick_truncation_target(&mut blocks) {
            let others_tokens: u32 = blocks.iter().enumerate().filter(|(i, _)| *i != idx).map(|(_, b)| b.tokens).sum();
            let remaining = budget.saturating_sub(others_tokens);
            truncate_block_content(&mut blocks[idx], remaining.max(1), model);
        }
    }

    // The orchestrator only reaches fallback() after validation already
    // failed, so this path always tags the result as degraded.
    FallbackOutcome { blocks, fallback_used: true }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn config(max: u32, margin: u32) -> ResolvedConfig {
        let mut c = ResolvedConfig::default();
        c.max_input_tokens = max;
        c.safety_margin_tokens = margin;
        c
    }

    #[test]
    fn keeps_only_must_keep_blocks() {
        let blocks = vec![
            Block::new(BlockType::System, "sys", 10).must_keep(true),
            Block::new(BlockType::Assistant, "chatter", 20),
            Block::new(BlockType::User, "hi", 5).must_keep(true),
        ];
        let outcome = fallback(&blocks, &config(1000, 100), "gpt-4o");
        assert_eq!(outcome.blocks.len(), 2);
        assert!(outcome.blocks.iter().all(|b| b.must_keep));
    }

    #[test]
    fn recovers_last_user_block_if_none_are_must_keep() {
        let blocks = vec![
            Block::new(BlockType::System, "sys", 10).must_keep(true),
            Block::new(BlockType::User, "first", 5),
            Block::new(BlockType::User, "second", 5),
        ];
        let outcome = fallback(&blocks, &config(1000, 100), "gpt-4o");
        assert!(outcome.blocks.iter().any(|b| b.content == "second"));
    }

    #[test]
    fn truncates_oversized_must_keep_block_and_tags_metadata() {
        let huge_content = "word ".repeat(4000);
        let blocks = vec![Block::new(BlockType::User, huge_content, 4000).must_keep(true)];
        let outcome = fallback(&blocks, &config(300, 50), "gpt-4o");
        assert_eq!(outcome.blocks.len(), 1);
        assert_eq!(outcome.blocks[0].metadata.get("truncated_to_budget").and_then(|v| v.as_bool()), Some(true));
        assert!(outcome.blocks[0].tokens <= 300);
    }

    #[test]
    fn fallback_used_is_always_true() {
        let blocks = vec![Block::new(BlockType::System, "sys", 10).must_keep(true)];
        let outcome = fallback(&blocks, &config(1000, 100), "gpt-4o");
        assert!(outcome.fallback_used);
    }
}
