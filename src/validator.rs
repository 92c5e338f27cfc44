//! Post-condition checks run after selection/compression, before a result
//! is allowed to ship. Failure here triggers fallback, never an error.

use crate::block::{total_tokens, Block, BlockType};
use crate::config::ResolvedConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    NoBlocksRemain,
    NoSystemOrUserBlock,
    OverBudget,
    NoMustKeepBlock,
}

/// `safety_margin` is capped at `max_input_tokens / 4` so a tiny budget
/// doesn't reserve itself out of existence.
pub fn effective_safety_margin(config: &ResolvedConfig) -> u32 {
    config.safety_margin_tokens.min(config.max_input_tokens / 4)
}

/// Run every validation check; returns the first failure encountered, or
/// `Ok(())` if all pass. Order matches the spec's listing, which is also
/// cheapest-first: these are plain scans over an already-small block list.
pub fn validate(blocks: &[Block], config: &ResolvedConfig) -> Result<(), ValidationFailure> {
    if blocks.is_empty() {
        return Err(ValidationFailure::NoBlocksRemain);
    }
    if !blocks.iter().any(|b| matches!(b.block_type, BlockType::System | BlockType::User)) {
        return Err(ValidationFailure::NoSystemOrUserBlock);
    }
    let margin = effective_safety_margin(config);
    if total_tokens(blocks) > config.max_input_tokens.saturating_sub(margin) {
        return Err(ValidationFailure::OverBudget);
    }
    if !blocks.iter().any(|b| b.must_keep) {
        return Err(ValidationFailure::NoMustKeepBlock);
    }
    Ok(())
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
    fn empty_blocks_fail() {
        let result = validate(&[], &config(1000, 100));
        assert_eq!(result, Err(ValidationFailure::NoBlocksRemain));
    }

    #[test]
    fn requires_system_or_user_block() {
        let blocks = vec![Block::new(BlockType::Assistant, "x", 5).must_keep(true)];
        let result = validate(&blocks, &config(1000, 100));
        assert_eq!(result, Err(ValidationFailure::NoSystemOrUserBlock));
    }

    #[test]
    fn requires_must_keep_block() {
        let blocks = vec![Block::new(BlockType::User, "x", 5)];
        let result = validate(&blocks, &config(1000, 100));
        assert_eq!(result, Err(ValidationFailure::NoMustKeepBlock));
    }

    #[test]
    fn rejects_over_budget() {
        let blocks = vec![Block::new(BlockType::User, "x", 950).must_keep(true)];
        let result = validate(&blocks, &config(1000, 100));
        assert_eq!(result, Err(ValidationFailure::OverBudget));
    }

    #[test]
    fn small_budgets_cap_safety_margin_at_a_quarter() {
        // max=100, requested margin=80 -> capped to 25, leaving a 75-token
        // ceiling. Without the cap the uncapped margin (80) would leave
        // only 20 tokens and reject this block.
        let blocks = vec![Block::new(BlockType::User, "x", 70).must_keep(true)];
        let result = validate(&blocks, &config(100, 80));
        assert!(result.is_ok());
    }

    #[test]
    fn passing_config_accepts_valid_blocks() {
        let blocks = vec![Block::new(BlockType::System, "sys", 10).must_keep(true), Block::new(BlockType::User, "hi", 5).must_keep(true)];
        assert!(validate(&blocks, &config(1000, 100)).is_ok());
    }
}
