//! Greedy knapsack allocation of a token budget across optional blocks,
//! split by per-type fractions, with must-keep blocks overriding the
//! budget outright when they alone exceed it.

use std::collections::HashMap;

use crate::block::{total_tokens, Block, BlockType};
use crate::config::BudgetConfig;

#[derive(Debug, Clone, Default)]
pub struct AllocationResult {
    pub selected: Vec<Block>,
    pub dropped: Vec<Block>,
    /// Set when must-keep blocks alone exceed `max_tokens - safety_margin`.
    pub must_keep_over_budget: bool,
}

fn type_key(block_type: BlockType) -> &'static str {
    block_type.as_str()
}

/// Distribute `available` tokens across the block types present in
/// `optional`, using `fractions`; a type's share is redistributed equally
/// to the types that actually have candidates when it has none.
fn per_type_budgets(optional: &[Block], available: u32, fractions: &HashMap<String, f32>) -> HashMap<&'static str, u32> {
    let present: Vec<&'static str> = {
        let mut types: Vec<&'static str> = optional.iter().map(|b| type_key(b.block_type)).collect();
        types.sort_unstable();
        types.dedup();
        types
    };

    if present.is_empty() || available == 0 {
        return HashMap::new();
    }

    let mut base_share: HashMap<&'static str, f32> = HashMap::new();
    let mut absent_total = 0.0_f32;
    for (ty, frac) in fractions {
        let ty: &'static str = match ty.as_str() {
            "system" => "system",
            "user" => "user",
            "assistant" => "assistant",
            "tool" => "tool",
            "doc" => "doc",
            "constraint" => "constraint",
            _ => continue,
        };
        if present.contains(&ty) {
            base_share.insert(ty, *frac);
        } else {
            absent_total += frac;
        }
    }

    let bonus_per_present = if present.is_empty() { 0.0 } else { absent_total / present.len() as f32 };
    let total_fraction: f32 = present
        .iter()
        .map(|ty| base_share.get(ty).copied().unwrap_or(0.0) + bonus_per_present)
        .sum();

    let mut budgets = HashMap::new();
    for ty in &present {
        let share = base_share.get(ty).copied().unwrap_or(0.0) + bonus_per_present;
        let normalized = if total_fraction > 0.0 { share / total_fraction } else { 1.0 / present.len() as f32 };
        budgets.insert(*ty, (available as f32 * normalized).floor().max(0.0) as u32);
    }
    budgets
}

/// Utility-per-token score used to rank optional candidates; falls back to
/// `priority` when no explicit `utility` score has been attached.
pub fn score_for(block: &Block) -> f32 {
    block
        .metadata
        .get("utility")
        .and_then(|v| v.as_f64())
        .map(|v| v as f32)
        .unwrap_or(block.priority)
}

/// Greedy knapsack selection over `optional` blocks, constrained by
/// per-type budgets derived from `must_keep`'s token footprint against
/// `max_tokens - safety_margin`.
///
/// Determinism: ties in `utility/tokens` break on higher `priority`, then
/// on the original input order (`metadata.index` if present, else
/// position in `optional`).
pub fn allocate(must_keep: Vec<Block>, optional: Vec<Block>, max_tokens: u32, safety_margin: u32, budget_config: &BudgetConfig) -> AllocationResult {
    let hard_budget = max_tokens.saturating_sub(safety_margin);
    let must_keep_tokens = total_tokens(&must_keep);

    if must_keep_tokens > hard_budget {
        return AllocationResult { selected: must_keep, dropped: optional, must_keep_over_budget: true };
    }

    let available = hard_budget - must_keep_tokens;
    let mut remaining_by_type = per_type_budgets(&optional, available, &budget_config.per_type_fractions);

    let mut ranked: Vec<(usize, Block)> = optional.into_iter().enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        let score_a = if a.tokens > 0 { score_for(a) / a.tokens as f32 } else { score_for(a) };
        let score_b = if b.tokens > 0 { score_for(b) / b.tokens as f32 } else { score_for(b) };
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| {
                let idx_a = a.index().unwrap_or(*ia as u64);
                let idx_b = b.index().unwrap_or(*ib as u64);
                idx_a.cmp(&idx_b)
            })
    });

    let mut selected = Vec::new();
    let mut dropped = Vec::new();
    for (_, block) in ranked {
        let key = type_key(block.block_type);
        let slot = remaining_by_type.entry(key).or_insert(0);
        if *slot >= block.tokens {
            *slot -= block.tokens;
            selected.push(block);
        } else {
            dropped.push(block);
        }
    }

    let mut final_selected = must_keep;
    final_selected.extend(selected);
    AllocationResult { selected: final_selected, dropped, must_keep_over_budget: false }
}
