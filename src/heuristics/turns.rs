use std::collections::HashSet;

use crate::block::{Block, BlockType};

/// Partition the user/assistant blocks into turns (a turn starts at each
/// user message) and mark the last `n` turns as must-keep with priority
/// raised to at least 0.9.
pub fn keep_last_n_turns(mut blocks: Vec<Block>, n: usize) -> Vec<Block> {
    let mut turns: Vec<Vec<usize>> = Vec::new();
    let mut current_turn: Vec<usize> = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        if matches!(block.block_type, BlockType::User | BlockType::Assistant) {
            current_turn.push(i);
            if block.block_type == BlockType::User && current_turn.len() > 1 {
                let closed = current_turn[..current_turn.len() - 1].to_vec();
                turns.push(closed);
                current_turn = vec![i];
            }
        }
    }
    if !current_turn.is_empty() {
        turns.push(current_turn);
    }

    let last_n = if turns.len() > n { &turns[turns.len() - n..] } else { &turns[..] };
    let must_keep_indices: HashSet<usize> = last_n.iter().flatten().copied().collect();

    for i in must_keep_indices {
        blocks[i].must_keep = true;
        blocks[i].priority = blocks[i].priority.max(0.9);
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn_blocks() -> Vec<Block> {
        vec![
            Block::new(BlockType::User, "turn1-user", 1),
            Block::new(BlockType::Assistant, "turn1-assistant", 1),
            Block::new(BlockType::User, "turn2-user", 1),
            Block::new(BlockType::Assistant, "turn2-assistant", 1),
            Block::new(BlockType::User, "turn3-user", 1),
        ]
    }

    #[test]
    fn marks_only_last_n_turns() {
        let result = keep_last_n_turns(turn_blocks(), 1);
        assert!(!result[0].must_keep);
        assert!(!result[1].must_keep);
        assert!(!result[2].must_keep);
        assert!(!result[3].must_keep);
        assert!(result[4].must_keep);
    }

    #[test]
    fn marking_raises_priority_to_at_least_point_nine() {
        let mut blocks = turn_blocks();
        blocks[4].priority = 0.5;
        let result = keep_last_n_turns(blocks, 1);
        assert_eq!(result[4].priority, 0.9);
    }

    #[test]
    fn n_covering_all_turns_marks_everything() {
        let result = keep_last_n_turns(turn_blocks(), 10);
        assert!(result.iter().all(|b| b.must_keep));
    }

    #[test]
    fn non_user_assistant_blocks_are_untouched() {
        let mut blocks = vec![Block::new(BlockType::System, "sys", 1)];
        blocks.extend(turn_blocks());
        let result = keep_last_n_turns(blocks, 1);
        assert!(!result[0].must_keep);
    }
}
