use regex::Regex;
use std::sync::OnceLock;

use crate::block::Block;

fn junk_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)^(sure|of course|i can help|let me help)",
            r"(?i)^(thank you|thanks)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static junk pattern is valid"))
        .collect()
    })
}

/// Drop non-must-keep blocks that are empty or open with stock filler phrasing.
pub fn remove_junk(blocks: Vec<Block>) -> Vec<Block> {
    blocks
        .into_iter()
        .filter(|block| {
            if block.must_keep {
                return true;
            }
            let content = block.content.trim();
            if content.is_empty() {
                return false;
            }
            !junk_patterns().iter().any(|p| p.is_match(content))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;

    #[test]
    fn drops_empty_non_must_keep_blocks() {
        let blocks = vec![Block::new(BlockType::Assistant, "   ", 0)];
        assert!(remove_junk(blocks).is_empty());
    }

    #[test]
    fn keeps_empty_must_keep_blocks() {
        let blocks = vec![Block::new(BlockType::System, "", 0).must_keep(true)];
        assert_eq!(remove_junk(blocks).len(), 1);
    }

    #[test]
    fn drops_filler_openers() {
        let blocks = vec![Block::new(BlockType::Assistant, "Sure, I'd be happy to help with that.", 10)];
        assert!(remove_junk(blocks).is_empty());
    }

    #[test]
    fn keeps_substantive_content() {
        let blocks = vec![Block::new(BlockType::Assistant, "The capital of France is Paris.", 10)];
        assert_eq!(remove_junk(blocks).len(), 1);
    }
}
