use regex::Regex;
use std::sync::OnceLock;

use crate::block::{total_tokens, Block, BlockType};
use crate::token_counter::count_tokens;

const CONSTRAINT_KEYWORDS: &[&str] = &[
    "MUST NOT", "MUST", "ALWAYS", "NEVER", "REQUIRED", "FORBIDDEN", "ONLY", "FORMAT", "JSON",
    "OUTPUT", "DEADLINE",
];

fn keyword_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        CONSTRAINT_KEYWORDS
            .iter()
            .map(|kw| Regex::new(&format!(r"\b{}\b", regex::escape(kw))).expect("keyword pattern is valid"))
            .collect()
    })
}

fn split_sentences(content: &str) -> Vec<String> {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    let splitter = SPLITTER.get_or_init(|| Regex::new(r"[.!?]\s+").expect("sentence splitter is valid"));
    splitter.split(content).map(str::to_string).collect()
}

/// Find directive sentences in system/user blocks and build a single
/// synthetic constraint block out of them, or `None` if nothing qualifies.
fn extract_constraints(blocks: &[Block], model: &str) -> Option<Block> {
    let mut sentences = Vec::new();

    for block in blocks {
        if !matches!(block.block_type, BlockType::System | BlockType::User) {
            continue;
        }
        for sentence in split_sentences(&block.content) {
            let s = sentence.trim();
            if s.len() > 400 {
                continue;
            }
            if keyword_patterns().iter().any(|p| p.is_match(s)) {
                sentences.push(s.to_string());
            }
        }
    }

    if sentences.is_empty() {
        return None;
    }

    let mut seen = std::collections::HashSet::new();
    let deduped: Vec<String> = sentences.into_iter().filter(|s| seen.insert(s.clone())).collect();
    let content = deduped.join("\n");
    let tokens = count_tokens(&content, model);
    if tokens > 200 {
        return None;
    }

    Some(
        Block::new(BlockType::Constraint, content, tokens)
            .must_keep(true)
            .priority(1.0)
            .with_metadata("source", serde_json::Value::from("extracted_constraints")),
    )
}

/// Prepend a hoisted constraint block only if doing so doesn't increase
/// the total token count versus the pre-hoist state.
pub fn hoist_constraints(blocks: Vec<Block>, model: &str) -> Vec<Block> {
    let Some(constraint) = extract_constraints(&blocks, model) else { return blocks };

    let tokens_before = total_tokens(&blocks);
    let mut candidate = Vec::with_capacity(blocks.len() + 1);
    candidate.push(constraint);
    candidate.extend(blocks.iter().cloned());

    if total_tokens(&candidate) <= tokens_before {
        candidate
    } else {
        blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hoists_all_caps_directive_sentences() {
        let blocks = vec![Block::new(
            BlockType::System,
            "You MUST output JSON. NEVER include PII.",
            20,
        )
        .must_keep(true)];
        let result = hoist_constraints(blocks, "gpt-4o");
        assert_eq!(result[0].block_type, BlockType::Constraint);
        assert!(result[0].content.contains("MUST output JSON"));
    }

    #[test]
    fn ignores_lowercase_mentions_of_keywords() {
        let blocks = vec![Block::new(BlockType::System, "you must be careful here.", 10).must_keep(true)];
        let result = hoist_constraints(blocks.clone(), "gpt-4o");
        assert_eq!(result.len(), blocks.len());
    }

    #[test]
    fn skips_overlong_sentences() {
        let long_sentence = format!("{} MUST comply.", "word ".repeat(100));
        let blocks = vec![Block::new(BlockType::System, long_sentence, 200).must_keep(true)];
        let result = hoist_constraints(blocks.clone(), "gpt-4o");
        assert_eq!(result.len(), blocks.len());
    }

    #[test]
    fn deduplicates_repeated_constraint_sentences() {
        let blocks = vec![
            Block::new(BlockType::System, "You MUST be polite.", 10).must_keep(true),
            Block::new(BlockType::User, "You MUST be polite.", 10).must_keep(true),
        ];
        let result = hoist_constraints(blocks, "gpt-4o");
        assert_eq!(result[0].content.matches("MUST be polite").count(), 1);
    }

    #[test]
    fn no_keywords_means_no_constraint_block() {
        let blocks = vec![Block::new(BlockType::System, "Be friendly and helpful.", 10).must_keep(true)];
        let result = hoist_constraints(blocks.clone(), "gpt-4o");
        assert_eq!(result.len(), blocks.len());
        assert_eq!(result[0].block_type, BlockType::System);
    }
}
