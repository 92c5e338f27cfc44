use std::collections::BTreeSet;

use crate::block::{Block, BlockType};
use crate::token_counter::count_tokens;

const ERROR_KEYWORDS: &[&str] =
    &["ERROR", "CRITICAL", "Exception", "Traceback", "Failed", "failed", "FATAL", "panic", "Panic"];

/// Keep `±error_window` lines around error-looking lines plus the last
/// `tail_lines` lines, joining gaps with a visible truncation marker.
pub fn trim_logs(content: &str, error_window: usize, tail_lines: usize) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();
    if total <= tail_lines {
        return content.to_string();
    }

    let mut keep: BTreeSet<usize> = BTreeSet::new();
    for (i, line) in lines.iter().enumerate() {
        if ERROR_KEYWORDS.iter().any(|kw| line.contains(kw)) {
            let start = i.saturating_sub(error_window);
            let end = (i + error_window + 1).min(total);
            keep.extend(start..end);
        }
    }
    let tail_start = total.saturating_sub(tail_lines);
    keep.extend(tail_start..total);

    let mut result = Vec::new();
    let mut last_idx: i64 = -2;
    for &idx in &keep {
        if idx as i64 > last_idx + 1 {
            result.push("... [logs truncated] ...".to_string());
        }
        result.push(lines[idx].to_string());
        last_idx = idx as i64;
    }
    result.join("\n")
}

const LOG_LEVEL_MARKERS: &[&str] = &["INFO", "DEBUG", "ERROR", "WARNING"];

/// Trim oversized, log-looking assistant blocks in place.
pub fn trim_assistant_logs(blocks: Vec<Block>, model: &str) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|block| {
            if block.block_type != BlockType::Assistant || block.tokens <= 500 {
                return block;
            }
            if !block.content.contains('\n') || !LOG_LEVEL_MARKERS.iter().any(|m| block.content.contains(m)) {
                return block;
            }
            let trimmed = trim_logs(&block.content, 30, 80);
            if trimmed.len() >= block.content.len() {
                return block;
            }
            let tokens = count_tokens(&trimmed, model);
            let mut new_block = Block::new(block.block_type, trimmed, tokens)
                .must_keep(block.must_keep)
                .priority(block.priority);
            new_block.metadata = block.metadata;
            new_block.metadata.insert("log_trimmed".to_string(), serde_json::Value::Bool(true));
            new_block
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_logs_are_untouched() {
        let content = (0..10).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        assert_eq!(trim_logs(&content, 30, 80), content);
    }

    #[test]
    fn keeps_context_around_errors_and_the_tail() {
        let mut lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        lines[50] = "ERROR: something broke".to_string();
        let content = lines.join("\n");
        let trimmed = trim_logs(&content, 5, 80);
        assert!(trimmed.contains("ERROR: something broke"));
        assert!(trimmed.contains("line 199"));
        assert!(trimmed.contains("[logs truncated]"));
        assert!(!trimmed.contains("line 100"));
    }

    #[test]
    fn trim_assistant_logs_skips_short_blocks() {
        let block = Block::new(BlockType::Assistant, "INFO: short\nERROR: x", 10);
        let result = trim_assistant_logs(vec![block.clone()], "gpt-4o");
        assert_eq!(result[0].content, block.content);
    }

    #[test]
    fn trim_assistant_logs_skips_non_assistant_blocks() {
        let mut lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        lines[50] = "ERROR: boom".to_string();
        let content = lines.join("\n");
        let block = Block::new(BlockType::User, content.clone(), 600);
        let result = trim_assistant_logs(vec![block], "gpt-4o");
        assert_eq!(result[0].content, content);
    }
}
