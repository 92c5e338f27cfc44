//! Dependency-free extractive compressor: sentence-rank for ordinary
//! inputs, head/tail token-budget truncation for very large ones.

use async_trait::async_trait;

use crate::entities::count_entities_for_density;
use crate::error::CompressorError;
use crate::token_counter::{count_tokens, truncate_to_tokens};

use super::{CompressionBackend, HEAD_FRACTION, LARGE_INPUT_TOKENS};

pub const TRUNCATION_MARKER: &str = "... [truncated] ...";

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Score a sentence by position (earlier favored, slight recency lift
/// at the tail for trailing instructions) plus entity density.
fn sentence_score(sentence: &str, position: usize, total: usize) -> f32 {
    let position_score = if total <= 1 {
        1.0
    } else {
        let frac = position as f32 / (total - 1) as f32;
        // U-shaped: favors the opening (topic sentence) and the very end
        // (trailing instructions), same bias as the log-trimming heuristic.
        1.0 - 4.0 * frac * (1.0 - frac) * 0.6
    };
    let density = count_entities_for_density(sentence) as f32;
    position_score + density * 0.1
}

/// Keep the highest-scoring sentences until their combined length crosses
/// `target_ratio` of the original, preserving original order.
fn rank_and_select(text: &str, target_ratio: f32) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= 1 {
        return text.to_string();
    }

    let total = sentences.len();
    let mut scored: Vec<(usize, &str, f32)> = sentences
        .iter()
        .enumerate()
        .map(|(i, s)| (i, *s, sentence_score(s, i, total)))
        .collect();
    scored.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

    let target_chars = ((text.len() as f32) * target_ratio).ceil() as usize;
    let mut kept: Vec<(usize, &str)> = Vec::new();
    let mut running_len = 0usize;
    for (idx, sentence, _) in scored {
        if running_len >= target_chars && !kept.is_empty() {
            break;
        }
        running_len += sentence.len();
        kept.push((idx, sentence));
    }
    kept.sort_by_key(|(idx, _)| *idx);
    kept.into_iter().map(|(_, s)| s).collect::<Vec<_>>().join(" ")
}

/// Head/tail truncation for inputs too large to sentence-rank
/// economically: keep the first `HEAD_FRACTION` of the token budget and
/// the remainder from the tail, joined by a visible marker, so trailing
/// instructions (often the most load-bearing part of a long block) survive.
pub fn head_tail_truncate(text: &str, max_tokens: u32, model: &str) -> String {
    let head_budget = ((max_tokens as f32) * HEAD_FRACTION).floor() as u32;
    let tail_budget = max_tokens.saturating_sub(head_budget);

    let head = truncate_to_tokens(text, head_budget, model);

    let total_tokens = count_tokens(text, model);
    let tail = if total_tokens > head_budget {
        let reversed: String = text.chars().rev().collect();
        let tail_reversed = truncate_to_tokens(&reversed, tail_budget, model);
        tail_reversed.chars().rev().collect::<String>()
    } else {
        String::new()
    };

    if tail.is_empty() {
        head
    } else {
        format!("{head}\n{TRUNCATION_MARKER}\n{tail}")
    }
}

pub struct ExtractiveCompressor;

#[async_trait]
impl CompressionBackend for ExtractiveCompressor {
    async fn compress(&self, content: &str, target_ratio: f32, model: &str) -> Result<String, CompressorError> {
        let tokens = count_tokens(content, model);
        if tokens > LARGE_INPUT_TOKENS {
            let target_tokens = ((tokens as f32) * target_ratio).round() as u32;
            return Ok(head_tail_truncate(content, target_tokens.max(1), model));
        }
        Ok(rank_and_select(content, target_ratio))
    }

    fn name(&self) -> &'static str {
        "extractive"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_and_select_shrinks_multi_sentence_text() {
        let text = "Alice said hello. Bob replied quickly. Carol stayed silent. Dave left early.";
        let compressed = rank_and_select(text, 0.5);
        assert!(compressed.len() < text.len());
        assert!(!compressed.is_empty());
    }

    #[test]
    fn single_sentence_is_left_alone() {
        let text = "Just one sentence here";
        assert_eq!(rank_and_select(text, 0.3), text);
    }

    #[test]
    fn head_tail_truncate_preserves_trailing_text() {
        let text = "start ".repeat(500) + "FINAL INSTRUCTION MUST BE KEPT";
        let truncated = head_tail_truncate(&text, 50, "gpt-4o");
        assert!(truncated.contains(TRUNCATION_MARKER));
        assert!(truncated.ends_with("FINAL INSTRUCTION MUST BE KEPT") || truncated.contains("FINAL INSTRUCTION"));
    }

    #[tokio::test]
    async fn large_input_dispatches_to_head_tail_truncation() {
        let text = "word ".repeat(3000);
        let compressor = ExtractiveCompressor;
        let result = compressor.compress(&text, 0.5, "gpt-4o").await.unwrap();
        assert!(result.contains(TRUNCATION_MARKER));
    }
}
