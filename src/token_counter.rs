//! Token ↔ text conversion for a target model family.
//!
//! Backed by real BPE tokenizers via `tiktoken-rs`, dispatched by model name.
//! If an encoder fails to load (a `tiktoken-rs` data fetch failure, say), we
//! fall back to a chars/4 heuristic and log once rather than fail the request.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Cl100kBase,
    O200kBase,
}

fn encoding_for_model(model: &str) -> Encoding {
    let lower = model.to_lowercase();
    if lower.contains("gpt-3.5") || lower.contains("gpt-4-") || lower == "gpt-4" {
        Encoding::Cl100kBase
    } else {
        // gpt-4o, o1/o3, and anything else (including non-OpenAI model
        // families like Claude) use the newer encoding as the closest
        // available real tokenizer — there is no public BPE for those.
        Encoding::O200kBase
    }
}

fn bpe_for(encoding: Encoding) -> Option<&'static CoreBPE> {
    static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
    static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

    let cell = match encoding {
        Encoding::Cl100kBase => &CL100K,
        Encoding::O200kBase => &O200K,
    };

    cell.get_or_init(|| {
        let result = match encoding {
            Encoding::Cl100kBase => tiktoken_rs::cl100k_base(),
            Encoding::O200kBase => tiktoken_rs::o200k_base(),
        };
        match result {
            Ok(bpe) => Some(bpe),
            Err(err) => {
                warn!("failed to load {:?} tokenizer, falling back to heuristic: {err}", encoding);
                None
            }
        }
    })
    .as_ref()
}

/// Token count of `text` under `model`'s encoding. Falls back to a
/// chars/4 estimate if the tokenizer failed to load.
pub fn count_tokens(text: &str, model: &str) -> u32 {
    let encoding = encoding_for_model(model);
    match bpe_for(encoding) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u32,
        None => ((text.len() as f64) / 4.0).ceil() as u32,
    }
}

/// Truncate `text` to at most `max_tokens` tokens, returning the prefix
/// that decodes back to valid text. Falls back to a byte-prefix cut at
/// the heuristic's character budget when the tokenizer is unavailable.
pub fn truncate_to_tokens(text: &str, max_tokens: u32, model: &str) -> String {
    let encoding = encoding_for_model(model);
    match bpe_for(encoding) {
        Some(bpe) => {
            let tokens = bpe.encode_with_special_tokens(text);
            if tokens.len() as u32 <= max_tokens {
                return text.to_string();
            }
            let prefix = &tokens[..max_tokens as usize];
            bpe.decode(prefix.to_vec()).unwrap_or_default()
        }
        None => {
            let max_chars = (max_tokens as usize) * 4;
            text.chars().take(max_chars).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_tokens_for_short_text() {
        let n = count_tokens("hello world", "gpt-4o");
        assert!(n > 0 && n < 10);
    }

    #[test]
    fn model_family_dispatch_does_not_panic() {
        for model in ["gpt-3.5-turbo", "gpt-4-turbo", "gpt-4o", "claude-sonnet-4-20250514"] {
            let n = count_tokens("a short prompt", model);
            assert!(n > 0);
        }
    }

    #[test]
    fn truncation_respects_budget() {
        let text = "one two three four five six seven eight nine ten".repeat(20);
        let truncated = truncate_to_tokens(&text, 5, "gpt-4o");
        let recount = count_tokens(&truncated, "gpt-4o");
        assert!(recount <= 5);
    }

    #[test]
    fn truncation_is_noop_under_budget() {
        let text = "short";
        let truncated = truncate_to_tokens(text, 1000, "gpt-4o");
        assert_eq!(truncated, text);
    }
}
