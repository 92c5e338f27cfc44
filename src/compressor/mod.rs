//! Faithfulness-checked compression: two interchangeable backends (a
//! learned LLM-backed rewriter, preferred, and an extractive sentence-rank
//! fallback), gated by a Jaccard-over-entities faithfulness score so a
//! compression that drops a number, a MUST, or a proper noun never ships.

mod extractive;
mod learned;

use async_trait::async_trait;

use crate::entities::{extract_entities, is_critical};
use crate::error::CompressorError;

pub use extractive::ExtractiveCompressor;
pub use learned::LearnedCompressor;

pub const DEFAULT_FAITHFULNESS_THRESHOLD: f32 = 0.85;
pub const LARGE_INPUT_TOKENS: u32 = 2000;
pub const HEAD_FRACTION: f32 = 0.35;

/// A compression backend turns text into a shorter candidate. Implementors
/// must not be asked to handle system/constraint blocks — that exemption
/// is enforced by the caller, not here.
#[async_trait]
pub trait CompressionBackend: Send + Sync {
    async fn compress(&self, content: &str, target_ratio: f32, model: &str) -> Result<String, CompressorError>;

    fn name(&self) -> &'static str;
}

/// Jaccard similarity over extracted entity sets (capitalized words,
/// numbers, UUIDs, directive keywords), boosted by 0.1 (capped at 1) when
/// every "critical" entity from the original survives in the compressed text.
pub fn faithfulness(original: &str, compressed: &str) -> f32 {
    let orig_entities = extract_entities(original);
    let comp_entities = extract_entities(compressed);

    let base = if orig_entities.is_empty() && comp_entities.is_empty() {
        1.0
    } else {
        let intersection = orig_entities.intersection(&comp_entities).count();
        let union = orig_entities.union(&comp_entities).count();
        if union == 0 { 1.0 } else { intersection as f32 / union as f32 }
    };

    let critical: Vec<&String> = orig_entities.iter().filter(|e| is_critical(e)).collect();
    let all_critical_preserved = critical.iter().all(|e| comp_entities.contains(*e));

    if all_critical_preserved {
        (base + 0.1).min(1.0)
    } else {
        base
    }
}

/// Picks a backend at construction time based on availability and is
/// oblivious afterward — the pipeline never knows which one ran.
pub struct CompressorService {
    backend: Box<dyn CompressionBackend>,
    faithfulness_threshold: f32,
}

impl CompressorService {
    pub fn new(backend: Box<dyn CompressionBackend>, faithfulness_threshold: f32) -> Self {
        Self { backend, faithfulness_threshold }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Produce a compressed candidate and accept it only if its
    /// faithfulness score clears the threshold. Returns `None` (never an
    /// error) on backend failure or faithfulness rejection — the caller
    /// keeps the original block unchanged either way.
    pub async fn try_compress(&self, content: &str, target_ratio: f32, model: &str) -> Option<String> {
        let candidate = match self.backend.compress(content, target_ratio, model).await {
            Ok(c) => c,
            Err(_) => return None,
        };
        if faithfulness(content, &candidate) >= self.faithfulness_threshold {
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_is_fully_faithful() {
        let text = "Alice MUST ship 42 widgets.";
        assert_eq!(faithfulness(text, text), 1.0);
    }

    #[test]
    fn dropping_a_number_lowers_faithfulness() {
        let original = "Alice MUST ship 42 widgets by Friday.";
        let compressed = "Alice MUST ship widgets by Friday.";
        let score = faithfulness(original, compressed);
        assert!(score < 1.0);
    }

    #[test]
    fn preserving_all_critical_entities_gets_a_boost() {
        let original = "MUST deliver 42 units.";
        let compressed = "deliver 42 units, MUST.";
        let score = faithfulness(original, compressed);
        assert!(score >= 0.9);
    }

    #[tokio::test]
    async fn rejected_candidate_yields_none() {
        struct GutsBackend;
        #[async_trait]
        impl CompressionBackend for GutsBackend {
            async fn compress(&self, _content: &str, _target_ratio: f32, _model: &str) -> Result<String, CompressorError> {
                Ok("completely different text with none of the original entities".to_string())
            }
            fn name(&self) -> &'static str {
                "guts"
            }
        }
        let service = CompressorService::new(Box::new(GutsBackend), DEFAULT_FAITHFULNESS_THRESHOLD);
        let result = service.try_compress("Bob MUST deliver REQUIRED item 99 by 2026-01-01.", 0.5, "gpt-4o").await;
        assert!(result.is_none());
    }
}
