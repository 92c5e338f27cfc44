//! LLM-backed compressor: delegates the actual rewrite to a configured
//! inference provider. Preferred over the extractive backend when a
//! provider is available; the faithfulness gate in `super` is what keeps
//! this backend honest, not anything it does internally.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CompressorError;
use crate::inference::InferenceProvider;
use crate::types::{ContentBlock, InferenceRequest};

use super::CompressionBackend;

const COMPRESSION_MODEL_MAX_TOKENS: u32 = 1024;

pub struct LearnedCompressor {
    provider: Box<dyn InferenceProvider>,
    model: String,
}

impl LearnedCompressor {
    pub fn new(provider: Box<dyn InferenceProvider>, model: impl Into<String>) -> Self {
        Self { provider, model: model.into() }
    }

    fn prompt_for(content: &str, target_ratio: f32) -> String {
        format!(
            "Rewrite the following text to about {:.0}% of its length. \
             Preserve every proper noun, number, identifier, URL, and directive keyword \
             (MUST, NEVER, ALWAYS, REQUIRED, FORMAT) verbatim. Output only the rewritten text.\n\n{content}",
            target_ratio * 100.0
        )
    }
}

#[async_trait]
impl CompressionBackend for LearnedCompressor {
    async fn compress(&self, content: &str, target_ratio: f32, _model: &str) -> Result<String, CompressorError> {
        let request = InferenceRequest {
            model: self.model.clone(),
            max_tokens: COMPRESSION_MODEL_MAX_TOKENS,
            system: Some("You compress text for a token-budgeted prompt pipeline.".to_string()),
            tools: Vec::<Value>::new(),
            messages: vec![serde_json::json!({
                "role": "user",
                "content": Self::prompt_for(content, target_ratio),
            })],
            thinking: None,
        };

        let response = self
            .provider
            .infer(request)
            .await
            .map_err(|e| CompressorError::Unavailable(e.to_string()))?;

        response
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::Text(text) => Some(text),
                _ => None,
            })
            .ok_or_else(|| CompressorError::Failed("learned compressor returned no text".to_string()))
    }

    fn name(&self) -> &'static str {
        "learned"
    }
}
