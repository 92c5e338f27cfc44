//! Batch text embedding behind a lazily-constructed, process-wide service.

mod ollama;

use std::sync::OnceLock;

use async_trait::async_trait;
use tracing::warn;

use crate::error::EmbeddingError;

pub use ollama::OllamaEmbedder;

/// Pluggable embedding backend. Implementors must L2-normalize their
/// output vectors — cosine similarity downstream is a plain dot product.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut results = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        results.pop().ok_or_else(|| EmbeddingError::Request("empty batch response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn dimensions(&self) -> usize;
}

/// Wraps an `EmbeddingProvider` with lazy, attempt-once construction: if
/// the provider fails once, the service reports unavailable on every
/// later call without retrying the failed construction.
pub struct EmbeddingService {
    provider: OnceLock<Option<Box<dyn EmbeddingProvider>>>,
    build: Box<dyn Fn() -> Box<dyn EmbeddingProvider> + Send + Sync>,
}

impl EmbeddingService {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> Box<dyn EmbeddingProvider> + Send + Sync + 'static,
    {
        Self { provider: OnceLock::new(), build: Box::new(build) }
    }

    fn provider(&self) -> Option<&dyn EmbeddingProvider> {
        self.provider
            .get_or_init(|| {
                let provider = (self.build)();
                Some(provider)
            })
            .as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.provider().is_some()
    }

    /// Embed a batch of texts. Returns `None` (never an error) when the
    /// provider is unavailable — the semantic stage must skip cleanly.
    pub async fn embed_batch(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        let provider = self.provider()?;
        match provider.embed_batch(texts).await {
            Ok(vectors) => Some(vectors),
            Err(err) => {
                warn!("embedding batch call failed, treating as unavailable: {err}");
                None
            }
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("no model configured".into()))
        }
        fn dimensions(&self) -> usize {
            8
        }
    }

    #[tokio::test]
    async fn unavailable_provider_reports_none_not_error() {
        let service = EmbeddingService::new(|| Box::new(FailingProvider));
        let result = service.embed_batch(&["hello".to_string()]).await;
        assert!(result.is_none());
    }

    #[test]
    fn cosine_similarity_of_unit_vectors_is_dot_product() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&a, &a), 1.0);
    }
}
