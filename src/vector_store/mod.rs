//! Tenant-scoped persistence of blocks + embeddings, with cosine-nearest
//! search. Pluggable via the `VectorStore` trait; `InMemoryVectorStore` is
//! the zero-dependency default, `qdrant::QdrantVectorStore` (feature
//! `qdrant`) is the production backend.

#[cfg(feature = "qdrant")]
pub mod qdrant;

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::block::{Block, BlockType};
use crate::embedding::cosine_similarity;
use crate::error::VectorStoreError;

/// A block plus its embedding, as persisted per tenant.
#[derive(Debug, Clone)]
pub struct PersistedBlock {
    pub tenant_key: String,
    pub content_hash: String,
    pub block: Block,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VectorSearchHit {
    pub block: Block,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub block_types: Option<Vec<BlockType>>,
    pub min_similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert by (tenant, content-hash): re-storing the same content
    /// updates the embedding in place rather than duplicating the row.
    async fn upsert(&self, entry: PersistedBlock) -> Result<(), VectorStoreError>;

    async fn search(
        &self,
        tenant_key: &str,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorSearchHit>, VectorStoreError>;

    /// Delete blocks older than `older_than`.
    async fn delete_older_than(&self, tenant_key: &str, older_than: DateTime<Utc>) -> Result<usize, VectorStoreError>;
}

/// Brute-force, process-local default. Used when no external store is
/// configured, and in tests.
#[derive(Default)]
pub struct InMemoryVectorStore {
    rows: Mutex<HashMap<(String, String), PersistedBlock>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, entry: PersistedBlock) -> Result<(), VectorStoreError> {
        let key = (entry.tenant_key.clone(), entry.content_hash.clone());
        self.rows
            .lock()
            .map_err(|_| VectorStoreError::Unavailable("store lock poisoned".into()))?
            .insert(key, entry);
        Ok(())
    }

    async fn search(
        &self,
        tenant_key: &str,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorSearchHit>, VectorStoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| VectorStoreError::Unavailable("store lock poisoned".into()))?;

        let mut hits: Vec<VectorSearchHit> = rows
            .values()
            .filter(|row| row.tenant_key == tenant_key)
            .filter(|row| {
                filter
                    .block_types
                    .as_ref()
                    .map(|types| types.contains(&row.block.block_type))
                    .unwrap_or(true)
            })
            .map(|row| VectorSearchHit {
                block: row.block.clone(),
                similarity: cosine_similarity(query_embedding, &row.embedding),
            })
            .filter(|hit| hit.similarity >= filter.min_similarity)
            .collect();

        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_older_than(&self, tenant_key: &str, older_than: DateTime<Utc>) -> Result<usize, VectorStoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| VectorStoreError::Unavailable("store lock poisoned".into()))?;
        let before = rows.len();
        rows.retain(|(tenant, _), row| tenant != tenant_key || row.created_at >= older_than);
        Ok(before - rows.len())
    }
}
