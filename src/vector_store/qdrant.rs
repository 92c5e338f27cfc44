//! Qdrant-backed `VectorStore`. A single collection holds blocks for every
//! tenant; `tenant_key` is stored as a payload field and filtered on at
//! query time rather than split across per-tenant collections, since tenant
//! counts here are expected in the thousands rather than the dozens.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{info, warn};

use super::{PersistedBlock, SearchFilter, VectorSearchHit, VectorStore};
use crate::block::{Block, BlockType};
use crate::error::VectorStoreError;

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimensions: usize,
}

impl QdrantVectorStore {
    pub async fn new(url: &str, collection: &str, dimensions: usize) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to connect to qdrant: {e}")))?;

        let store = Self { client, collection: collection.to_string(), dimensions };
        store.ensure_collection(dimensions).await?;
        Ok(store)
    }

    async fn ensure_collection(&self, dimensions: usize) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to check collection: {e}")))?;

        if exists {
            return Ok(());
        }

        info!(collection = %self.collection, dimensions, "creating qdrant collection");
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to create collection: {e}")))?;
        Ok(())
    }

    async fn payload_index_exists(&self, field: &str) -> Result<bool, VectorStoreError> {
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to read collection info: {e}")))?;
        Ok(info.result.map(|r| r.payload_schema.contains_key(field)).unwrap_or(false))
    }

    async fn ensure_payload_index(&self, field: &str, field_type: FieldType) -> Result<(), VectorStoreError> {
        if self.payload_index_exists(field).await? {
            info!(field, "payload index already present, skipping");
            return Ok(());
        }

        info!(field, "creating payload index");
        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(&self.collection, field, field_type))
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("failed to create payload index on {field}: {e}")))?;
        Ok(())
    }

    /// Ordered, idempotent collection-setup steps: ensure the collection
    /// exists, then the two payload indexes selection filtering relies on.
    /// Each step checks Qdrant's own collection state before acting, so
    /// running this on an already-migrated collection is a no-op.
    pub async fn run_migrations(&self) -> Result<(), VectorStoreError> {
        self.ensure_collection(self.dimensions).await?;
        self.ensure_payload_index("tenant_key", FieldType::Keyword).await?;
        self.ensure_payload_index("created_at", FieldType::Integer).await?;
        Ok(())
    }
}

fn point_id_for(tenant_key: &str, content_hash: &str) -> String {
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, format!("{tenant_key}:{content_hash}").as_bytes()).to_string()
}

fn block_type_from_str(s: &str) -> BlockType {
    match s {
        "system" => BlockType::System,
        "user" => BlockType::User,
        "assistant" => BlockType::Assistant,
        "tool" => BlockType::Tool,
        "constraint" => BlockType::Constraint,
        _ => BlockType::Doc,
    }
}

fn extract_string(payload: &std::collections::HashMap<String, QdrantValue>, key: &str) -> String {
    payload.get(key).and_then(|v| v.as_str().map(str::to_string)).unwrap_or_default()
}

fn extract_bool(payload: &std::collections::HashMap<String, QdrantValue>, key: &str) -> bool {
    payload.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn extract_f32(payload: &std::collections::HashMap<String, QdrantValue>, key: &str) -> f32 {
    payload.get(key).and_then(|v| v.as_double()).unwrap_or(0.0) as f32
}

fn extract_u32(payload: &std::collections::HashMap<String, QdrantValue>, key: &str) -> u32 {
    payload.get(key).and_then(|v| v.as_integer()).unwrap_or(0) as u32
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, entry: PersistedBlock) -> Result<(), VectorStoreError> {
        let id = point_id_for(&entry.tenant_key, &entry.content_hash);

        let payload: Payload = serde_json::json!({
            "tenant_key": entry.tenant_key,
            "content_hash": entry.content_hash,
            "content": entry.block.content,
            "block_type": entry.block.block_type.as_str(),
            "tokens": entry.block.tokens,
            "must_keep": entry.block.must_keep,
            "priority": entry.block.priority,
            "embedding_model": entry.embedding_model,
            "created_at": entry.created_at.timestamp(),
        })
        .try_into()
        .map_err(|e| VectorStoreError::InvalidInput(format!("failed to build payload: {e}")))?;

        let point = PointStruct::new(id, entry.embedding, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]))
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("upsert failed: {e}")))?;
        Ok(())
    }

    async fn search(
        &self,
        tenant_key: &str,
        query_embedding: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<VectorSearchHit>, VectorStoreError> {
        let mut must = vec![Condition::matches("tenant_key", tenant_key.to_string())];
        if let Some(types) = &filter.block_types {
            let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
            must.push(Condition::matches("block_type", names));
        }

        let search = SearchPointsBuilder::new(&self.collection, query_embedding.to_vec(), top_k as u64)
            .filter(Filter::must(must))
            .with_payload(true)
            .score_threshold(filter.min_similarity);

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("search failed: {e}")))?;

        let hits = response
            .result
            .into_iter()
            .filter_map(|scored| {
                let payload = scored.payload;
                let content = extract_string(&payload, "content");
                if content.is_empty() {
                    warn!("qdrant point missing content payload, skipping");
                    return None;
                }
                let mut block = Block::new(block_type_from_str(&extract_string(&payload, "block_type")), content, extract_u32(&payload, "tokens"));
                block.must_keep = extract_bool(&payload, "must_keep");
                block.priority = extract_f32(&payload, "priority");
                Some(VectorSearchHit { block, similarity: scored.score })
            })
            .collect();

        Ok(hits)
    }

    async fn delete_older_than(&self, tenant_key: &str, older_than: DateTime<Utc>) -> Result<usize, VectorStoreError> {
        let filter = Filter::must(vec![
            Condition::matches("tenant_key", tenant_key.to_string()),
            Condition::range("created_at", qdrant_client::qdrant::Range {
                lt: Some(older_than.timestamp() as f64),
                ..Default::default()
            }),
        ]);

        let before = self
            .client
            .count(CountPointsBuilder::new(&self.collection).filter(filter.clone()))
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("count failed: {e}")))?
            .result
            .map(|r| r.count)
            .unwrap_or(0);

        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(filter))
            .await
            .map_err(|e| VectorStoreError::Unavailable(format!("delete failed: {e}")))?;

        Ok(before as usize)
    }
}
