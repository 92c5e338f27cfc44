use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// The kind of content a block carries. Drives default priority, must-keep
/// status, and which stages are allowed to touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    System,
    User,
    Assistant,
    Tool,
    Doc,
    Constraint,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::System => "system",
            BlockType::User => "user",
            BlockType::Assistant => "assistant",
            BlockType::Tool => "tool",
            BlockType::Doc => "doc",
            BlockType::Constraint => "constraint",
        }
    }

    /// Types the compressor must never rewrite, regardless of `must_keep`.
    pub fn is_compression_exempt(&self) -> bool {
        matches!(self, BlockType::System | BlockType::Constraint)
    }
}

/// Atomic, independently droppable/compressible unit of a prompt.
///
/// Invariants the rest of the pipeline relies on: `tokens` always equals
/// `count_tokens(content, model)` after a mutation; `priority` stays in
/// `[0, 1]`; system/constraint blocks are never rewritten by the compressor;
/// a block is rewritten by the compressor at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub content: String,
    pub tokens: u32,
    #[serde(default)]
    pub must_keep: bool,
    pub priority: f32,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default)]
    pub compressed: bool,
}

impl Block {
    pub fn new(block_type: BlockType, content: impl Into<String>, tokens: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            block_type,
            content: content.into(),
            tokens,
            must_keep: false,
            priority: 0.5,
            timestamp: Some(Utc::now()),
            metadata: HashMap::new(),
            compressed: false,
        }
    }

    pub fn must_keep(mut self, flag: bool) -> Self {
        self.must_keep = flag;
        self
    }

    pub fn priority(mut self, value: f32) -> Self {
        self.priority = value.clamp(0.0, 1.0);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Dedup key: lowercased, trimmed content, hashed. Two blocks with the
    /// same visible text collide regardless of casing or surrounding whitespace.
    pub fn fingerprint(&self) -> String {
        let normalized = self.content.trim().to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn index(&self) -> Option<u64> {
        self.metadata.get("index").and_then(|v| v.as_u64())
    }

    pub fn set_index(&mut self, index: u64) {
        self.metadata.insert("index".to_string(), Value::from(index));
    }
}

pub fn total_tokens(blocks: &[Block]) -> u32 {
    blocks.iter().map(|b| b.tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_case_and_whitespace() {
        let a = Block::new(BlockType::User, "  Hello World  ", 2);
        let b = Block::new(BlockType::User, "hello world", 2);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn priority_clamps_to_unit_interval() {
        let b = Block::new(BlockType::User, "x", 1).priority(1.5);
        assert_eq!(b.priority, 1.0);
        let b = Block::new(BlockType::User, "x", 1).priority(-0.5);
        assert_eq!(b.priority, 0.0);
    }

    #[test]
    fn compression_exemption_covers_system_and_constraint() {
        assert!(BlockType::System.is_compression_exempt());
        assert!(BlockType::Constraint.is_compression_exempt());
        assert!(!BlockType::User.is_compression_exempt());
        assert!(!BlockType::Tool.is_compression_exempt());
    }

    #[test]
    fn total_tokens_sums_across_blocks() {
        let blocks = vec![
            Block::new(BlockType::System, "a", 10),
            Block::new(BlockType::User, "b", 5),
        ];
        assert_eq!(total_tokens(&blocks), 15);
    }
}
