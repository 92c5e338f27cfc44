use serde_json::Value;

use crate::block::{Block, BlockType};
use crate::token_counter::count_tokens;

/// Encode a JSON array of uniform objects as `Schema#k1,k2[v1,v2|v3,v4]`,
/// a schema-header plus pipe-separated rows. Returns the original content
/// unchanged if the input isn't a non-empty array of objects, or if the
/// encoded form isn't strictly shorter.
pub fn compress_json_toon(content: &str, max_items: usize) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(content) else { return content.to_string() };
    let Value::Array(items) = parsed else { return content.to_string() };
    if items.is_empty() {
        return content.to_string();
    }

    let items: Vec<&Value> = items.iter().take(max_items).collect();
    if !items.iter().all(|item| item.is_object()) {
        return content.to_string();
    }

    let Some(Value::Object(first)) = items.first().map(|v| &**v) else { return content.to_string() };
    if first.is_empty() {
        return content.to_string();
    }
    let keys: Vec<&String> = first.keys().collect();
    if keys.is_empty() {
        return content.to_string();
    }

    let schema = keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",");
    let rows: Vec<String> = items
        .iter()
        .map(|item| {
            keys.iter()
                .map(|k| match item.get(k.as_str()) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect();

    let toon = format!("Schema#{schema}[{}]", rows.join("|"));
    if toon.len() < content.len() {
        toon
    } else {
        content.to_string()
    }
}

/// Apply TOON compaction to doc blocks whose content is a tabular JSON array.
pub fn compact_tabular_docs(blocks: Vec<Block>, max_items: usize, model: &str) -> Vec<Block> {
    blocks
        .into_iter()
        .map(|block| {
            if block.block_type != BlockType::Doc {
                return block;
            }
            let compressed = compress_json_toon(&block.content, max_items);
            if compressed == block.content {
                return block;
            }
            let tokens = count_tokens(&compressed, model);
            let mut new_block = Block::new(block.block_type, compressed, tokens)
                .must_keep(block.must_keep)
                .priority(block.priority);
            new_block.metadata = block.metadata;
            new_block.metadata.insert("toon_compressed".to_string(), Value::Bool(true));
            new_block
        })
        .collect()
}
