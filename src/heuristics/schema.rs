use serde_json::Value;

use crate::block::{Block, BlockType};
use crate::token_counter::count_tokens;

fn minimize_parameters(params: &Value) -> Value {
    let Value::Object(params) = params else { return params.clone() };
    let mut minimized = serde_json::Map::new();

    if let Some(t) = params.get("type") {
        minimized.insert("type".to_string(), t.clone());
    }
    if let Some(Value::Object(properties)) = params.get("properties") {
        let mut minimized_props = serde_json::Map::new();
        for (name, spec) in properties {
            let mut prop = serde_json::Map::new();
            if let Some(t) = spec.get("type") {
                prop.insert("type".to_string(), t.clone());
            }
            if let Some(e) = spec.get("enum") {
                prop.insert("enum".to_string(), e.clone());
            }
            minimized_props.insert(name.clone(), Value::Object(prop));
        }
        minimized.insert("properties".to_string(), Value::Object(minimized_props));
    }
    if let Some(r) = params.get("required") {
        minimized.insert("required".to_string(), r.clone());
    }

    Value::Object(minimized)
}

/// Keep only `{name, parameters{type, properties{type, enum?}, required}, required}`
/// from each tool schema block, dropping descriptions/examples. Blocks that
/// don't parse as JSON, or whose tool name isn't on the allowlist, are
/// skipped (kept verbatim, or — for a non-allowlisted name — dropped).
pub fn minimize_tool_schemas(blocks: Vec<Block>, allowlist: &[String], model: &str) -> Vec<Block> {
    let allow_all = allowlist.iter().any(|t| t == "*");

    blocks
        .into_iter()
        .filter_map(|block| {
            if block.block_type != BlockType::Tool {
                return Some(block);
            }
            let Ok(schema) = serde_json::from_str::<Value>(&block.content) else {
                return Some(block);
            };
            let Value::Object(schema) = &schema else { return Some(block) };

            if !allow_all {
                let name = schema.get("name").and_then(|v| v.as_str()).unwrap_or("");
                if !allowlist.iter().any(|t| t == name) {
                    return None;
                }
            }

            let mut minimized = serde_json::Map::new();
            if let Some(name) = schema.get("name") {
                minimized.insert("name".to_string(), name.clone());
            }
            if let Some(params) = schema.get("parameters") {
                minimized.insert("parameters".to_string(), minimize_parameters(params));
            }
            if let Some(required) = schema.get("required") {
                minimized.insert("required".to_string(), required.clone());
            }

            let content = serde_json::to_string(&minimized).unwrap_or_default();
            let tokens = count_tokens(&content, model);
            let mut new_block = Block::new(block.block_type, content, tokens)
                .must_keep(block.must_keep)
                .priority(block.priority);
            new_block.metadata = block.metadata;
            new_block.metadata.insert("minimized".to_string(), Value::Bool(true));
            Some(new_block)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_block(schema: Value) -> Block {
        Block::new(BlockType::Tool, serde_json::to_string(&schema).unwrap(), 50).must_keep(true)
    }

    #[test]
    fn strips_descriptions_keeps_essential_fields() {
        let schema = json!({
            "name": "search",
            "description": "Searches the web",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "what to search for"}
                },
                "required": ["query"]
            },
            "required": ["parameters"]
        });
        let blocks = minimize_tool_schemas(vec![tool_block(schema)], &["*".to_string()], "gpt-4o");
        let parsed: Value = serde_json::from_str(&blocks[0].content).unwrap();
        assert!(parsed.get("description").is_none());
        assert!(parsed["parameters"]["properties"]["query"].get("description").is_none());
        assert_eq!(parsed["name"], "search");
    }

    #[test]
    fn preserves_enum_values() {
        let schema = json!({
            "name": "pick",
            "parameters": {
                "type": "object",
                "properties": {"color": {"type": "string", "enum": ["red", "blue"]}}
            }
        });
        let blocks = minimize_tool_schemas(vec![tool_block(schema)], &["*".to_string()], "gpt-4o");
        let parsed: Value = serde_json::from_str(&blocks[0].content).unwrap();
        assert_eq!(parsed["parameters"]["properties"]["color"]["enum"], json!(["red", "blue"]));
    }

    #[test]
    fn non_json_tool_block_passes_through_unchanged() {
        let block = Block::new(BlockType::Tool, "not json", 5).must_keep(true);
        let blocks = minimize_tool_schemas(vec![block], &["*".to_string()], "gpt-4o");
        assert_eq!(blocks[0].content, "not json");
    }

    #[test]
    fn allowlist_drops_unlisted_tools() {
        let schema = json!({"name": "dangerous_tool"});
        let blocks = minimize_tool_schemas(vec![tool_block(schema)], &["safe_tool".to_string()], "gpt-4o");
        assert!(blocks.is_empty());
    }

    #[test]
    fn non_tool_blocks_are_untouched() {
        let block = Block::new(BlockType::User, "hello", 2);
        let blocks = minimize_tool_schemas(vec![block], &["*".to_string()], "gpt-4o");
        assert_eq!(blocks[0].content, "hello");
    }
}
