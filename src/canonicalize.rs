//! Turn heterogeneous request inputs into a uniform `Block` sequence.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block::{Block, BlockType};
use crate::token_counter::count_tokens;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

/// One of the three document shapes the canonicalizer accepts:
/// `{text}`, `{content, metadata}`, or `{page_content}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RagDoc {
    pub id: Option<String>,
    pub text: Option<String>,
    pub content: Option<String>,
    pub page_content: Option<String>,
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl RagDoc {
    fn resolved_text(&self) -> &str {
        self.text
            .as_deref()
            .or(self.content.as_deref())
            .or(self.page_content.as_deref())
            .unwrap_or("")
    }

    fn resolved_id(&self, index: usize) -> String {
        self.id
            .clone()
            .or_else(|| {
                self.metadata
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("doc-{index}"))
    }

    fn resolved_source(&self) -> String {
        self.source
            .clone()
            .or_else(|| self.metadata.get("source").and_then(|v| v.as_str()).map(str::to_string))
            .or_else(|| self.metadata.get("type").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_else(|| "rag".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    pub text: String,
}

/// All inputs the canonicalizer accepts for a single request.
#[derive(Debug, Clone, Default)]
pub struct CanonicalizeInput {
    pub messages: Vec<Message>,
    pub tools: Option<Value>,
    pub rag_context: Vec<RagDoc>,
    pub tool_outputs: Vec<ToolOutput>,
}

fn messages_to_blocks(messages: &[Message], model: &str) -> Vec<Block> {
    let last_index = messages.len().saturating_sub(1);
    messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            let (block_type, must_keep, priority) = match msg.role.as_str() {
                "system" => (BlockType::System, true, 1.0),
                "user" => {
                    let is_last = i == last_index;
                    (BlockType::User, is_last, if is_last { 0.9 } else { 0.7 })
                }
                "assistant" => (BlockType::Assistant, false, 0.5),
                _ => (BlockType::Assistant, false, 0.3),
            };
            let tokens = count_tokens(&msg.content, model);
            Block::new(block_type, msg.content.clone(), tokens)
                .must_keep(must_keep)
                .priority(priority)
                .with_metadata("source", Value::from("message"))
                .with_metadata("index", Value::from(i))
        })
        .collect()
}

fn tools_to_blocks(tools: Option<&Value>, model: &str) -> Vec<Block> {
    let Some(tools) = tools else { return Vec::new() };
    let content = serde_json::to_string(tools).unwrap_or_default();
    if content.is_empty() || content == "null" {
        return Vec::new();
    }
    let tokens = count_tokens(&content, model);
    vec![Block::new(BlockType::Tool, content, tokens)
        .must_keep(true)
        .priority(0.8)
        .with_metadata("source", Value::from("tool_schema"))]
}

fn rag_context_to_blocks(docs: &[RagDoc], model: &str) -> Vec<Block> {
    docs.iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            let text = doc.resolved_text();
            if text.trim().is_empty() {
                return None;
            }
            let tokens = count_tokens(text, model);
            Some(
                Block::new(BlockType::Doc, text.to_string(), tokens)
                    .must_keep(false)
                    .priority(0.6)
                    .with_metadata("source", Value::from(doc.resolved_source()))
                    .with_metadata("doc_id", Value::from(doc.resolved_id(i))),
            )
        })
        .collect()
}

fn tool_outputs_to_blocks(outputs: &[ToolOutput], model: &str) -> Vec<Block> {
    outputs
        .iter()
        .map(|output| {
            let tokens = count_tokens(&output.text, model);
            Block::new(BlockType::Tool, output.text.clone(), tokens)
                .must_keep(false)
                .priority(0.7)
                .with_metadata("source", Value::from("tool_output"))
                .with_metadata("tool_name", Value::from(output.tool.clone()))
        })
        .collect()
}

/// Convert all request inputs to a single Block sequence, in the fixed
/// order messages → tools → docs → tool outputs.
pub fn canonicalize(input: &CanonicalizeInput, model: &str) -> Vec<Block> {
    let mut blocks = messages_to_blocks(&input.messages, model);
    blocks.extend(tools_to_blocks(input.tools.as_ref(), model));
    blocks.extend(rag_context_to_blocks(&input.rag_context, model));
    blocks.extend(tool_outputs_to_blocks(&input.tool_outputs, model));
    blocks
}

/// Reverse mapping for the final response: only message-shaped blocks
/// (system/user/assistant) become chat messages again.
pub fn blocks_to_messages(blocks: &[Block]) -> Vec<Message> {
    blocks
        .iter()
        .filter(|b| matches!(b.block_type, BlockType::System | BlockType::User | BlockType::Assistant))
        .map(|b| Message {
            role: b.block_type.as_str().to_string(),
            content: b.content.clone(),
        })
        .collect()
}
