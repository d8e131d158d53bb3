//! Anthropic `/v1/messages` request, response, and SSE event schema.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessagesRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<AnthropicSystem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Value>,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `system` is either a bare string or a list of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicSystem {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

impl AnthropicSystem {
    pub fn as_text(&self) -> String {
        match self {
            AnthropicSystem::Text(s) => s.clone(),
            AnthropicSystem::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    AnthropicContentBlock::Text { text, .. } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: AnthropicMessageContent,

    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Message content is either a plain string or an ordered list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicMessageContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

impl AnthropicMessageContent {
    pub fn blocks(&self) -> Vec<AnthropicContentBlock> {
        match self {
            AnthropicMessageContent::Text(s) => vec![AnthropicContentBlock::Text {
                text: s.clone(),
                extra: BTreeMap::new(),
            }],
            AnthropicMessageContent::Blocks(b) => b.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
        #[serde(default, flatten)]
        extra: BTreeMap<String, Value>,
    },
    Image {
        source: Value,
        #[serde(default, flatten)]
        extra: BTreeMap<String, Value>,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
        #[serde(default, flatten)]
        extra: BTreeMap<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(default, flatten)]
        extra: BTreeMap<String, Value>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
        #[serde(default, flatten)]
        extra: BTreeMap<String, Value>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicMessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<AnthropicContentBlock>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,

    pub usage: Value,
}

impl AnthropicMessagesResponse {
    pub fn new(id: String, model: String, content: Vec<AnthropicContentBlock>) -> Self {
        Self {
            id,
            kind: "message".to_string(),
            role: "assistant".to_string(),
            model,
            content,
            stop_reason: None,
            stop_sequence: None,
            usage: Value::Null,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: AnthropicErrorObject,
}

impl AnthropicErrorBody {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            error: AnthropicErrorObject {
                kind: kind.into(),
                message: message.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicErrorObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_system_is_supported() {
        let req: AnthropicMessagesRequest = serde_json::from_value(json!({
            "model": "claude-3",
            "max_tokens": 1024,
            "system": "be concise",
            "messages": []
        }))
        .unwrap();
        assert_eq!(req.system.unwrap().as_text(), "be concise");
    }

    #[test]
    fn tool_use_and_tool_result_blocks_roundtrip() {
        let input = json!([
            {"type": "tool_use", "id": "t1", "name": "get_weather", "input": {"city": "Paris"}},
            {"type": "tool_result", "tool_use_id": "t1", "content": "sunny"}
        ]);
        let blocks: Vec<AnthropicContentBlock> = serde_json::from_value(input.clone()).unwrap();
        assert!(matches!(blocks[0], AnthropicContentBlock::ToolUse { .. }));
        assert!(matches!(blocks[1], AnthropicContentBlock::ToolResult { .. }));
        assert_eq!(serde_json::to_value(&blocks).unwrap(), input);
    }

    #[test]
    fn plain_string_message_content_normalizes_to_one_text_block() {
        let content: AnthropicMessageContent = serde_json::from_value(json!("hello")).unwrap();
        let blocks = content.blocks();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(&blocks[0], AnthropicContentBlock::Text { text, .. } if text == "hello"));
    }
}
