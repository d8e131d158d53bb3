//! Anthropic messages dialect ⇄ canonical Gemini translation.

use relaykit_schema::anthropic::{
    AnthropicContentBlock, AnthropicMessage, AnthropicMessagesRequest, AnthropicMessagesResponse,
};
use relaykit_schema::gemini::{Content, FunctionDeclaration, GeminiGenerateContentRequest, GenerationConfig, Part, Tool};
use serde_json::{Value, json};

use crate::error::ProxyError;
use crate::upstream::thinking::apply_reasoning_effort;

pub fn to_canonical(request: &AnthropicMessagesRequest) -> Result<GeminiGenerateContentRequest, ProxyError> {
    let mut contents: Vec<Content> = Vec::new();

    if let Some(system) = &request.system {
        let text = system.as_text();
        if !text.is_empty() {
            contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(format!("System: {text}")),
                    ..Default::default()
                }],
                extra: Default::default(),
            });
        }
    }

    contents.extend(request.messages.iter().map(message_to_content));

    let mut generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        max_output_tokens: Some(request.max_tokens),
        ..Default::default()
    };
    let reasoning_effort = if request.thinking.is_some() { Some("medium") } else { None };
    apply_reasoning_effort(&mut generation_config, reasoning_effort);

    let tools = request.tools.as_ref().map(|defs| {
        vec![Tool {
            function_declarations: Some(
                defs.iter()
                    .map(|t| FunctionDeclaration {
                        name: t.name.clone(),
                        description: t.description.clone().unwrap_or_default(),
                        behavior: None,
                        parameters: Some(t.input_schema.clone()),
                        parameters_json_schema: None,
                        response: None,
                        response_json_schema: None,
                        extra: Default::default(),
                    })
                    .collect(),
            ),
            extra: Default::default(),
        }]
    });

    Ok(GeminiGenerateContentRequest {
        contents,
        system_instruction: None,
        generation_config: Some(generation_config),
        tools,
        tool_config: None,
        extra: Default::default(),
    })
}

fn message_to_content(message: &AnthropicMessage) -> Content {
    let role = if message.role == "assistant" { "model" } else { "user" };
    let parts = message
        .content
        .blocks()
        .iter()
        .filter_map(block_to_part)
        .collect();
    Content {
        role: Some(role.to_string()),
        parts,
        extra: Default::default(),
    }
}

fn block_to_part(block: &AnthropicContentBlock) -> Option<Part> {
    match block {
        AnthropicContentBlock::Text { text, .. } => Some(Part {
            text: Some(text.clone()),
            ..Default::default()
        }),
        AnthropicContentBlock::Image { source, .. } => {
            let mime_type = source.get("media_type").and_then(Value::as_str)?.to_string();
            let data = source.get("data").and_then(Value::as_str)?.to_string();
            Some(Part {
                inline_data: Some(json!({"mimeType": mime_type, "data": data})),
                ..Default::default()
            })
        }
        AnthropicContentBlock::ToolUse { name, input, .. } => Some(Part {
            function_call: Some(json!({"name": name, "args": input})),
            ..Default::default()
        }),
        AnthropicContentBlock::ToolResult { tool_use_id: _, content, .. } => Some(Part {
            function_response: Some(json!({
                "name": "tool_result",
                "response": {"result": content.clone().unwrap_or(Value::Null)},
            })),
            ..Default::default()
        }),
        AnthropicContentBlock::Thinking { thinking, .. } => Some(Part {
            thought: Some(true),
            text: Some(thinking.clone()),
            ..Default::default()
        }),
    }
}

/// Builds a non-streaming Anthropic response from a canonical Gemini response.
pub fn from_canonical_response(id: String, model: &str, stop_reason: Option<&str>, parts: &[Part]) -> AnthropicMessagesResponse {
    let mut content = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        if let Some(text) = &part.text {
            if part.thought == Some(true) {
                content.push(AnthropicContentBlock::Thinking {
                    thinking: text.clone(),
                    signature: part.thought_signature.clone(),
                    extra: Default::default(),
                });
            } else {
                content.push(AnthropicContentBlock::Text {
                    text: text.clone(),
                    extra: Default::default(),
                });
            }
        }
        if let Some(call) = &part.function_call {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let input = call.get("args").cloned().unwrap_or(Value::Null);
            content.push(AnthropicContentBlock::ToolUse {
                id: format!("toolu_{index}"),
                name,
                input,
                extra: Default::default(),
            });
        }
    }

    let mut response = AnthropicMessagesResponse::new(id, model.to_string(), content);
    response.stop_reason = Some(map_stop_reason(stop_reason.unwrap_or("STOP")).to_string());
    response
}

pub fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "refusal",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn req(value: Value) -> AnthropicMessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn system_string_becomes_leading_marker_turn() {
        let request = req(json!({
            "model": "claude-opus",
            "max_tokens": 100,
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let canonical = to_canonical(&request).unwrap();
        assert!(canonical.system_instruction.is_none());
        assert_eq!(canonical.contents.len(), 2);
        assert_eq!(canonical.contents[0].role.as_deref(), Some("user"));
        assert_eq!(canonical.contents[0].parts[0].text.as_deref(), Some("System: be terse"));
    }

    #[test]
    fn assistant_role_maps_to_model() {
        let request = req(json!({
            "model": "claude-opus",
            "max_tokens": 100,
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        }));
        let canonical = to_canonical(&request).unwrap();
        assert_eq!(canonical.contents[1].role.as_deref(), Some("model"));
    }

    #[test]
    fn tool_use_block_becomes_function_call_part() {
        let request = req(json!({
            "model": "claude-opus",
            "max_tokens": 100,
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "get_weather", "input": {"city": "nyc"}}
                ]}
            ]
        }));
        let canonical = to_canonical(&request).unwrap();
        assert!(canonical.contents[0].parts[0].function_call.is_some());
    }

    #[test]
    fn stop_reason_maps_max_tokens() {
        assert_eq!(map_stop_reason("MAX_TOKENS"), "max_tokens");
        assert_eq!(map_stop_reason("STOP"), "end_turn");
    }
}
