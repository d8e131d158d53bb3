//! OpenAI chat-completions dialect ⇄ canonical Gemini translation.

use relaykit_schema::gemini::{
    Content, FunctionDeclaration, GeminiGenerateContentRequest, GenerationConfig, Part, Tool,
};
use relaykit_schema::openai::{
    ChatChoice, ChatChunkChoice, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse,
    ChatContent, ChatDelta, ChatMessage, FunctionCallBody, FunctionCallDeltaBody, FunctionDef, ToolCall,
    ToolCallDelta, ToolDef,
};
use serde_json::{Value, json};

use crate::error::ProxyError;
use crate::upstream::thinking::apply_reasoning_effort;

/// Builds the canonical Gemini request from an inbound OpenAI chat request.
pub fn to_canonical(request: &ChatCompletionRequest) -> Result<GeminiGenerateContentRequest, ProxyError> {
    let mut contents = Vec::new();
    let mut system_parts: Vec<String> = Vec::new();

    for message in &request.messages {
        match message.role.as_str() {
            "system" => {
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        system_parts.push(text);
                    }
                }
            }
            "tool" => {
                let name = message.name.clone().unwrap_or_default();
                let response_text = message.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        function_response: Some(json!({
                            "name": name,
                            "response": {"result": response_text},
                        })),
                        ..Default::default()
                    }],
                    extra: Default::default(),
                });
            }
            "assistant" => {
                let mut parts = Vec::new();
                if let Some(content) = &message.content {
                    let text = content.as_text();
                    if !text.is_empty() {
                        parts.push(Part {
                            text: Some(text),
                            ..Default::default()
                        });
                    }
                }
                for call in message.tool_calls.iter().flatten() {
                    let args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
                    parts.push(Part {
                        function_call: Some(json!({"name": call.function.name, "args": args})),
                        ..Default::default()
                    });
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("model".to_string()),
                        parts,
                        extra: Default::default(),
                    });
                }
            }
            _ => {
                let mut parts = Vec::new();
                if let Some(content) = &message.content {
                    match content {
                        ChatContent::Text(text) => {
                            if !text.is_empty() {
                                parts.push(Part {
                                    text: Some(text.clone()),
                                    ..Default::default()
                                });
                            }
                        }
                        ChatContent::Parts(chat_parts) => {
                            for part in chat_parts {
                                if part.kind == "text" {
                                    if let Some(text) = &part.text {
                                        parts.push(Part {
                                            text: Some(text.clone()),
                                            ..Default::default()
                                        });
                                    }
                                } else if part.kind == "image_url" {
                                    if let Some(image) = &part.image_url {
                                        if let Some((mime_type, data)) = split_data_url(&image.url) {
                                            parts.push(Part {
                                                inline_data: Some(json!({
                                                    "mimeType": mime_type,
                                                    "data": data,
                                                })),
                                                ..Default::default()
                                            });
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                if !parts.is_empty() {
                    contents.push(Content {
                        role: Some("user".to_string()),
                        parts,
                        extra: Default::default(),
                    });
                }
            }
        }
    }

    if !system_parts.is_empty() {
        contents.insert(
            0,
            Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(format!("System: {}", system_parts.join("\n\n"))),
                    ..Default::default()
                }],
                extra: Default::default(),
            },
        );
    }

    let mut generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        ..Default::default()
    };
    apply_reasoning_effort(&mut generation_config, request.reasoning_effort.as_deref());

    let tools = request.tools.as_ref().map(|defs| {
        vec![Tool {
            function_declarations: Some(defs.iter().map(tool_def_to_declaration).collect()),
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

fn tool_def_to_declaration(def: &ToolDef) -> FunctionDeclaration {
    FunctionDeclaration {
        name: def.function.name.clone(),
        description: def.function.description.clone().unwrap_or_default(),
        behavior: None,
        parameters: def.function.parameters.clone(),
        parameters_json_schema: None,
        response: None,
        response_json_schema: None,
        extra: Default::default(),
    }
}

fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime_type = meta.trim_end_matches(";base64").to_string();
    Some((mime_type, data.to_string()))
}

/// Builds a non-streaming OpenAI response from a canonical Gemini response.
pub fn from_canonical_response(response_id: String, model: &str, candidates: &[(Option<String>, Vec<Part>)]) -> ChatCompletionResponse {
    let choices = candidates
        .iter()
        .enumerate()
        .map(|(index, (finish_reason, parts))| {
            let (text, tool_calls) = collect_text_and_tool_calls(parts);
            ChatChoice {
                index: index as u32,
                message: ChatMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() { None } else { Some(ChatContent::Text(text)) },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                    name: None,
                    extra: Default::default(),
                },
                finish_reason: finish_reason.clone().map(|r| map_finish_reason(&r)),
            }
        })
        .collect();

    ChatCompletionResponse {
        id: response_id,
        object: "chat.completion".to_string(),
        created: 0,
        model: model.to_string(),
        choices,
        usage: None,
    }
}

fn collect_text_and_tool_calls(parts: &[Part]) -> (String, Vec<ToolCall>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for (index, part) in parts.iter().enumerate() {
        if let Some(part_text) = &part.text {
            if part.thought != Some(true) {
                text.push_str(part_text);
            }
        }
        if let Some(call) = &part.function_call {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            tool_calls.push(ToolCall {
                id: format!("call_{index}"),
                kind: "function".to_string(),
                function: FunctionCallBody {
                    name,
                    arguments: args.to_string(),
                },
            });
        }
    }
    (text, tool_calls)
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" => "content_filter".to_string(),
        other => other.to_lowercase(),
    }
}

/// Translates one upstream Gemini `Part` fragment into zero or more
/// streaming OpenAI chunks.
pub fn part_to_chunk(response_id: &str, model: &str, part: &Part, role_prelude: &mut bool, tool_index: &mut u32) -> Option<ChatCompletionChunk> {
    let mut delta = ChatDelta::default();
    if !*role_prelude {
        delta.role = Some("assistant".to_string());
        *role_prelude = true;
    }

    if let Some(text) = &part.text {
        if part.thought == Some(true) {
            delta.reasoning = Some(text.clone());
        } else {
            delta.content = Some(text.clone());
        }
    } else if let Some(call) = &part.function_call {
        let name = call.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
        let args = call.get("args").cloned().unwrap_or(Value::Null);
        let index = *tool_index;
        *tool_index += 1;
        delta.tool_calls = Some(vec![ToolCallDelta {
            index,
            id: Some(format!("call_{index}")),
            kind: Some("function".to_string()),
            function: Some(FunctionCallDeltaBody {
                name: Some(name),
                arguments: Some(args.to_string()),
            }),
        }]);
    } else {
        return None;
    }

    Some(ChatCompletionChunk {
        id: response_id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 0,
        model: model.to_string(),
        choices: vec![ChatChunkChoice {
            index: 0,
            delta,
            finish_reason: None,
        }],
    })
}

/// Builds the terminal chunk closing out a stream, carrying the mapped
/// finish reason.
pub fn terminal_chunk(response_id: &str, model: &str, finish_reason: Option<&str>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: response_id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created: 0,
        model: model.to_string(),
        choices: vec![ChatChunkChoice {
            index: 0,
            delta: ChatDelta::default(),
            finish_reason: finish_reason.map(map_finish_reason).or(Some("stop".to_string())),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(messages_json: Value) -> ChatCompletionRequest {
        let mut obj = json!({
            "model": "gemini-2.5-pro",
            "messages": messages_json,
        });
        obj.as_object_mut().unwrap().insert("stream".to_string(), json!(false));
        serde_json::from_value(obj).unwrap()
    }

    #[test]
    fn system_message_becomes_leading_marker_turn() {
        let request = req(json!([
            {"role": "system", "content": "be terse"},
            {"role": "user", "content": "hi"}
        ]));
        let canonical = to_canonical(&request).unwrap();
        assert!(canonical.system_instruction.is_none());
        assert_eq!(canonical.contents.len(), 2);
        assert_eq!(canonical.contents[0].role.as_deref(), Some("user"));
        assert_eq!(canonical.contents[0].parts[0].text.as_deref(), Some("System: be terse"));
        assert_eq!(canonical.contents[1].role.as_deref(), Some("user"));
    }

    #[test]
    fn assistant_tool_call_becomes_function_call_part() {
        let request = req(json!([
            {"role": "user", "content": "weather?"},
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"city\":\"nyc\"}"}}
            ]}
        ]));
        let canonical = to_canonical(&request).unwrap();
        let model_turn = &canonical.contents[1];
        assert_eq!(model_turn.role.as_deref(), Some("model"));
        assert!(model_turn.parts[0].function_call.is_some());
    }

    #[test]
    fn data_url_image_becomes_inline_data() {
        let request = req(json!([
            {"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,abcd"}}
            ]}
        ]));
        let canonical = to_canonical(&request).unwrap();
        let parts = &canonical.contents[0].parts;
        assert_eq!(parts.len(), 2);
        assert!(parts[1].inline_data.is_some());
    }

    #[test]
    fn finish_reason_maps_safety_to_content_filter() {
        assert_eq!(map_finish_reason("SAFETY"), "content_filter");
        assert_eq!(map_finish_reason("STOP"), "stop");
        assert_eq!(map_finish_reason("MAX_TOKENS"), "length");
    }
}
