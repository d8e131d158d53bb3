use axum::Json;
use axum::extract::State;
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures::StreamExt;
use relaykit_schema::anthropic::AnthropicMessagesRequest;

use crate::dialect::anthropic as translate;
use crate::error::{Dialect, ProxyError};
use crate::pool::DispatchOutcome;
use crate::relay;
use crate::server::auth::RequireApiKey;
use crate::server::state::AppState;

pub async fn messages(_auth: RequireApiKey, State(state): State<AppState>, Json(request): Json<AnthropicMessagesRequest>) -> Response {
    match handle(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(Dialect::Anthropic),
    }
}

async fn handle(state: AppState, request: AnthropicMessagesRequest) -> Result<Response, ProxyError> {
    let model = request.model.clone();
    let streaming = request.stream.unwrap_or(false);
    let canonical = translate::to_canonical(&request)?;

    let outcome = state.pool.dispatch(&model, &canonical, streaming).await?;

    match outcome {
        DispatchOutcome::Response(body) => {
            let candidate = body.candidates.into_iter().next();
            let (finish_reason, parts) = match candidate {
                Some(c) => (c.finish_reason, c.content.map(|c| c.parts).unwrap_or_default()),
                None => (None, Vec::new()),
            };
            let response = translate::from_canonical_response(generate_message_id(), &model, finish_reason.as_deref(), &parts);
            Ok(Json(response).into_response())
        }
        DispatchOutcome::Stream(upstream, _identity, _effective_model) => {
            let message_id = generate_message_id();
            let stream = relay::relay_gemini_stream(upstream)
                .scan(-1i64, move |block_index, fragment| {
                    let events = fragment_to_events(fragment, message_id.clone(), block_index);
                    futures::future::ready(Some(events))
                })
                .flat_map(futures::stream::iter);
            Ok(Sse::new(stream).into_response())
        }
    }
}

fn fragment_to_events(
    fragment: Result<relaykit_schema::gemini::GeminiResponseBody, ProxyError>,
    message_id: String,
    block_index: &mut i64,
) -> Vec<Result<Event, std::convert::Infallible>> {
    let body = match fragment {
        Ok(body) => body,
        Err(err) => {
            let frame = relay::terminal_error_frame(Dialect::Anthropic, &err);
            return vec![Ok(Event::default().event("error").data(frame))];
        }
    };

    let mut events = Vec::new();
    let mut finish_reason = None;

    for candidate in body.candidates {
        finish_reason = candidate.finish_reason.clone();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            *block_index += 1;
            if let Some(text) = &part.text {
                let block_type = if part.thought == Some(true) { "thinking_delta" } else { "text_delta" };
                let key = if part.thought == Some(true) { "thinking" } else { "text" };
                let payload = serde_json::json!({
                    "type": "content_block_delta",
                    "index": *block_index,
                    "delta": {"type": block_type, key: text},
                });
                events.push(Ok(Event::default().event("content_block_delta").data(payload.to_string())));
            } else if let Some(call) = &part.function_call {
                let name = call.get("name").and_then(serde_json::Value::as_str).unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or(serde_json::Value::Null);
                let start = serde_json::json!({
                    "type": "content_block_start",
                    "index": *block_index,
                    "content_block": {"type": "tool_use", "id": format!("toolu_{block_index}"), "name": name, "input": {}},
                });
                events.push(Ok(Event::default().event("content_block_start").data(start.to_string())));
                let delta = serde_json::json!({
                    "type": "content_block_delta",
                    "index": *block_index,
                    "delta": {"type": "input_json_delta", "partial_json": args.to_string()},
                });
                events.push(Ok(Event::default().event("content_block_delta").data(delta.to_string())));
            }
        }
    }

    if let Some(reason) = finish_reason {
        let stop_reason = translate::map_stop_reason(&reason);
        let payload = serde_json::json!({
            "type": "message_delta",
            "delta": {"stop_reason": stop_reason},
        });
        events.push(Ok(Event::default().event("message_delta").data(payload.to_string())));
        events.push(Ok(Event::default().event("message_stop").data(serde_json::json!({"type": "message_stop"}).to_string())));
    }

    events
}

fn generate_message_id() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("msg_{}", URL_SAFE_NO_PAD.encode(bytes))
}

