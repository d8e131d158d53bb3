use axum::Json;
use axum::extract::State;
use axum::response::{IntoResponse, Response, Sse};
use axum::response::sse::Event;
use futures::StreamExt;
use relaykit_schema::openai::ChatCompletionRequest;

use crate::dialect::openai as translate;
use crate::error::{Dialect, ProxyError};
use crate::pool::DispatchOutcome;
use crate::relay;
use crate::server::auth::RequireApiKey;
use crate::server::state::AppState;

pub async fn chat_completions(_auth: RequireApiKey, State(state): State<AppState>, Json(request): Json<ChatCompletionRequest>) -> Response {
    match handle(state, request).await {
        Ok(response) => response,
        Err(err) => err.into_response(Dialect::OpenAi),
    }
}

async fn handle(state: AppState, request: ChatCompletionRequest) -> Result<Response, ProxyError> {
    let model = request.model.clone();
    let streaming = request.stream.unwrap_or(false);
    let canonical = translate::to_canonical(&request)?;

    let outcome = state.pool.dispatch(&model, &canonical, streaming).await?;

    match outcome {
        DispatchOutcome::Response(body) => {
            let candidates: Vec<(Option<String>, Vec<relaykit_schema::gemini::Part>)> = body
                .candidates
                .into_iter()
                .map(|c| (c.finish_reason, c.content.map(|content| content.parts).unwrap_or_default()))
                .collect();
            let response = translate::from_canonical_response(generate_response_id(), &model, &candidates);
            Ok(Json(response).into_response())
        }
        DispatchOutcome::Stream(upstream, _identity, effective_model) => {
            let response_id = generate_response_id();
            let stream = relay::relay_gemini_stream(upstream)
                .scan((false, 0u32), move |(role_prelude, tool_index), fragment| {
                    let events = fragment_to_events(fragment, response_id.clone(), effective_model.clone(), role_prelude, tool_index);
                    futures::future::ready(Some(events))
                })
                .flat_map(futures::stream::iter);
            Ok(Sse::new(stream).into_response())
        }
    }
}

fn fragment_to_events(
    fragment: Result<relaykit_schema::gemini::GeminiResponseBody, ProxyError>,
    response_id: String,
    model: String,
    role_prelude: &mut bool,
    tool_index: &mut u32,
) -> Vec<Result<Event, std::convert::Infallible>> {
    let body = match fragment {
        Ok(body) => body,
        Err(err) => {
            let frame = relay::terminal_error_frame(Dialect::OpenAi, &err);
            return vec![Ok(Event::default().data(frame))];
        }
    };

    let mut events = Vec::new();
    let mut finish_reason = None;

    for candidate in body.candidates {
        finish_reason = candidate.finish_reason.clone();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(chunk) = translate::part_to_chunk(&response_id, &model, &part, role_prelude, tool_index) {
                if let Ok(json) = serde_json::to_string(&chunk) {
                    events.push(Ok(Event::default().data(json)));
                }
            }
        }
    }

    if let Some(reason) = finish_reason {
        let terminal = translate::terminal_chunk(&response_id, &model, Some(&reason));
        if let Ok(json) = serde_json::to_string(&terminal) {
            events.push(Ok(Event::default().data(json)));
        }
        events.push(Ok(Event::default().data("[DONE]")));
    }

    events
}

fn generate_response_id() -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("chatcmpl-{}", URL_SAFE_NO_PAD.encode(bytes))
}
