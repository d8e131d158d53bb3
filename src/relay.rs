//! Streaming relay: re-emits upstream Gemini SSE fragments as whichever
//! client dialect the inbound request used.

use eventsource_stream::Eventsource;
use futures::Stream;
use futures::stream::StreamExt;
use relaykit_schema::gemini::GeminiResponseBody;
use serde_json::Value;

use crate::error::ProxyError;

/// Parses one upstream SSE line into a `GeminiResponseBody` fragment,
/// dropping (not terminating the stream on) lines that don't parse —
/// upstream occasionally emits keep-alive comments.
pub fn relay_gemini_stream(upstream: reqwest::Response) -> impl Stream<Item = Result<GeminiResponseBody, ProxyError>> {
    upstream
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move {
            let event = match event {
                Ok(event) => event,
                Err(err) => return Some(Err(ProxyError::Translate(format!("SSE decode error: {err}")))),
            };
            if event.data.trim().is_empty() || event.data.trim() == "[DONE]" {
                return None;
            }
            match serde_json::from_str::<GeminiResponseBody>(&event.data) {
                Ok(body) => Some(Ok(body)),
                Err(err) => {
                    tracing::debug!(error = %err, line = %event.data, "dropping unparseable SSE line");
                    None
                }
            }
        })
}

/// Renders one SSE frame for a JSON-encodable chunk value, in the
/// `data: <json>\n\n` shape both OpenAI and Anthropic streaming dialects use.
pub fn encode_sse_chunk(value: &impl serde::Serialize) -> Result<String, ProxyError> {
    let json = serde_json::to_string(value).map_err(ProxyError::Json)?;
    Ok(format!("data: {json}\n\n"))
}

pub const OPENAI_DONE_FRAME: &str = "data: [DONE]\n\n";

/// Anthropic's streaming dialect uses named SSE events rather than a bare
/// `data:` frame.
pub fn encode_anthropic_event(event_name: &str, value: &impl serde::Serialize) -> Result<String, ProxyError> {
    let json = serde_json::to_string(value).map_err(ProxyError::Json)?;
    Ok(format!("event: {event_name}\ndata: {json}\n\n"))
}

/// A terminal error frame shaped for the given dialect, used when the
/// upstream stream fails mid-flight after a prelude has already been sent
/// to the client (so a normal HTTP error response is no longer possible).
pub fn terminal_error_frame(dialect: crate::error::Dialect, err: &ProxyError) -> String {
    let body: Value = err.to_dialect_body(dialect);
    match dialect {
        crate::error::Dialect::Anthropic => {
            format!("event: error\ndata: {}\n\n", body)
        }
        _ => format!("data: {body}\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_sse_chunk_wraps_json_in_data_frame() {
        let frame = encode_sse_chunk(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(frame, "data: {\"a\":1}\n\n");
    }

    #[test]
    fn encode_anthropic_event_includes_event_name() {
        let frame = encode_anthropic_event("message_start", &serde_json::json!({"type": "message_start"})).unwrap();
        assert!(frame.starts_with("event: message_start\n"));
        assert!(frame.contains("data: "));
    }
}
