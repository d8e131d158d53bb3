//! Unified error type for every subsystem, with per-client-dialect rendering.
//!
//! The teacher keeps one error enum per route family because each family
//! only ever talks one wire dialect. This proxy terminates three different
//! client dialects behind the same pipeline, so a single `ProxyError` is
//! rendered differently depending on which dialect the inbound request used.

use axum::http::StatusCode;
use relaykit_schema::anthropic::AnthropicErrorBody;
use relaykit_schema::openai::{OpenaiChatErrorBody, OpenaiChatErrorObject};
use serde_json::{Value, json};
use thiserror::Error as ThisError;

/// Which client-facing wire format an error response must be shaped as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
}

#[derive(Debug, ThisError)]
pub enum ProxyError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential I/O error: {0}")]
    CredentialIo(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("upstream transport error: {0}")]
    UpstreamTransport(#[from] reqwest::Error),

    /// Upstream replied with a non-2xx status; body is forwarded verbatim.
    #[error("upstream returned {status}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("all accounts exhausted for model '{0}'")]
    Quota(String),

    #[error("upstream API is not enabled for this project")]
    ApiDisabled { activation_url: Option<String> },

    #[error("failed to translate request/response: {0}")]
    Translate(String),

    #[error("client authentication failed")]
    ClientAuth,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProxyError {
    /// HTTP status this error maps to, independent of rendering dialect.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Config(_) | ProxyError::CredentialIo(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::Auth(_) => StatusCode::UNAUTHORIZED,
            ProxyError::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamStatus { status, .. } => *status,
            ProxyError::Quota(_) => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::ApiDisabled { .. } => StatusCode::FORBIDDEN,
            ProxyError::Translate(_) => StatusCode::BAD_REQUEST,
            ProxyError::ClientAuth => StatusCode::UNAUTHORIZED,
            ProxyError::Json(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// The body this error renders to, shaped for the dialect the inbound
    /// request used. `ErrUpstreamStatus` is forwarded verbatim regardless of
    /// dialect, per spec.
    pub fn to_dialect_body(&self, dialect: Dialect) -> Value {
        if let ProxyError::UpstreamStatus { body, .. } = self {
            if let Ok(parsed) = serde_json::from_str::<Value>(body) {
                return parsed;
            }
        }

        if let ProxyError::Quota(model) = self {
            return json!({
                "error": {
                    "code": 429,
                    "message": format!("All the models of '{model}' are quota exhausted"),
                    "status": "RESOURCE_EXHAUSTED",
                }
            });
        }

        let message = self.to_string();
        match dialect {
            Dialect::OpenAi => serde_json::to_value(OpenaiChatErrorBody {
                error: OpenaiChatErrorObject {
                    message,
                    kind: "invalid_request_error".to_string(),
                    param: None,
                    code: None,
                },
            })
            .unwrap_or(Value::Null),
            Dialect::Anthropic => {
                serde_json::to_value(AnthropicErrorBody::new("invalid_request_error", message))
                    .unwrap_or(Value::Null)
            }
            Dialect::Gemini => json!({
                "error": {
                    "code": self.status().as_u16(),
                    "message": message,
                    "status": gemini_status_name(self.status()),
                }
            }),
        }
    }

    pub fn into_response(self, dialect: Dialect) -> axum::response::Response {
        use axum::Json;
        use axum::response::IntoResponse;
        let status = self.status();
        let body = self.to_dialect_body(dialect);
        (status, Json(body)).into_response()
    }
}

fn gemini_status_name(status: StatusCode) -> &'static str {
    match status {
        StatusCode::TOO_MANY_REQUESTS => "RESOURCE_EXHAUSTED",
        StatusCode::UNAUTHORIZED => "UNAUTHENTICATED",
        StatusCode::FORBIDDEN => "PERMISSION_DENIED",
        StatusCode::NOT_FOUND => "NOT_FOUND",
        StatusCode::BAD_REQUEST => "INVALID_ARGUMENT",
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => "UNAVAILABLE",
        _ => "UNKNOWN",
    }
}

/// Errors this proxy will retry against the *same* credential (transport
/// hiccups), as opposed to errors that should advance the pool cursor.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for ProxyError {
    fn is_retryable(&self) -> bool {
        matches!(self, ProxyError::UpstreamTransport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_error_renders_exact_envelope() {
        let err = ProxyError::Quota("gemini-2.5-pro".to_string());
        let body = err.to_dialect_body(Dialect::OpenAi);
        assert_eq!(
            body,
            json!({
                "error": {
                    "code": 429,
                    "message": "All the models of 'gemini-2.5-pro' are quota exhausted",
                    "status": "RESOURCE_EXHAUSTED",
                }
            })
        );
    }

    #[test]
    fn upstream_status_forwarded_verbatim_regardless_of_dialect() {
        let err = ProxyError::UpstreamStatus {
            status: StatusCode::FORBIDDEN,
            body: r#"{"error":{"code":403,"message":"nope"}}"#.to_string(),
        };
        let openai = err.to_dialect_body(Dialect::OpenAi);
        let anthropic = err.to_dialect_body(Dialect::Anthropic);
        assert_eq!(openai, anthropic);
        assert_eq!(openai["error"]["code"], 403);
    }

    #[test]
    fn translate_error_renders_dialect_appropriate_shape() {
        let err = ProxyError::Translate("missing contents".to_string());
        let openai = err.to_dialect_body(Dialect::OpenAi);
        assert!(openai.get("error").unwrap().get("type").is_some());
        let anthropic = err.to_dialect_body(Dialect::Anthropic);
        assert_eq!(anthropic["type"], "error");
    }
}
