//! API-key authentication extractor.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use subtle::ConstantTimeEq;

use super::state::AppState;

/// Extracts and validates a client API key from either the `Authorization:
/// Bearer` header or a `?key=` query parameter, comparing against the
/// configured key list in constant time.
pub struct RequireApiKey;

impl FromRequestParts<AppState> for RequireApiKey {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if state.config.api_keys.is_empty() {
            return Ok(RequireApiKey);
        }

        let presented = extract_header_token(parts).or_else(|| extract_query_token(parts));
        let Some(presented) = presented else {
            return Err((StatusCode::UNAUTHORIZED, "missing API key"));
        };

        let matches = state
            .config
            .api_keys
            .iter()
            .any(|configured| configured.as_bytes().ct_eq(presented.as_bytes()).into());

        if matches {
            Ok(RequireApiKey)
        } else {
            Err((StatusCode::UNAUTHORIZED, "invalid API key"))
        }
    }
}

fn extract_header_token(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    header.strip_prefix("Bearer ").map(str::to_string)
        .or_else(|| parts.headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()).map(str::to_string))
}

fn extract_query_token(parts: &Parts) -> Option<String> {
    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "key")
        .map(|(_, value)| value.into_owned())
}

/// Loopback-only bypass for Code-Assist-native onboarding operations,
/// which the reference client calls without an API key.
pub struct LoopbackOnly;

impl FromRequestParts<AppState> for LoopbackOnly {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &AppState) -> Result<Self, Self::Rejection> {
        let is_loopback = parts
            .extensions
            .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
            .map(|info| info.0.ip().is_loopback())
            .unwrap_or(false);

        if is_loopback {
            Ok(LoopbackOnly)
        } else {
            Err((StatusCode::FORBIDDEN, "this endpoint is only reachable from localhost"))
        }
    }
}
