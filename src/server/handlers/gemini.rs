use axum::Json;
use axum::extract::{Path, State};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use futures::StreamExt;
use relaykit_schema::gemini::GeminiGenerateContentRequest;

use crate::credential::CredentialRecord;
use crate::dialect::gemini as translate;
use crate::error::{Dialect, ProxyError};
use crate::pool::DispatchOutcome;
use crate::relay;
use crate::server::auth::{LoopbackOnly, RequireApiKey};
use crate::server::state::AppState;
use crate::upstream::UpstreamClient;

pub async fn generate_content(
    _auth: RequireApiKey,
    Path(model): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<GeminiGenerateContentRequest>,
) -> Response {
    match handle(state, model, request, false).await {
        Ok(response) => response,
        Err(err) => err.into_response(Dialect::Gemini),
    }
}

pub async fn stream_generate_content(
    _auth: RequireApiKey,
    Path(model): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<GeminiGenerateContentRequest>,
) -> Response {
    match handle(state, model, request, true).await {
        Ok(response) => response,
        Err(err) => err.into_response(Dialect::Gemini),
    }
}

async fn handle(state: AppState, model: String, request: GeminiGenerateContentRequest, streaming: bool) -> Result<Response, ProxyError> {
    let canonical = translate::to_canonical(request)?;
    let outcome = state.pool.dispatch(&model, &canonical, streaming).await?;

    match outcome {
        DispatchOutcome::Response(body) => Ok(Json(body).into_response()),
        DispatchOutcome::Stream(upstream, _identity, _effective_model) => {
            let stream = relay::relay_gemini_stream(upstream).map(|fragment| {
                let event = match fragment {
                    Ok(body) => Event::default().data(serde_json::to_string(&body).unwrap_or_default()),
                    Err(err) => Event::default().data(relay::terminal_error_frame(Dialect::Gemini, &err)),
                };
                Ok::<_, std::convert::Infallible>(event)
            });
            Ok(Sse::new(stream).into_response())
        }
    }
}

/// Code-Assist-native onboarding passthrough, reachable from localhost
/// only — the reference CLI calls these without an API key, using
/// whichever account is first in the credential snapshot.
pub async fn load_code_assist(_loopback: LoopbackOnly, State(state): State<AppState>) -> Response {
    match first_oauth_client(&state).await {
        Ok((http, record)) => {
            let client = UpstreamClient::new(&http, &record);
            match client.load_code_assist().await {
                Ok(body) => Json(body).into_response(),
                Err(err) => err.into_response(Dialect::Gemini),
            }
        }
        Err(err) => err.into_response(Dialect::Gemini),
    }
}

pub async fn count_tokens(_loopback: LoopbackOnly, State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    match first_oauth_client(&state).await {
        Ok((http, record)) => {
            let client = UpstreamClient::new(&http, &record);
            match client.count_tokens(body).await {
                Ok(body) => Json(body).into_response(),
                Err(err) => err.into_response(Dialect::Gemini),
            }
        }
        Err(err) => err.into_response(Dialect::Gemini),
    }
}

pub async fn onboard_user(_loopback: LoopbackOnly, State(state): State<AppState>) -> Response {
    match first_oauth_client(&state).await {
        Ok((http, record)) => {
            let client = UpstreamClient::new(&http, &record);
            match client.setup_user().await {
                Ok(project) => Json(serde_json::json!({"done": true, "response": {"cloudaicompanionProject": {"id": project}}})).into_response(),
                Err(err) => err.into_response(Dialect::Gemini),
            }
        }
        Err(err) => err.into_response(Dialect::Gemini),
    }
}

async fn first_oauth_client(state: &AppState) -> Result<(reqwest::Client, CredentialRecord), ProxyError> {
    let snapshot = state.store.snapshot();
    let record = snapshot
        .iter()
        .find(|r| matches!(r.provider, crate::credential::Provider::GeminiOauth))
        .cloned()
        .ok_or_else(|| ProxyError::Auth("no gemini-oauth credential available".to_string()))?;
    Ok((reqwest::Client::new(), record))
}

