//! Axum router assembly and access-log middleware.

use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::info;

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/models", get(handlers::models::list_openai_models))
        .route("/v1/chat/completions", post(handlers::openai::chat_completions))
        .route("/v1/messages", post(handlers::anthropic::messages))
        .route("/v1beta/models", get(handlers::models::list_gemini_models))
        .route("/v1beta/models/{model}:generateContent", post(handlers::gemini::generate_content))
        .route("/v1beta/models/{model}:streamGenerateContent", post(handlers::gemini::stream_generate_content))
        .route("/v1internal:loadCodeAssist", post(handlers::gemini::load_code_assist))
        .route("/v1internal:onboardUser", post(handlers::gemini::onboard_user))
        .route("/v1internal:countTokens", post(handlers::gemini::count_tokens))
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

async fn access_log(request: Request, next: Next) -> Response {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis(),
        "handled request"
    );

    response
}

fn generate_request_id() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
