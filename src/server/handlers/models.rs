use axum::Json;
use axum::extract::State;

use crate::model_catalog;
use crate::server::auth::RequireApiKey;
use crate::server::state::AppState;

pub async fn list_openai_models(_auth: RequireApiKey, State(_state): State<AppState>) -> Json<relaykit_schema::openai::OpenaiModelList> {
    Json(model_catalog::openai_catalog())
}

pub async fn list_gemini_models(_auth: RequireApiKey, State(_state): State<AppState>) -> Json<relaykit_schema::gemini::GeminiModelList> {
    Json(model_catalog::gemini_catalog())
}
