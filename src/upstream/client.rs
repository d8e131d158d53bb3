//! HTTP client bound to a single upstream account credential.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use relaykit_schema::gemini::{GeminiGenerateContentRequest, GeminiResponseBody};
use serde_json::{Value, json};
use tracing::warn;

use crate::credential::{CredentialRecord, Provider};
use crate::error::{IsRetryable, ProxyError};

const CODE_ASSIST_BASE: &str = "https://cloudcode-pa.googleapis.com/v1internal";
const GENERATIVE_LANGUAGE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const CODEX_BASE: &str = "https://chatgpt.com/backend-api/codex";

/// A thin wrapper pairing one reqwest client with one credential, so the
/// account pool can dispatch to an arbitrary client without needing to
/// know which provider it belongs to.
pub struct UpstreamClient<'a> {
    http: &'a reqwest::Client,
    record: &'a CredentialRecord,
}

impl<'a> UpstreamClient<'a> {
    pub fn new(http: &'a reqwest::Client, record: &'a CredentialRecord) -> Self {
        UpstreamClient { http, record }
    }

    fn bearer(&self) -> Result<&str, ProxyError> {
        self.record
            .access_token
            .as_deref()
            .ok_or_else(|| ProxyError::Auth("credential has no access token".to_string()))
    }

    /// Non-streaming generateContent call, retried against transient
    /// transport failures only — a non-2xx status is returned as
    /// `ErrUpstreamStatus` for the pool to classify, not retried here.
    pub async fn generate(&self, model: &str, request: &GeminiGenerateContentRequest) -> Result<GeminiResponseBody, ProxyError> {
        let response = self.dispatch(model, request, false).await?;
        let body: GeminiResponseBody = response.json().await.map_err(ProxyError::UpstreamTransport)?;
        Ok(body)
    }

    /// Streaming variant; caller consumes `response.bytes_stream()`.
    pub async fn stream_generate(&self, model: &str, request: &GeminiGenerateContentRequest) -> Result<reqwest::Response, ProxyError> {
        self.dispatch(model, request, true).await
    }

    async fn dispatch(&self, model: &str, request: &GeminiGenerateContentRequest, stream: bool) -> Result<reqwest::Response, ProxyError> {
        let url = self.endpoint_for(model, stream);
        let body = self.wrap_request(model, request)?;

        let attempt = || async {
            let mut req = self.http.post(&url).json(&body);
            req = self.authorize(req)?;
            req.send().await.map_err(ProxyError::UpstreamTransport)
        };

        let response = attempt
            .retry(ExponentialBuilder::default().with_max_times(3).with_min_delay(Duration::from_millis(200)))
            .when(|err: &ProxyError| err.is_retryable())
            .notify(|err, dur| warn!(error = %err, delay = ?dur, "retrying upstream request"))
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProxyError::UpstreamStatus { status, body: text });
        }

        Ok(response)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ProxyError> {
        match self.record.provider {
            Provider::GeminiOauth | Provider::CodexOauth => Ok(req.bearer_auth(self.bearer()?)),
            Provider::GlApikey => {
                let key = self.record.api_key.as_deref().ok_or_else(|| ProxyError::Auth("credential has no api key".to_string()))?;
                Ok(req.header("x-goog-api-key", key))
            }
        }
    }

    fn endpoint_for(&self, model: &str, stream: bool) -> String {
        match self.record.provider {
            Provider::GeminiOauth => {
                let method = if stream { "streamGenerateContent" } else { "generateContent" };
                format!("{CODE_ASSIST_BASE}:{method}")
            }
            Provider::GlApikey => {
                let method = if stream { "streamGenerateContent" } else { "generateContent" };
                format!("{GENERATIVE_LANGUAGE_BASE}/models/{model}:{method}")
            }
            Provider::CodexOauth => format!("{CODEX_BASE}/responses"),
        }
    }

    fn wrap_request(&self, model: &str, request: &GeminiGenerateContentRequest) -> Result<Value, ProxyError> {
        match self.record.provider {
            Provider::GeminiOauth => Ok(json!({
                "model": model,
                "project": self.record.project,
                "request": request,
            })),
            Provider::GlApikey | Provider::CodexOauth => {
                serde_json::to_value(request).map_err(ProxyError::Json)
            }
        }
    }

    /// Raw `loadCodeAssist` call, as the Code-Assist passthrough route and
    /// `setup_user`'s onboarding flow both need it.
    pub async fn load_code_assist(&self) -> Result<Value, ProxyError> {
        self.http
            .post(format!("{CODE_ASSIST_BASE}:loadCodeAssist"))
            .bearer_auth(self.bearer()?)
            .json(&json!({"metadata": {"pluginType": "GEMINI"}}))
            .send()
            .await
            .map_err(ProxyError::UpstreamTransport)?
            .json()
            .await
            .map_err(ProxyError::UpstreamTransport)
    }

    /// Raw `countTokens` passthrough: forwards the client's body verbatim
    /// and returns the upstream's JSON response verbatim.
    pub async fn count_tokens(&self, body: Value) -> Result<Value, ProxyError> {
        self.http
            .post(format!("{CODE_ASSIST_BASE}:countTokens"))
            .bearer_auth(self.bearer()?)
            .json(&body)
            .send()
            .await
            .map_err(ProxyError::UpstreamTransport)?
            .json()
            .await
            .map_err(ProxyError::UpstreamTransport)
    }

    /// Google Code-Assist onboarding: discovers the project tier, onboards
    /// the user if needed, polling every 5 seconds up to a 5-minute bound.
    pub async fn setup_user(&self) -> Result<String, ProxyError> {
        let load_resp = self.load_code_assist().await?;

        if let Some(project) = load_resp.get("cloudaicompanionProject").and_then(Value::as_str) {
            return Ok(project.to_string());
        }

        let tier = load_resp
            .get("allowedTiers")
            .and_then(Value::as_array)
            .and_then(|tiers| tiers.iter().find(|t| t.get("isDefault") == Some(&Value::Bool(true))))
            .or_else(|| load_resp.get("allowedTiers").and_then(Value::as_array).and_then(|t| t.last()))
            .and_then(|t| t.get("id").and_then(Value::as_str))
            .unwrap_or("legacy-tier")
            .to_string();

        let onboard_started = tokio::time::Instant::now();
        loop {
            let onboard_resp: Value = self
                .http
                .post(format!("{CODE_ASSIST_BASE}:onboardUser"))
                .bearer_auth(self.bearer()?)
                .json(&json!({"tierId": tier, "metadata": {"pluginType": "GEMINI"}}))
                .send()
                .await
                .map_err(ProxyError::UpstreamTransport)?
                .json()
                .await
                .map_err(ProxyError::UpstreamTransport)?;

            if onboard_resp.get("done") == Some(&Value::Bool(true)) {
                let project = onboard_resp
                    .pointer("/response/cloudaicompanionProject/id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProxyError::Auth("onboarding completed without a project id".to_string()))?;
                return Ok(project.to_string());
            }

            if onboard_started.elapsed() > Duration::from_secs(300) {
                return Err(ProxyError::Auth("onboarding timed out after 5 minutes".to_string()));
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    pub async fn list_projects(&self) -> Result<Vec<String>, ProxyError> {
        let resp: Value = self
            .http
            .get("https://cloudresourcemanager.googleapis.com/v1/projects")
            .bearer_auth(self.bearer()?)
            .send()
            .await
            .map_err(ProxyError::UpstreamTransport)?
            .json()
            .await
            .map_err(ProxyError::UpstreamTransport)?;

        Ok(resp
            .get("projects")
            .and_then(Value::as_array)
            .map(|projects| {
                projects
                    .iter()
                    .filter_map(|p| p.get("projectId").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Sends a minimal streaming request to check whether the upstream API
    /// is enabled for this account's project. Returns the activation URL
    /// extracted from a 403 response when it isn't.
    pub async fn probe_api_enabled(&self) -> Result<(bool, Option<String>), ProxyError> {
        let probe_request: GeminiGenerateContentRequest = serde_json::from_value(json!({
            "contents": [{"role": "user", "parts": [{"text": "What is the capital of France?"}]}],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 0, "includeThoughts": false}},
        }))
        .map_err(ProxyError::Json)?;

        match self.dispatch("gemini-2.5-flash", &probe_request, true).await {
            Ok(_) => Ok((true, None)),
            Err(ProxyError::UpstreamStatus { status, body }) if status == reqwest::StatusCode::FORBIDDEN => {
                let activation_url = serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v.pointer("/error/details").and_then(Value::as_array).cloned())
                    .and_then(|details| {
                        details.iter().find_map(|d| d.get("metadata").and_then(|m| m.get("activationUrl")).and_then(Value::as_str).map(str::to_string))
                    });
                Ok((false, activation_url))
            }
            Err(err) => Err(err),
        }
    }
}
