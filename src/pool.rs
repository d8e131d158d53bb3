//! Round-robin account pool with quota-aware fallback across accounts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use relaykit_schema::gemini::{GeminiGenerateContentRequest, GeminiResponseBody};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::credential::{CredentialRecord, CredentialStore, Identity};
use crate::error::ProxyError;
use crate::quota::QuotaLedger;
use crate::upstream::{UpstreamClient, oauth};

/// Single unified pool across every provider, keyed by model-family prefix
/// rather than a per-provider sub-pool.
pub struct AccountPool {
    store: Arc<CredentialStore>,
    ledger: Arc<QuotaLedger>,
    http: reqwest::Client,
    cursor: Mutex<usize>,
    switch_preview_model: bool,
    switch_project: bool,
    /// One lock per credential identity, so concurrent requests against the
    /// same expired account collapse into a single in-flight refresh.
    refresh_locks: Mutex<HashMap<Identity, Arc<AsyncMutex<()>>>>,
}

/// Outcome of one dispatch attempt, used by the router to decide what to
/// hand back to the client.
pub enum DispatchOutcome {
    Response(GeminiResponseBody),
    Stream(reqwest::Response, Identity, String),
}

impl AccountPool {
    pub fn new(store: Arc<CredentialStore>, ledger: Arc<QuotaLedger>, http: reqwest::Client, switch_preview_model: bool, switch_project: bool) -> Self {
        AccountPool {
            store,
            ledger,
            http,
            cursor: Mutex::new(0),
            switch_preview_model,
            switch_project,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The per-identity lock guarding refresh, created on first use.
    fn refresh_lock(&self, identity: &Identity) -> Arc<AsyncMutex<()>> {
        let mut locks = self.refresh_locks.lock().expect("refresh lock map poisoned");
        Arc::clone(locks.entry(identity.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
    }

    /// Refreshes `record` if its access token is expired, persisting the
    /// result through the credential store either way: a successful refresh
    /// is written back so other requests see the new token immediately, and
    /// a failed refresh flips `auto = false` so the account drops out of
    /// rotation until an operator intervenes. Concurrent callers for the
    /// same identity collapse onto a single in-flight refresh.
    async fn ensure_fresh(&self, record: &mut CredentialRecord) -> Result<(), ProxyError> {
        if !record.is_expired() {
            return Ok(());
        }

        let identity = record.identity();
        let lock = self.refresh_lock(&identity);
        let _guard = lock.lock().await;

        if let Some(current) = self.store.snapshot().iter().find(|r| r.identity() == identity) {
            *record = current.clone();
        }
        if !record.is_expired() {
            return Ok(());
        }

        match oauth::refresh(record).await {
            Ok(()) => {
                if let Err(err) = self.store.persist(record.clone()) {
                    warn!(email = %record.email, error = %err, "failed to persist refreshed credential");
                }
                Ok(())
            }
            Err(err) => {
                warn!(email = %record.email, error = %err, "token refresh failed, disabling account");
                record.auto = false;
                let _ = self.store.persist(record.clone());
                Err(ProxyError::Auth(format!("token refresh failed for {}: {err}", record.email)))
            }
        }
    }

    /// The candidate set for `model`. An email bound to multiple projects
    /// yields one independent candidate per project; when `switch_project`
    /// is disabled, only the first project seen for a given email is kept,
    /// so a quota-exhausted project never falls through to a sibling
    /// project under the same account.
    fn candidates(&self, model: &str) -> Vec<CredentialRecord> {
        let mut seen_emails = std::collections::HashSet::new();
        self.store
            .snapshot()
            .iter()
            .filter(|r| r.auto && r.provider.handles_model(model))
            .filter(|r| self.switch_project || seen_emails.insert(r.email.clone()))
            .cloned()
            .collect()
    }

    fn next_start_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let mut cursor = self.cursor.lock().expect("pool cursor lock poisoned");
        let start = *cursor % len;
        *cursor = (*cursor + 1) % len;
        start
    }

    /// Dispatches one request across the candidate set for `model`,
    /// advancing the round-robin cursor once per call (not once per
    /// preview-substitution attempt), per spec.
    pub async fn dispatch(&self, model: &str, request: &GeminiGenerateContentRequest, stream: bool) -> Result<DispatchOutcome, ProxyError> {
        let candidates = self.candidates(model);
        if candidates.is_empty() {
            return Err(ProxyError::Quota(model.to_string()));
        }

        let start = self.next_start_index(candidates.len());
        let mut last_err: Option<ProxyError> = None;

        for offset in 0..candidates.len() {
            let mut record = candidates[(start + offset) % candidates.len()].clone();

            if let Err(err) = self.ensure_fresh(&mut record).await {
                last_err = Some(err);
                continue;
            }

            let identity = record.identity();

            for candidate_model in self.model_attempts(&identity, model) {
                if self.ledger.is_exhausted(&identity, &candidate_model) {
                    continue;
                }

                let client = UpstreamClient::new(&self.http, &record);
                let result = if stream {
                    client.stream_generate(&candidate_model, request).await.map(|r| DispatchOutcome::Stream(r, identity.clone(), candidate_model.clone()))
                } else {
                    client.generate(&candidate_model, request).await.map(DispatchOutcome::Response)
                };

                match result {
                    Ok(outcome) => return Ok(outcome),
                    Err(ProxyError::UpstreamStatus { status, body }) if status == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                        warn!(email = %identity.email, model = %candidate_model, "quota exhausted, marking cooldown");
                        self.ledger.mark(&identity, &candidate_model);
                        last_err = Some(ProxyError::UpstreamStatus { status, body });
                        continue;
                    }
                    Err(ProxyError::UpstreamStatus { status, body }) if status == reqwest::StatusCode::FORBIDDEN => {
                        return Err(ProxyError::UpstreamStatus { status, body });
                    }
                    Err(err) => {
                        last_err = Some(err);
                        break;
                    }
                }
            }
        }

        info!(model = %model, "all candidate accounts exhausted for model");
        let _ = last_err;
        Err(ProxyError::Quota(model.to_string()))
    }

    /// The ordered list of model names to try for one account: the
    /// requested model first, then its preview aliases (if enabled and
    /// this is an OAuth credential), without advancing the round-robin
    /// cursor between them.
    fn model_attempts(&self, identity: &Identity, model: &str) -> Vec<String> {
        let mut attempts = vec![model.to_string()];
        let is_oauth = matches!(identity.provider, crate::credential::Provider::GeminiOauth);
        if self.switch_preview_model && is_oauth {
            attempts.extend(QuotaLedger::preview_candidates(model).iter().map(|s| s.to_string()));
        }
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Provider;
    use std::fs;

    fn write_record(dir: &std::path::Path, email: &str, provider: Provider) {
        let record = serde_json::json!({
            "provider": match provider { Provider::GeminiOauth => "gemini-oauth", Provider::GlApikey => "gl-apikey", Provider::CodexOauth => "codex-oauth" },
            "email": email,
            "api_key": "fake",
            "auto": true,
        });
        fs::write(dir.join(format!("{email}.json")), serde_json::to_string(&record).unwrap()).unwrap();
    }

    #[test]
    fn model_attempts_includes_preview_aliases_for_oauth_only() {
        let dir = std::env::temp_dir().join(format!("relaykit-pool-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = CredentialStore::open(&dir, &[]).unwrap();
        let ledger = Arc::new(QuotaLedger::new());
        let pool = AccountPool::new(store, ledger, reqwest::Client::new(), true, true);

        let oauth_identity = Identity { provider: Provider::GeminiOauth, email: "a@example.com".to_string(), project: None };
        let attempts = pool.model_attempts(&oauth_identity, "gemini-2.5-pro");
        assert_eq!(attempts.len(), 3);

        let apikey_identity = Identity { provider: Provider::GlApikey, email: "b@example.com".to_string(), project: None };
        let attempts = pool.model_attempts(&apikey_identity, "gemini-2.5-pro");
        assert_eq!(attempts.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn empty_candidate_set_reports_quota_error_without_dispatch() {
        let dir = std::env::temp_dir().join(format!("relaykit-pool-test-empty-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = CredentialStore::open(&dir, &[]).unwrap();
        let ledger = Arc::new(QuotaLedger::new());
        let pool = AccountPool::new(store, ledger, reqwest::Client::new(), true, true);
        assert!(pool.candidates("gemini-2.5-pro").is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn round_robin_cursor_advances() {
        let dir = std::env::temp_dir().join(format!("relaykit-pool-test-rr-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        write_record(&dir, "a@example.com", Provider::GlApikey);
        write_record(&dir, "b@example.com", Provider::GlApikey);
        let store = CredentialStore::open(&dir, &[]).unwrap();
        let ledger = Arc::new(QuotaLedger::new());
        let pool = AccountPool::new(store, ledger, reqwest::Client::new(), true, true);

        let first = pool.next_start_index(2);
        let second = pool.next_start_index(2);
        assert_ne!(first, second);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn switch_project_disabled_collapses_same_email_to_one_candidate() {
        let dir = std::env::temp_dir().join(format!("relaykit-pool-test-project-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for project in ["proj-a", "proj-b"] {
            let record = serde_json::json!({
                "provider": "gemini-oauth",
                "email": "a@example.com",
                "project": project,
                "api_key": "fake",
                "auto": true,
            });
            fs::write(dir.join(format!("a-{project}.json")), serde_json::to_string(&record).unwrap()).unwrap();
        }
        let store = CredentialStore::open(&dir, &[]).unwrap();
        let ledger = Arc::new(QuotaLedger::new());

        let roaming = AccountPool::new(Arc::clone(&store), Arc::clone(&ledger), reqwest::Client::new(), true, true);
        assert_eq!(roaming.candidates("gemini-2.5-pro").len(), 2);

        let pinned = AccountPool::new(store, ledger, reqwest::Client::new(), true, false);
        assert_eq!(pinned.candidates("gemini-2.5-pro").len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn expired_credential_without_refresh_token_is_disabled_and_persisted() {
        let dir = std::env::temp_dir().join(format!("relaykit-pool-test-refresh-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let store = CredentialStore::open(&dir, &[]).unwrap();
        let ledger = Arc::new(QuotaLedger::new());
        let pool = AccountPool::new(Arc::clone(&store), ledger, reqwest::Client::new(), true, true);

        let mut record = CredentialRecord {
            provider: Provider::GeminiOauth,
            email: "expired@example.com".to_string(),
            project: None,
            access_token: Some("stale".to_string()),
            refresh_token: None,
            expiry: Some(chrono::Utc::now() - chrono::Duration::seconds(1)),
            api_key: None,
            auto: true,
            extra: Default::default(),
        };
        store.persist(record.clone()).unwrap();

        let err = pool.ensure_fresh(&mut record).await.unwrap_err();
        assert!(matches!(err, ProxyError::Auth(_)));
        assert!(!record.auto);

        let persisted = store.snapshot().iter().find(|r| r.email == "expired@example.com").cloned().unwrap();
        assert!(!persisted.auto);

        fs::remove_dir_all(&dir).ok();
    }
}
