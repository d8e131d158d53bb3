//! Per-(account, model) quota cooldown tracking and preview-model fallback.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::credential::Identity;

/// How long a 429 against one (identity, model) pair sticks before that
/// combination is eligible for dispatch again.
const COOLDOWN: chrono::Duration = chrono::Duration::minutes(30);

/// Tracks which (account, model) combinations are currently cooling down
/// after a quota-exhausted response, and what preview aliases a stable
/// model can fall back to before giving up on an account entirely.
pub struct QuotaLedger {
    cooldowns: Mutex<HashMap<(Identity, String), DateTime<Utc>>>,
}

impl Default for QuotaLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl QuotaLedger {
    pub fn new() -> Self {
        QuotaLedger {
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    /// Records a quota-exhausted response for this (identity, model) pair,
    /// starting a fresh 30-minute cooldown from now.
    pub fn mark(&self, identity: &Identity, model: &str) {
        self.cooldowns
            .lock()
            .expect("quota ledger lock poisoned")
            .insert((identity.clone(), model.to_string()), Utc::now());
    }

    /// Whether this (identity, model) pair is still within its cooldown.
    /// Expiry is checked at read time only — a successful response on an
    /// unrelated model never clears another model's cooldown early.
    pub fn is_exhausted(&self, identity: &Identity, model: &str) -> bool {
        let key = (identity.clone(), model.to_string());
        let cooldowns = self.cooldowns.lock().expect("quota ledger lock poisoned");
        match cooldowns.get(&key) {
            Some(marked_at) => Utc::now() - *marked_at < COOLDOWN,
            None => false,
        }
    }

    /// Explicitly clears a cooldown, e.g. after an operator manually
    /// re-enables an account.
    pub fn clear(&self, identity: &Identity, model: &str) {
        self.cooldowns
            .lock()
            .expect("quota ledger lock poisoned")
            .remove(&(identity.clone(), model.to_string()));
    }

    /// Preview aliases a stable model can substitute, tried in order.
    pub fn preview_candidates(model: &str) -> &'static [&'static str] {
        match model {
            "gemini-2.5-pro" => &["gemini-2.5-pro-preview-05-06", "gemini-2.5-pro-preview-06-05"],
            "gemini-2.5-flash" => &["gemini-2.5-flash-preview-04-17", "gemini-2.5-flash-preview-05-20"],
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Provider;

    fn id() -> Identity {
        Identity {
            provider: Provider::GeminiOauth,
            email: "a@example.com".to_string(),
            project: None,
        }
    }

    #[test]
    fn fresh_ledger_reports_nothing_exhausted() {
        let ledger = QuotaLedger::new();
        assert!(!ledger.is_exhausted(&id(), "gemini-2.5-pro"));
    }

    #[test]
    fn marking_sets_cooldown_for_that_model_only() {
        let ledger = QuotaLedger::new();
        ledger.mark(&id(), "gemini-2.5-pro");
        assert!(ledger.is_exhausted(&id(), "gemini-2.5-pro"));
        assert!(!ledger.is_exhausted(&id(), "gemini-2.5-flash"));
    }

    #[test]
    fn clear_removes_cooldown() {
        let ledger = QuotaLedger::new();
        ledger.mark(&id(), "gemini-2.5-pro");
        ledger.clear(&id(), "gemini-2.5-pro");
        assert!(!ledger.is_exhausted(&id(), "gemini-2.5-pro"));
    }

    #[test]
    fn preview_candidates_known_and_unknown_models() {
        assert_eq!(
            QuotaLedger::preview_candidates("gemini-2.5-pro"),
            &["gemini-2.5-pro-preview-05-06", "gemini-2.5-pro-preview-06-05"]
        );
        assert!(QuotaLedger::preview_candidates("gpt-5").is_empty());
    }
}
