//! On-disk shape of a single upstream account credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which upstream family a credential authenticates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    GeminiOauth,
    GlApikey,
    CodexOauth,
}

impl Provider {
    /// Whether `model` belongs to this provider's model family, by prefix.
    pub fn handles_model(self, model: &str) -> bool {
        match self {
            Provider::GeminiOauth | Provider::GlApikey => model.starts_with("gemini-"),
            Provider::CodexOauth => model.starts_with("gpt-"),
        }
    }
}

/// Identifies one account slot in the pool, independent of token contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub provider: Provider,
    pub email: String,
    #[serde(default)]
    pub project: Option<String>,
}

/// One upstream account as loaded from its JSON file on disk.
///
/// `extra` preserves fields this proxy doesn't model yet (mirroring the
/// canonical wire schemas' forward-compatibility discipline), so a
/// round-tripped write never drops data a newer version of the file format
/// might carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub provider: Provider,
    pub email: String,
    #[serde(default)]
    pub project: Option<String>,

    /// OAuth records only; absent for `gl-apikey`.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,

    /// `gl-apikey` records only.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Whether this account currently participates in round-robin dispatch.
    /// Flipped to `false` on an unrecoverable refresh failure.
    #[serde(default = "default_true")]
    pub auto: bool,

    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

impl CredentialRecord {
    pub fn identity(&self) -> Identity {
        Identity {
            provider: self.provider,
            email: self.email.clone(),
            project: self.project.clone(),
        }
    }

    /// OAuth access tokens are considered expired 60 seconds early to leave
    /// headroom for in-flight requests.
    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => Utc::now() + chrono::Duration::seconds(60) >= expiry,
            None => false,
        }
    }

    /// A stable hash of the bits that matter for change detection, so the
    /// store can tell a touched-but-unchanged file from an actually rotated
    /// token without comparing full JSON blobs.
    pub fn token_fingerprint(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.access_token.hash(&mut hasher);
        self.refresh_token.hash(&mut hasher);
        self.api_key.hash(&mut hasher);
        self.auto.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_model_family_prefix_match() {
        assert!(Provider::GeminiOauth.handles_model("gemini-2.5-pro"));
        assert!(!Provider::GeminiOauth.handles_model("gpt-5"));
        assert!(Provider::CodexOauth.handles_model("gpt-5"));
        assert!(!Provider::CodexOauth.handles_model("gemini-2.5-flash"));
    }

    #[test]
    fn expiry_considers_sixty_second_headroom() {
        let mut record = CredentialRecord {
            provider: Provider::GeminiOauth,
            email: "a@example.com".to_string(),
            project: None,
            access_token: Some("tok".to_string()),
            refresh_token: Some("refresh".to_string()),
            expiry: Some(Utc::now() + chrono::Duration::seconds(30)),
            api_key: None,
            auto: true,
            extra: Default::default(),
        };
        assert!(record.is_expired());
        record.expiry = Some(Utc::now() + chrono::Duration::seconds(600));
        assert!(!record.is_expired());
    }

    #[test]
    fn unknown_fields_round_trip_through_extra() {
        let json = r#"{"provider":"gl-apikey","email":"a@example.com","api_key":"k","future_field":"x"}"#;
        let record: CredentialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.extra.get("future_field").unwrap(),
            &Value::String("x".to_string())
        );
    }
}
