//! Layered YAML + environment configuration.

use std::path::PathBuf;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;

use crate::error::ProxyError;

fn default_port() -> u16 {
    8317
}

fn default_auth_dir() -> String {
    "~/.cli-proxy-api".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaExceededConfig {
    #[serde(default = "default_true")]
    pub switch_project: bool,
    #[serde(default = "default_true")]
    pub switch_preview_model: bool,
}

impl Default for QuotaExceededConfig {
    fn default() -> Self {
        QuotaExceededConfig {
            switch_project: true,
            switch_preview_model: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,

    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default)]
    pub generative_language_api_key: Vec<String>,

    #[serde(default)]
    pub quota_exceeded: QuotaExceededConfig,
}

impl Config {
    /// Loads config from `./config.yaml` (or the path named by
    /// `RELAYKIT_CONFIG`), then layers `RELAYKIT_`-prefixed environment
    /// variables on top.
    pub fn load() -> Result<Self, ProxyError> {
        let path = std::env::var("RELAYKIT_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());

        let mut figment = Figment::new();
        if std::path::Path::new(&path).exists() {
            figment = figment.merge(Yaml::file(&path));
        }
        figment = figment.merge(Env::prefixed("RELAYKIT_").split("_"));

        figment
            .extract()
            .map_err(|err| ProxyError::Config(format!("failed to load config from {path}: {err}")))
    }

    /// Expands a leading `~` to the user's home directory.
    pub fn auth_dir_path(&self) -> Result<PathBuf, ProxyError> {
        if let Some(rest) = self.auth_dir.strip_prefix("~/") {
            let home = std::env::var("HOME")
                .map_err(|_| ProxyError::Config("HOME is not set, cannot expand auth-dir".to_string()))?;
            Ok(PathBuf::from(home).join(rest))
        } else {
            Ok(PathBuf::from(&self.auth_dir))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config: Config = Figment::new().extract().unwrap();
        assert_eq!(config.port, 8317);
        assert_eq!(config.auth_dir, "~/.cli-proxy-api");
        assert!(!config.debug);
        assert!(config.quota_exceeded.switch_project);
        assert!(config.quota_exceeded.switch_preview_model);
        assert!(config.api_keys.is_empty());
        assert!(config.generative_language_api_key.is_empty());
    }

    #[test]
    fn tilde_auth_dir_expands_against_home() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe {
            std::env::set_var("HOME", "/home/testuser");
        }
        let config = Config {
            port: 8317,
            auth_dir: "~/.cli-proxy-api".to_string(),
            debug: false,
            proxy_url: None,
            api_keys: vec![],
            generative_language_api_key: vec![],
            quota_exceeded: QuotaExceededConfig::default(),
        };
        assert_eq!(
            config.auth_dir_path().unwrap(),
            PathBuf::from("/home/testuser/.cli-proxy-api")
        );
    }
}
