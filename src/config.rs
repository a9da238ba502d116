//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub b2c: B2cConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub keychain: KeychainConfig,
    pub token: TokenConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub bundle_identifier: String,
}

/// B2C tenant and user-flow policies.
#[derive(Debug, Clone, Deserialize)]
pub struct B2cConfig {
    pub authority_host: String,
    pub tenant: String,
    pub sign_in_policy: String,
    pub edit_profile_policy: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_interactive_timeout")]
    pub interactive_timeout_seconds: u64,
    pub scopes: ScopesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScopesConfig {
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_endpoint: String,
}

/// Secure storage scoping.
#[derive(Debug, Clone, Deserialize)]
pub struct KeychainConfig {
    /// Keychain service / storage namespace shared by the account hint and the token cache.
    pub access_group: String,
    /// Key under which the current account snapshot is persisted.
    pub account_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub refresh_before_expiry_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: String,
}

fn default_interactive_timeout() -> u64 {
    300
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    ///
    /// Not validated: the app starts with an incomplete config and reports
    /// [`Config::validate`]'s error instead of signing in.
    pub fn load() -> Result<Self> {
        let mut config = Self::embedded()?;
        config.apply_env_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Parse the embedded config without overrides or validation.
    pub fn embedded() -> Result<Self> {
        toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")
    }

    /// Apply overrides from a key lookup (the process environment in production).
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup("B2C_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Some(tenant) = lookup("B2C_TENANT") {
            self.b2c.tenant = tenant;
        }

        if let Some(host) = lookup("B2C_AUTHORITY_HOST") {
            self.b2c.authority_host = host;
        }

        if let Some(policy) = lookup("B2C_SIGN_IN_POLICY") {
            self.b2c.sign_in_policy = policy;
        }

        if let Some(policy) = lookup("B2C_EDIT_PROFILE_POLICY") {
            self.b2c.edit_profile_policy = policy;
        }

        if let Some(redirect_uri) = lookup("B2C_REDIRECT_URI") {
            self.oauth.redirect_uri = redirect_uri;
        }

        if let Some(scopes) = lookup("B2C_SCOPES") {
            self.oauth.scopes.scopes = scopes.split_whitespace().map(str::to_string).collect();
        }

        if let Some(endpoint) = lookup("GRAPH_ENDPOINT") {
            self.api.graph_endpoint = endpoint;
        }

        if let Some(log_level) = lookup("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oauth.client_id.is_empty() || self.oauth.client_id == "YOUR_B2C_CLIENT_ID" {
            return Err(ConfigError::Incomplete(
                "B2C client_id not configured. Set B2C_CLIENT_ID environment variable \
                 or update config.toml"
                    .to_string(),
            ));
        }

        if self.b2c.tenant.is_empty() || self.b2c.tenant.starts_with("YOUR_TENANT") {
            return Err(ConfigError::Incomplete(
                "B2C tenant not configured. Set B2C_TENANT environment variable \
                 or update config.toml"
                    .to_string(),
            ));
        }

        let host = &self.b2c.authority_host;
        if host.is_empty() || host.starts_with("YOUR_TENANT") {
            return Err(ConfigError::Incomplete(
                "B2C authority host not configured. Set B2C_AUTHORITY_HOST environment \
                 variable or update config.toml"
                    .to_string(),
            ));
        }

        if self.oauth.scopes.scopes.is_empty() {
            return Err(ConfigError::Incomplete(
                "At least one API scope must be configured".to_string(),
            ));
        }

        Ok(())
    }

    /// How long the interactive flow waits for the browser redirect.
    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.oauth.interactive_timeout_seconds)
    }
}
