//! Persistent token cache for the B2C identity client.
//!
//! Holds the signed-in accounts, one refresh token per account and the
//! access tokens issued per (account, authority, scopes). The whole cache is
//! one JSON document in the secure store.

use crate::auth::account::Account;
use crate::auth::authority::B2cAuthority;
use crate::error::KeychainError;
use crate::keychain::secure::SecureString;
use crate::keychain::SecureStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Secure store key of the serialized cache.
pub const TOKEN_CACHE_KEY: &str = "msal.token_cache";

/// A cached access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenEntry {
    pub secret: SecureString,
    pub expires_on: DateTime<Utc>,
    pub authority: String,
    /// Space-joined, sorted scope list.
    pub scopes: String,
}

/// Serialized cache contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
    #[serde(default)]
    refresh_tokens: BTreeMap<String, SecureString>,
    #[serde(default)]
    access_tokens: BTreeMap<String, Vec<AccessTokenEntry>>,
    #[serde(default)]
    current: Option<String>,
}

impl TokenCache {
    /// Load the cache from `store`, starting empty when missing or unreadable.
    pub fn load(store: &dyn SecureStore) -> Self {
        match store.get(TOKEN_CACHE_KEY) {
            Ok(Some(bytes)) => match serde_json::from_slice::<TokenCache>(&bytes) {
                Ok(cache) => {
                    debug!("Loaded token cache with {} account(s)", cache.accounts.len());
                    cache
                }
                Err(e) => {
                    warn!("Token cache is corrupted, starting empty: {}", e);
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(e) => {
                warn!("Failed to read token cache, starting empty: {}", e);
                Self::default()
            }
        }
    }

    /// Write the cache to `store`.
    pub fn save(&self, store: &dyn SecureStore) -> Result<(), KeychainError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| KeychainError::StoreFailed(e.to_string()))?;
        store.set(&bytes, TOKEN_CACHE_KEY)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.accounts.values().cloned().collect()
    }

    pub fn account(&self, identifier: &str) -> Option<&Account> {
        self.accounts.get(identifier)
    }

    /// The account the user last signed in with.
    ///
    /// Falls back to the only cached account when no current marker is set.
    pub fn current_account(&self) -> Option<&Account> {
        match &self.current {
            Some(id) => self.accounts.get(id),
            None if self.accounts.len() == 1 => self.accounts.values().next(),
            None => None,
        }
    }

    pub fn refresh_token(&self, identifier: &str) -> Option<&SecureString> {
        self.refresh_tokens.get(identifier)
    }

    /// An access token for the request that is still valid for at least `min_remaining`.
    pub fn access_token(
        &self,
        identifier: &str,
        authority: &B2cAuthority,
        scopes: &[String],
        min_remaining: Duration,
    ) -> Option<&AccessTokenEntry> {
        let scope_key = scope_key(scopes);
        let authority = authority.to_string();
        let now = Utc::now();

        self.access_tokens.get(identifier)?.iter().find(|entry| {
            entry.authority.eq_ignore_ascii_case(&authority)
                && entry.scopes == scope_key
                && entry.expires_on - now > min_remaining
        })
    }

    /// Record a successful token response for `account`.
    pub fn store_tokens(
        &mut self,
        account: &Account,
        authority: &B2cAuthority,
        scopes: &[String],
        access_token: SecureString,
        expires_in: u64,
        refresh_token: Option<SecureString>,
    ) -> DateTime<Utc> {
        let expires_on = Utc::now() + Duration::seconds(expires_in as i64);
        let identifier = account.identifier.clone();

        self.accounts.insert(identifier.clone(), account.clone());
        if let Some(refresh_token) = refresh_token {
            self.refresh_tokens.insert(identifier.clone(), refresh_token);
        }

        let scope_key = scope_key(scopes);
        let authority = authority.to_string();
        let entries = self.access_tokens.entry(identifier.clone()).or_default();
        entries.retain(|e| {
            !(e.authority.eq_ignore_ascii_case(&authority) && e.scopes == scope_key)
        });
        entries.retain(|e| e.expires_on > Utc::now());
        entries.push(AccessTokenEntry {
            secret: access_token,
            expires_on,
            authority,
            scopes: scope_key,
        });

        self.current = Some(identifier);
        expires_on
    }

    /// Drop everything cached for `identifier`. Returns whether the account was known.
    pub fn remove_account(&mut self, identifier: &str) -> bool {
        let known = self.accounts.remove(identifier).is_some();
        self.refresh_tokens.remove(identifier);
        self.access_tokens.remove(identifier);
        if self.current.as_deref() == Some(identifier) {
            self.current = None;
        }
        known
    }
}

fn scope_key(scopes: &[String]) -> String {
    let mut sorted: Vec<String> = scopes.iter().map(|s| s.to_lowercase()).collect();
    sorted.sort();
    sorted.dedup();
    sorted.join(" ")
}

/// Calculate the remaining time until token expiry.
pub fn time_until_expiry(expiry: DateTime<Utc>) -> Option<Duration> {
    let now = Utc::now();

    if expiry > now {
        Some(expiry - now)
    } else {
        None
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
