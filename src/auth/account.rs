//! Account references and the persisted account hint.

use crate::auth::authority::B2cAuthority;
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A signed-in account as known to the identity client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Opaque home account identifier: `{object_id}-{policy}.{tenant_id}`.
    pub identifier: String,
    /// Preferred username (first email, or display name).
    pub username: Option<String>,
    /// Authority host the account was issued by.
    pub environment: String,
    /// String-valued claims from the ID token.
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

impl Account {
    /// Build an account from decoded ID token claims.
    pub fn from_id_token(claims: &IdTokenClaims, authority: &B2cAuthority) -> Self {
        let object_id = claims.oid.as_deref().unwrap_or(&claims.sub);
        let policy = claims
            .tfp
            .as_deref()
            .or(claims.acr.as_deref())
            .unwrap_or_else(|| authority.policy());
        let tenant_id = claims.tid.as_deref().unwrap_or_else(|| authority.tenant());

        let identifier = format!("{}-{}.{}", object_id, policy, tenant_id).to_lowercase();

        let username = claims
            .emails
            .first()
            .cloned()
            .or_else(|| claims.preferred_username.clone())
            .or_else(|| claims.name.clone());

        Self {
            identifier,
            username,
            environment: authority.host().to_string(),
            claims: claims.string_claims(),
        }
    }

    /// Text for the username label.
    pub fn display_name(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.identifier)
    }
}

/// Tolerated difference between our clock and the token issuer's.
pub const CLOCK_SKEW_SECONDS: i64 = 300;

/// The subset of ID token claims B2C issues that the client understands.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    /// Trust framework policy (B2C user flow).
    #[serde(default)]
    pub tfp: Option<String>,
    /// Older tenants report the policy in `acr`.
    #[serde(default)]
    pub acr: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Decode the payload of a compact JWT.
    ///
    /// The signature is not checked: the token comes straight from the token
    /// endpoint over TLS.
    pub fn decode(id_token: &str) -> Result<Self, AuthError> {
        let mut parts = id_token.split('.');
        let payload = match (parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_)) => payload,
            _ => return Err(AuthError::InvalidIdToken("not a compact JWT".to_string())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::InvalidIdToken(e.to_string()))?;

        serde_json::from_slice(&bytes).map_err(|e| AuthError::InvalidIdToken(e.to_string()))
    }

    /// Whether `exp` lies in the past at unix time `now`, allowing for
    /// [`CLOCK_SKEW_SECONDS`] of drift. A token without `exp` never expires.
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp
            .map(|exp| exp.saturating_add(CLOCK_SKEW_SECONDS) <= now)
            .unwrap_or(false)
    }

    /// All claims with a string representation.
    fn string_claims(&self) -> BTreeMap<String, String> {
        let mut claims: BTreeMap<String, String> = self
            .other
            .iter()
            .filter_map(|(k, v)| match v {
                serde_json::Value::String(s) => Some((k.clone(), s.clone())),
                serde_json::Value::Number(n) => Some((k.clone(), n.to_string())),
                serde_json::Value::Bool(b) => Some((k.clone(), b.to_string())),
                _ => None,
            })
            .collect();

        claims.insert("sub".to_string(), self.sub.clone());
        let optional = [
            ("oid", &self.oid),
            ("tid", &self.tid),
            ("tfp", &self.tfp),
            ("acr", &self.acr),
            ("name", &self.name),
            ("preferred_username", &self.preferred_username),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                claims.insert(key.to_string(), value.clone());
            }
        }
        if !self.emails.is_empty() {
            claims.insert("emails".to_string(), self.emails.join(","));
        }
        claims
    }
}

/// Account snapshot persisted as the "current account" hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedAccount {
    pub identifier: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub claims: BTreeMap<String, String>,
}

impl PersistedAccount {
    /// Serialize to JSON for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a stored value. A value that is not a JSON snapshot is taken as
    /// a bare identifier.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.starts_with('{') {
            return serde_json::from_str::<Self>(value)
                .ok()
                .filter(|p| !p.identifier.is_empty());
        }
        Some(Self {
            identifier: value.to_string(),
            username: None,
            environment: None,
            claims: BTreeMap::new(),
        })
    }
}

impl From<&Account> for PersistedAccount {
    fn from(account: &Account) -> Self {
        Self {
            identifier: account.identifier.clone(),
            username: account.username.clone(),
            environment: Some(account.environment.clone()),
            claims: account.claims.clone(),
        }
    }
}
