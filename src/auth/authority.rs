//! B2C policy authorities.
//!
//! A B2C authority is `https://{host}/tfp/{tenant}/{policy}`; each user flow
//! (sign-up-or-sign-in, edit-profile, ...) gets its own authority and its own
//! authorize/token endpoints.

use crate::config::B2cConfig;
use crate::error::ConfigError;
use std::fmt;
use url::Url;

/// A validated B2C policy authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct B2cAuthority {
    url: Url,
    host: String,
    tenant: String,
    policy: String,
}

impl B2cAuthority {
    /// Build the authority for `policy` in `tenant`, served from `host`.
    pub fn new(host: &str, tenant: &str, policy: &str) -> Result<Self, ConfigError> {
        let raw = format!("https://{}/tfp/{}/{}", host, tenant, policy);

        for (name, segment) in [("host", host), ("tenant", tenant), ("policy", policy)] {
            if segment.is_empty() {
                return Err(ConfigError::InvalidAuthority {
                    url: raw,
                    reason: format!("{} is empty", name),
                });
            }
            if segment.contains(['/', '?', '#']) || segment.chars().any(char::is_whitespace) {
                return Err(ConfigError::InvalidAuthority {
                    url: raw,
                    reason: format!("{} contains an invalid character", name),
                });
            }
        }

        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidAuthority {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidAuthority {
                url: raw,
                reason: "missing host".to_string(),
            });
        }

        Ok(Self {
            url,
            host: host.to_lowercase(),
            tenant: tenant.to_string(),
            policy: policy.to_string(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Authority host, also the account "environment".
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn authorize_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/authorize", self.url.as_str().trim_end_matches('/'))
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/v2.0/token", self.url.as_str().trim_end_matches('/'))
    }

    /// Same authority, compared case-insensitively on policy and host.
    pub fn matches(&self, other: &B2cAuthority) -> bool {
        self.host == other.host
            && self.tenant.eq_ignore_ascii_case(&other.tenant)
            && self.policy.eq_ignore_ascii_case(&other.policy)
    }
}

impl fmt::Display for B2cAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// The authorities the identity client is allowed to talk to.
#[derive(Debug, Clone)]
pub struct KnownAuthorities {
    sign_in: B2cAuthority,
    edit_profile: B2cAuthority,
}

impl KnownAuthorities {
    /// Build the sign-in and edit-profile authorities from configuration.
    pub fn from_config(config: &B2cConfig) -> Result<Self, ConfigError> {
        let sign_in =
            B2cAuthority::new(&config.authority_host, &config.tenant, &config.sign_in_policy)?;
        let edit_profile = B2cAuthority::new(
            &config.authority_host,
            &config.tenant,
            &config.edit_profile_policy,
        )?;
        Ok(Self {
            sign_in,
            edit_profile,
        })
    }

    pub fn sign_in(&self) -> &B2cAuthority {
        &self.sign_in
    }

    pub fn edit_profile(&self) -> &B2cAuthority {
        &self.edit_profile
    }

    /// Reject authorities that were not registered.
    pub fn ensure_known(&self, authority: &B2cAuthority) -> Result<(), ConfigError> {
        if self.sign_in.matches(authority) || self.edit_profile.matches(authority) {
            Ok(())
        } else {
            Err(ConfigError::UnknownAuthority(authority.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b2c_config() -> B2cConfig {
        B2cConfig {
            authority_host: "contoso.b2clogin.com".into(),
            tenant: "contoso.onmicrosoft.com".into(),
            sign_in_policy: "B2C_1_signup_signin".into(),
            edit_profile_policy: "B2C_1_edit_profile".into(),
        }
    }

    #[test]
    fn test_authority_url() {
        let authority =
            B2cAuthority::new("contoso.b2clogin.com", "contoso.onmicrosoft.com", "B2C_1_susi")
                .unwrap();
        assert_eq!(
            authority.to_string(),
            "https://contoso.b2clogin.com/tfp/contoso.onmicrosoft.com/B2C_1_susi"
        );
        assert_eq!(
            authority.token_endpoint(),
            "https://contoso.b2clogin.com/tfp/contoso.onmicrosoft.com/B2C_1_susi/oauth2/v2.0/token"
        );
        assert_eq!(
            authority.authorize_endpoint(),
            "https://contoso.b2clogin.com/tfp/contoso.onmicrosoft.com/B2C_1_susi/oauth2/v2.0/authorize"
        );
    }

    #[test]
    fn test_invalid_authority() {
        assert!(matches!(
            B2cAuthority::new("", "contoso.onmicrosoft.com", "B2C_1_susi"),
            Err(ConfigError::InvalidAuthority { .. })
        ));
        assert!(matches!(
            B2cAuthority::new("contoso.b2clogin.com", "contoso/evil", "B2C_1_susi"),
            Err(ConfigError::InvalidAuthority { .. })
        ));
        assert!(matches!(
            B2cAuthority::new("bad host", "contoso.onmicrosoft.com", "B2C_1_susi"),
            Err(ConfigError::InvalidAuthority { .. })
        ));
    }

    #[test]
    fn test_known_authorities() {
        let known = KnownAuthorities::from_config(&b2c_config()).unwrap();
        assert_eq!(known.sign_in().policy(), "B2C_1_signup_signin");
        assert_eq!(known.edit_profile().policy(), "B2C_1_edit_profile");
        assert!(known.ensure_known(known.sign_in()).is_ok());
        assert!(known.ensure_known(known.edit_profile()).is_ok());

        let other =
            B2cAuthority::new("evil.b2clogin.com", "contoso.onmicrosoft.com", "B2C_1_signup_signin")
                .unwrap();
        assert!(matches!(
            known.ensure_known(&other),
            Err(ConfigError::UnknownAuthority(_))
        ));
    }

    #[test]
    fn test_known_authorities_bad_policy() {
        let mut config = b2c_config();
        config.edit_profile_policy = String::new();
        assert!(KnownAuthorities::from_config(&config).is_err());
    }
}
