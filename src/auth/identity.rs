//! Identity client: account enumeration, token acquisition and sign-out.
//!
//! [`IdentityClient`] is the seam the session controller talks to.
//! [`B2cIdentityClient`] implements it with the authorization code + PKCE
//! flow against B2C policy authorities and a token cache kept in the secure
//! store.

use crate::auth::account::{Account, IdTokenClaims};
use crate::auth::authority::{B2cAuthority, KnownAuthorities};
use crate::auth::callback_server::{self, CallbackResult, CallbackServer};
use crate::auth::oauth::{parse_callback_url, OAuth2Client, TokenResponse};
use crate::auth::token_cache::TokenCache;
use crate::config::Config;
use crate::error::{AppError, AuthError};
use crate::keychain::secure::SecureString;
use crate::keychain::SecureStore;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Parameters for an interactive token request.
#[derive(Debug, Clone)]
pub struct InteractiveParameters {
    pub scopes: Vec<String>,
    pub authority: B2cAuthority,
    /// Pre-fills the sign-in page's username field.
    pub login_hint: Option<String>,
}

/// Parameters for a silent token request.
#[derive(Debug, Clone)]
pub struct SilentParameters {
    pub scopes: Vec<String>,
    pub account: Account,
    pub authority: B2cAuthority,
}

/// Parameters for sign-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignOutParameters {
    /// Also end the session at the identity provider in the browser.
    pub sign_out_from_browser: bool,
}

/// A successful token acquisition.
#[derive(Debug, Clone)]
pub struct TokenResult {
    pub access_token: SecureString,
    pub account: Account,
    pub expires_on: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub authority: B2cAuthority,
}

/// Whether the device is shared between users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Private,
    Shared,
}

impl DeviceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceMode::Private => "private",
            DeviceMode::Shared => "shared",
        }
    }
}

/// Device information reported by the identity client.
#[derive(Debug, Clone)]
pub struct DeviceInformation {
    pub mode: DeviceMode,
    pub extra: BTreeMap<String, String>,
}

/// Operations the session controller needs from an identity provider client.
///
/// All methods complete on the caller's task. In-flight calls cannot be
/// cancelled; dropping the future abandons the result only.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Every account in the client's cache.
    async fn all_accounts(&self) -> Result<Vec<Account>, AuthError>;

    /// The single active account, if any.
    async fn current_account(&self) -> Result<Option<Account>, AuthError>;

    /// Look up a cached account by its identifier.
    async fn account_for_identifier(&self, identifier: &str) -> Result<Option<Account>, AuthError>;

    /// Sign the user in through the browser.
    async fn acquire_token_interactive(
        &self,
        params: &InteractiveParameters,
    ) -> Result<TokenResult, AuthError>;

    /// Obtain a token from cached material without user interaction.
    async fn acquire_token_silent(&self, params: &SilentParameters)
        -> Result<TokenResult, AuthError>;

    /// Remove `account` and its tokens from the cache.
    async fn sign_out(&self, account: &Account, params: &SignOutParameters)
        -> Result<(), AuthError>;

    /// Report device information.
    async fn device_information(&self) -> Result<DeviceInformation, AuthError>;
}

/// Identity client for Azure AD B2C.
pub struct B2cIdentityClient {
    oauth: OAuth2Client,
    authorities: KnownAuthorities,
    store: Arc<dyn SecureStore>,
    cache: Mutex<TokenCache>,
    refresh_margin: Duration,
    interactive_timeout: std::time::Duration,
}

impl B2cIdentityClient {
    /// Build the client from configuration, registering the sign-in and
    /// edit-profile policies as known authorities.
    pub fn new(config: &Config, store: Arc<dyn SecureStore>) -> Result<Self, AppError> {
        let authorities = KnownAuthorities::from_config(&config.b2c)?;
        callback_server::redirect_target(&config.oauth.redirect_uri)?;
        let oauth = OAuth2Client::new(&config.oauth.client_id, &config.oauth.redirect_uri)?;
        let cache = TokenCache::load(store.as_ref());

        info!(
            "Identity client configured for {} (known authorities: {}, {})",
            config.oauth.client_id,
            authorities.sign_in(),
            authorities.edit_profile()
        );

        Ok(Self {
            oauth,
            authorities,
            store,
            cache: Mutex::new(cache),
            refresh_margin: Duration::seconds(config.token.refresh_before_expiry_seconds as i64),
            interactive_timeout: config.interactive_timeout(),
        })
    }

    /// Turn a token response into an account and cache it.
    async fn accept_token_response(
        &self,
        response: TokenResponse,
        authority: &B2cAuthority,
        scopes: &[String],
        expected_nonce: Option<&str>,
        known_account: Option<&Account>,
    ) -> Result<TokenResult, AuthError> {
        let claims = verify_token_response(&response, expected_nonce, Utc::now().timestamp())?;
        if !response.scope.is_empty() {
            debug!("Granted scopes: {}", response.scope);
        }

        let account = match claims {
            Some(claims) => Account::from_id_token(&claims, authority),
            None => known_account.cloned().ok_or_else(|| {
                AuthError::InvalidIdToken("token response carried no ID token".to_string())
            })?,
        };

        let access_token = SecureString::from(response.access_token.clone());
        let refresh_token = response.refresh_token.clone().map(SecureString::from);

        let mut cache = self.cache.lock().await;
        let expires_on = cache.store_tokens(
            &account,
            authority,
            scopes,
            access_token.clone(),
            response.expires_in,
            refresh_token,
        );
        cache.save(self.store.as_ref())?;

        Ok(TokenResult {
            access_token,
            account,
            expires_on,
            scopes: scopes.to_vec(),
            authority: authority.clone(),
        })
    }

    /// Run the browser leg and wait for the redirect.
    async fn authorize_in_browser(
        &self,
        params: &InteractiveParameters,
    ) -> Result<(String, crate::auth::oauth::AuthorizationRequest), AuthError> {
        let request = self.oauth.authorization_request(
            &params.authority,
            &params.scopes,
            params.login_hint.as_deref(),
        )?;

        let server = CallbackServer::bind(self.oauth.redirect_uri())
            .map_err(|e| AuthError::OAuthFailed(callback_error(e)))?;

        let url = launch_and_wait(server, request.url.as_str(), self.interactive_timeout, |u| {
            open::that(u)
        })
        .await?;
        Ok((url, request))
    }
}

/// Open the browser at `url`, then wait on `server` for the redirect.
///
/// The listener is bound before launching, so the redirect cannot race it.
/// A failed launch drops the listener and frees the port.
/// Check the token type and the ID token (nonce, expiry at unix time `now`).
/// Returns the decoded claims when the response carried an ID token.
fn verify_token_response(
    response: &TokenResponse,
    expected_nonce: Option<&str>,
    now: i64,
) -> Result<Option<IdTokenClaims>, AuthError> {
    if !response.is_bearer() {
        return Err(AuthError::TokenExchangeFailed(format!(
            "unsupported token type '{}'",
            response.token_type
        )));
    }

    let Some(id_token) = response.id_token.as_deref() else {
        return Ok(None);
    };
    let claims = IdTokenClaims::decode(id_token)?;
    if let Some(expected) = expected_nonce {
        if claims.nonce.as_deref() != Some(expected) {
            return Err(AuthError::InvalidIdToken("nonce mismatch".to_string()));
        }
    }
    if claims.is_expired(now) {
        return Err(AuthError::InvalidIdToken("id token expired".to_string()));
    }
    Ok(Some(claims))
}

async fn launch_and_wait<F>(
    server: CallbackServer,
    url: &str,
    timeout: std::time::Duration,
    launch: F,
) -> Result<String, AuthError>
where
    F: FnOnce(&str) -> std::io::Result<()>,
{
    if let Err(e) = launch(url) {
        warn!("Failed to open browser: {}", e);
        drop(server);
        return Err(AuthError::BrowserLaunchFailed(e.to_string()));
    }

    let result = tokio::task::spawn_blocking(move || server.wait(timeout))
        .await
        .map_err(|e| AuthError::OAuthFailed(format!("Callback server task failed: {}", e)))?;

    match result {
        CallbackResult::Success(url) => Ok(url),
        CallbackResult::TimedOut => Err(AuthError::CallbackTimeout),
        CallbackResult::Error(e) => Err(AuthError::OAuthFailed(e)),
    }
}

fn callback_error(result: CallbackResult) -> String {
    match result {
        CallbackResult::Error(e) => e,
        CallbackResult::TimedOut => "timed out".to_string(),
        CallbackResult::Success(_) => "unexpected callback".to_string(),
    }
}

#[async_trait]
impl IdentityClient for B2cIdentityClient {
    async fn all_accounts(&self) -> Result<Vec<Account>, AuthError> {
        Ok(self.cache.lock().await.accounts())
    }

    async fn current_account(&self) -> Result<Option<Account>, AuthError> {
        Ok(self.cache.lock().await.current_account().cloned())
    }

    async fn account_for_identifier(&self, identifier: &str) -> Result<Option<Account>, AuthError> {
        Ok(self.cache.lock().await.account(identifier).cloned())
    }

    async fn acquire_token_interactive(
        &self,
        params: &InteractiveParameters,
    ) -> Result<TokenResult, AuthError> {
        self.authorities
            .ensure_known(&params.authority)
            .map_err(|e| AuthError::OAuthFailed(e.to_string()))?;

        info!("Starting interactive sign-in against {}", params.authority);
        let (callback_url, request) = self.authorize_in_browser(params).await?;

        let (code, state) = parse_callback_url(&callback_url)?;
        if state != request.state {
            return Err(AuthError::StateValidationFailed);
        }

        let response = self
            .oauth
            .exchange_code(&params.authority, &code, &request.pkce.verifier, &params.scopes)
            .await?;

        let result = self
            .accept_token_response(
                response,
                &params.authority,
                &params.scopes,
                Some(&request.nonce),
                None,
            )
            .await?;

        info!("Interactive sign-in completed for {}", result.account.identifier);
        Ok(result)
    }

    async fn acquire_token_silent(
        &self,
        params: &SilentParameters,
    ) -> Result<TokenResult, AuthError> {
        self.authorities
            .ensure_known(&params.authority)
            .map_err(|e| AuthError::OAuthFailed(e.to_string()))?;

        let identifier = params.account.identifier.as_str();
        let refresh_token = {
            let cache = self.cache.lock().await;
            let account = cache.account(identifier).ok_or_else(|| {
                AuthError::InteractionRequired(format!("account {} is not cached", identifier))
            })?;

            let cached = cache.access_token(
                identifier,
                &params.authority,
                &params.scopes,
                self.refresh_margin,
            );
            if let Some(entry) = cached {
                debug!("Serving cached access token for {}", identifier);
                return Ok(TokenResult {
                    access_token: entry.secret.clone(),
                    account: account.clone(),
                    expires_on: entry.expires_on,
                    scopes: params.scopes.clone(),
                    authority: params.authority.clone(),
                });
            }

            cache.refresh_token(identifier).cloned().ok_or_else(|| {
                AuthError::InteractionRequired("no refresh token cached".to_string())
            })?
        };

        info!("Redeeming refresh token for {}", identifier);
        let response = self
            .oauth
            .refresh_token(&params.authority, refresh_token.as_str(), &params.scopes)
            .await?;

        self.accept_token_response(
            response,
            &params.authority,
            &params.scopes,
            None,
            Some(&params.account),
        )
        .await
    }

    async fn sign_out(
        &self,
        account: &Account,
        params: &SignOutParameters,
    ) -> Result<(), AuthError> {
        let mut cache = self.cache.lock().await;
        if !cache.remove_account(&account.identifier) {
            return Err(AuthError::AccountNotFound(account.identifier.clone()));
        }
        cache.save(self.store.as_ref())?;
        drop(cache);

        if params.sign_out_from_browser {
            let logout = format!(
                "{}/oauth2/v2.0/logout",
                self.authorities.sign_in().url().as_str().trim_end_matches('/')
            );
            if let Err(e) = open::that(&logout) {
                warn!("Failed to open browser for sign-out: {}", e);
            }
        }

        info!("Removed account {} from the token cache", account.identifier);
        Ok(())
    }

    async fn device_information(&self) -> Result<DeviceInformation, AuthError> {
        // Shared-device mode needs a broker; desktop clients are always private
        let mut extra = BTreeMap::new();
        extra.insert("os".to_string(), std::env::consts::OS.to_string());
        extra.insert("arch".to_string(), std::env::consts::ARCH.to_string());
        extra.insert("broker".to_string(), "none".to_string());

        Ok(DeviceInformation {
            mode: DeviceMode::Private,
            extra,
        })
    }
}
