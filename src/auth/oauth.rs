//! OAuth2 client with PKCE support for Azure AD B2C policy authorities.

use crate::auth::authority::B2cAuthority;
use crate::error::AuthError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Scopes added to every request so that an ID token and a refresh token come back.
const OIDC_SCOPES: [&str; 2] = ["openid", "offline_access"];

/// Token endpoint error codes that can only be fixed by signing in again.
const INTERACTION_REQUIRED_CODES: [&str; 4] = [
    "invalid_grant",
    "interaction_required",
    "login_required",
    "consent_required",
];

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (stored locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let verifier = random_token(32);

        // challenge = BASE64URL(SHA256(verifier))
        let hash = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// Random URL-safe token of `len` bytes of entropy.
fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(&bytes)
}

/// Everything the browser leg of an authorization request produced.
#[derive(Debug)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
    pub nonce: String,
    pub pkce: PkceChallenge,
}

/// OAuth2 client for B2C policy authorities.
pub struct OAuth2Client {
    client_id: String,
    redirect_uri: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client.
    pub fn new(client_id: &str, redirect_uri: &str) -> Result<Self, AuthError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AuthError::OAuthFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: client_id.to_string(),
            redirect_uri: redirect_uri.to_string(),
            http_client,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// No `prompt` parameter is sent, so the identity provider only shows
    /// UI when it needs to. The returned state and nonce must be verified
    /// against the redirect and the ID token.
    pub fn authorization_request(
        &self,
        authority: &B2cAuthority,
        scopes: &[String],
        login_hint: Option<&str>,
    ) -> Result<AuthorizationRequest, AuthError> {
        let pkce = PkceChallenge::new();
        let state = random_token(16);
        let nonce = random_token(16);

        let mut url = Url::parse(&authority.authorize_endpoint())
            .map_err(|e| AuthError::OAuthFailed(e.to_string()))?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("response_mode", "query")
                .append_pair("scope", &request_scope(scopes))
                .append_pair("state", &state)
                .append_pair("nonce", &nonce)
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256");

            if let Some(hint) = login_hint {
                query.append_pair("login_hint", hint);
            }
        }

        Ok(AuthorizationRequest {
            url,
            state,
            nonce,
            pkce,
        })
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        authority: &B2cAuthority,
        code: &str,
        pkce_verifier: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = request_scope(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        self.token_request(authority, &params)
            .await
            .map_err(|e| match e {
                TokenRequestError::Transport(msg) | TokenRequestError::Decode(msg) => {
                    AuthError::TokenExchangeFailed(msg)
                }
                TokenRequestError::Rejected { status, error } => {
                    tracing::error!(
                        "Token exchange failed: HTTP {} - {}",
                        status,
                        error.description()
                    );
                    AuthError::TokenExchangeFailed(format!("HTTP {}: {}", status, error.error))
                }
            })
    }

    /// Redeem a refresh token for a new access token.
    ///
    /// Grant errors that need the user back at the sign-in page come back as
    /// [`AuthError::InteractionRequired`].
    pub async fn refresh_token(
        &self,
        authority: &B2cAuthority,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, AuthError> {
        let scope = request_scope(scopes);
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("scope", scope.as_str()),
        ];

        self.token_request(authority, &params)
            .await
            .map_err(|e| match e {
                TokenRequestError::Transport(msg) | TokenRequestError::Decode(msg) => {
                    AuthError::TokenRefreshFailed(msg)
                }
                TokenRequestError::Rejected { status, error } => {
                    // Log error details for debugging (doesn't expose to user)
                    tracing::error!(
                        "Token refresh failed: HTTP {} - {}",
                        status,
                        error.description()
                    );
                    if error.requires_interaction() {
                        AuthError::InteractionRequired(error.error)
                    } else {
                        AuthError::TokenRefreshFailed(format!("HTTP {}: {}", status, error.error))
                    }
                }
            })
    }

    async fn token_request(
        &self,
        authority: &B2cAuthority,
        params: &[(&str, &str)],
    ) -> Result<TokenResponse, TokenRequestError> {
        let response = self
            .http_client
            .post(authority.token_endpoint())
            .form(params)
            .send()
            .await
            .map_err(|e| TokenRequestError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = serde_json::from_str::<OAuthErrorResponse>(&body).unwrap_or_else(|_| {
                OAuthErrorResponse {
                    error: "unknown_error".to_string(),
                    error_description: Some(body),
                }
            });
            return Err(TokenRequestError::Rejected {
                status: status.as_u16(),
                error,
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| TokenRequestError::Decode(e.to_string()))
    }
}

enum TokenRequestError {
    Transport(String),
    Decode(String),
    Rejected { status: u16, error: OAuthErrorResponse },
}

/// Scope string sent to B2C: the API scopes plus the OIDC scopes.
pub fn request_scope(scopes: &[String]) -> String {
    let mut all: Vec<&str> = scopes.iter().map(String::as_str).collect();
    for extra in OIDC_SCOPES {
        if !all.contains(&extra) {
            all.push(extra);
        }
    }
    all.join(" ")
}

/// Token response from the B2C token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

impl TokenResponse {
    /// B2C only issues bearer tokens; the type is case-insensitive.
    pub fn is_bearer(&self) -> bool {
        self.token_type.eq_ignore_ascii_case("bearer")
    }
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth2 error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl OAuthErrorResponse {
    /// Whether the user has to go through the sign-in page again.
    pub fn requires_interaction(&self) -> bool {
        INTERACTION_REQUIRED_CODES.contains(&self.error.as_str())
    }

    fn description(&self) -> &str {
        self.error_description.as_deref().unwrap_or(&self.error)
    }
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), AuthError> {
    let url = Url::parse(url_string).map_err(|_| AuthError::InvalidAuthCode)?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        // B2C reports a cancelled sign-up/sign-in page as access_denied with AADB2C90091
        if error == "access_denied" && description.contains("AADB2C90091") {
            return Err(AuthError::UserCancelled);
        }
        return Err(AuthError::OAuthFailed(description));
    }

    let code = params
        .get("code")
        .ok_or(AuthError::InvalidAuthCode)?
        .to_string();

    let state = params
        .get("state")
        .ok_or(AuthError::StateValidationFailed)?
        .to_string();

    Ok((code, state))
}
