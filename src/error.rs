//! Error types for the b2c-session application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Keychain error: {0}")]
    Keychain(#[from] KeychainError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building the identity client configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unable to create authority URL {url}: {reason}")]
    InvalidAuthority { url: String, reason: String },

    #[error("Authority {0} is not a known authority")]
    UnknownAuthority(String),

    #[error("Invalid redirect URI {0}")]
    InvalidRedirectUri(String),

    #[error("{0}")]
    Incomplete(String),
}

/// Authentication-related errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The cached session cannot be used without the user signing in again.
    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    #[error("OAuth2 authorization failed: {0}")]
    OAuthFailed(String),

    #[error("Invalid authorization code")]
    InvalidAuthCode,

    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Token refresh failed: {0}")]
    TokenRefreshFailed(String),

    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    #[error("State validation failed (possible CSRF attack)")]
    StateValidationFailed,

    #[error("OAuth callback timeout")]
    CallbackTimeout,

    #[error("User cancelled authentication")]
    UserCancelled,

    #[error("Failed to open browser: {0}")]
    BrowserLaunchFailed(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Token cache error: {0}")]
    Cache(#[from] KeychainError),
}

impl AuthError {
    /// Whether this error asks for an interactive sign-in.
    pub fn is_interaction_required(&self) -> bool {
        matches!(self, Self::InteractionRequired(_))
    }
}

/// Keychain storage errors.
#[derive(Error, Debug)]
pub enum KeychainError {
    #[error("Failed to store item: {0}")]
    StoreFailed(String),

    #[error("Failed to retrieve item: {0}")]
    RetrieveFailed(String),

    #[error("Failed to delete item: {0}")]
    DeleteFailed(String),

    #[error("Stored item is not valid: {0}")]
    Corrupted(String),
}

/// Errors from the authenticated API call.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("No access token, authorize first")]
    NoAccessToken,

    #[error("Couldn't get graph result: {0}")]
    RequestFailed(String),

    #[error("Couldn't deserialize result JSON: {0}")]
    DecodeFailed(String),
}

impl AppError {
    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Config(_) => "Unable to create application context. Check the B2C settings.",
            Self::Auth(AuthError::InteractionRequired(_)) => "Please sign in again.",
            Self::Auth(AuthError::OAuthFailed(_)) => "Sign-in failed. Please try again.",
            Self::Auth(AuthError::TokenRefreshFailed(_)) => {
                "Session expired. Please sign in again."
            }
            Self::Auth(AuthError::StateValidationFailed) => {
                "Security error. Please try signing in again."
            }
            Self::Auth(AuthError::CallbackTimeout) => "Sign-in timed out. Please try again.",
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.",
            Self::Auth(AuthError::BrowserLaunchFailed(_)) => "Could not open the browser.",
            Self::Keychain(KeychainError::StoreFailed(_)) => "Failed to save account securely.",
            Self::Network(NetworkError::NoAccessToken) => "Authorize before calling the API.",
            Self::Network(_) => "Network error. Check your connection.",
            _ => "An error occurred. Please try again.",
        }
    }
}
