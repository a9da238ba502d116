//! Authenticated call to the Microsoft Graph `/me` endpoint.

use crate::error::NetworkError;
use crate::keychain::secure::SecureString;
use tracing::debug;

/// Raw response from the authenticated endpoint.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    /// Decoded JSON body, reported verbatim.
    pub body: serde_json::Value,
}

/// Issues a single bearer-authenticated GET.
pub struct GraphClient {
    http_client: reqwest::Client,
    endpoint: String,
}

impl GraphClient {
    /// Create a new Graph client for the `/me` resource under `base`.
    ///
    /// No timeout or retry policy beyond the HTTP client defaults.
    pub fn new(base: &str) -> Self {
        Self::with_http_client(base, reqwest::Client::new())
    }

    pub fn with_http_client(base: &str, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            endpoint: graph_endpoint(base),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// GET the endpoint with `Authorization: Bearer <token>`.
    pub async fn get_me(&self, access_token: &SecureString) -> Result<GraphResponse, NetworkError> {
        if access_token.is_empty() {
            return Err(NetworkError::NoAccessToken);
        }

        let response = self
            .http_client
            .get(&self.endpoint)
            .bearer_auth(access_token.as_str())
            .send()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        let status = response.status().as_u16();
        debug!("Graph responded with HTTP {}", status);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| NetworkError::RequestFailed(e.to_string()))?;

        let body = serde_json::from_slice(&bytes)
            .map_err(|e| NetworkError::DecodeFailed(e.to_string()))?;

        Ok(GraphResponse { status, body })
    }
}

/// `<base>/v1.0/me/`, with or without a trailing slash on `base`.
pub fn graph_endpoint(base: &str) -> String {
    if base.ends_with('/') {
        format!("{}v1.0/me/", base)
    } else {
        format!("{}/v1.0/me/", base)
    }
}
