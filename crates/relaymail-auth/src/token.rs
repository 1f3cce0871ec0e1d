//! OAuth2 refresh-token exchange
//!
//! Trades the long-lived refresh token for a short-lived bearer access token.
//! Only the `refresh_token` grant is supported, and the request body is JSON.

use crate::{AuthError, AuthResult, Credentials};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Short-lived OAuth2 bearer token, valid for a single send
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a bearer token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw bearer token
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

#[derive(Serialize)]
struct RefreshTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Performs the refresh-token grant against a token endpoint
#[derive(Debug, Clone)]
pub struct TokenExchanger {
    client: reqwest::Client,
    token_url: Url,
}

impl TokenExchanger {
    /// Create an exchanger for the given endpoint
    ///
    /// `timeout` bounds the whole HTTP request, connect included.
    pub fn new(token_url: Url, timeout: Duration) -> AuthResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(Self { client, token_url })
    }

    /// The token endpoint this exchanger talks to
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Exchange the refresh token for a fresh access token
    ///
    /// No retries; every call performs a new exchange.
    pub async fn fetch_access_token(&self, creds: &Credentials) -> AuthResult<AccessToken> {
        info!("Requesting OAuth2 access token from {}", self.token_url);

        let request = RefreshTokenRequest {
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
            refresh_token: &creds.refresh_token,
            grant_type: "refresh_token",
        };

        let response = self
            .client
            .post(self.token_url.clone())
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenEndpointStatus { status, body });
        }

        let body = response.bytes().await?;
        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| AuthError::MalformedTokenResponse {
                status,
                reason: e.to_string(),
            })?;

        match parsed.access_token {
            Some(token) if !token.is_empty() => {
                debug!("Token endpoint returned a {} character access token", token.len());
                Ok(AccessToken(token))
            }
            _ => Err(AuthError::MalformedTokenResponse {
                status,
                reason: "response has no access_token".to_string(),
            }),
        }
    }
}
