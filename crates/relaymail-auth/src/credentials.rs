//! OAuth2 client credentials

use crate::{AuthError, AuthResult};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// OAuth2 client credentials plus the long-lived refresh token
///
/// Loaded once and only read afterwards.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// OAuth2 client ID
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
    /// Refresh token granted to this client
    pub refresh_token: String,
}

impl Credentials {
    /// Create credentials from their parts
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Parse credentials from a JSON document
    ///
    /// Expects the keys `client_id`, `client_secret` and `refresh_token`.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Load credentials from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref();
        debug!("Loading OAuth2 credentials from {}", path.display());

        let data = tokio::fs::read(path).await?;
        Self::from_json(&data).map_err(|e| AuthError::InvalidCredentials {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}
