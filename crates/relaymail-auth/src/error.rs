//! Error types for the auth module

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors that can occur during authentication
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token endpoint answered with a non-2xx status
    #[error("Token exchange failed with HTTP status {status}: {body}")]
    TokenEndpointStatus { status: u16, body: String },

    /// Token endpoint answered 2xx but the body had no usable access token
    #[error("Token exchange failed (HTTP status {status}): {reason}")]
    MalformedTokenResponse { status: u16, reason: String },

    /// Network error while talking to the token endpoint
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Token endpoint did not answer in time
    #[error("Token exchange timed out")]
    Timeout,

    /// Credentials file could not be parsed
    #[error("Invalid credentials file {path}: {reason}")]
    InvalidCredentials { path: String, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AuthError {
    /// HTTP status returned by the token endpoint, when one was received
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AuthError::TokenEndpointStatus { status, .. }
            | AuthError::MalformedTokenResponse { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AuthError::Timeout
        } else {
            AuthError::NetworkError(e.to_string())
        }
    }
}
