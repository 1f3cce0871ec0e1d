//! Error types for the core module

use relaymail_auth::AuthError;
use relaymail_smtp::SmtpError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for send operations
pub type SendResult<T> = Result<T, SendError>;

/// Errors surfaced by [`crate::Sender`]
#[derive(Debug, Error)]
pub enum SendError {
    /// `send` called before credentials were loaded
    #[error("Sender is not initialized: call init before send")]
    NotInitialized,

    /// Refresh-token exchange failed
    #[error("Failed to fetch access token: {message}")]
    TokenExchange {
        /// HTTP status from the token endpoint, if one was received
        status: Option<u16>,
        message: String,
    },

    /// STARTTLS refused, handshake failed, or encryption required but unavailable
    #[error("TLS error: {0}")]
    Tls(String),

    /// SMTP server doesn't advertise AUTH
    #[error("SMTP server doesn't support AUTH")]
    AuthNotSupported,

    /// AUTH XOAUTH2 was refused
    #[error("Failed to authenticate to SMTP server with XOAUTH2: {0}")]
    Authentication(String),

    /// A recipient was refused (by the server, or as a malformed address)
    #[error("Recipient {address} rejected: {reason}")]
    RecipientRejected { address: String, reason: String },

    /// DATA refused, interrupted, or the message was not accepted
    #[error("Data transfer failed: {0}")]
    DataTransfer(String),

    /// Attachment could not be read
    #[error("Failed to read attachment {}: {}", .path.display(), .source)]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A remote party did not answer in time
    #[error("Operation timed out")]
    Timeout,

    /// Unexpected SMTP reply
    #[error("SMTP protocol error: {0}")]
    Protocol(String),

    /// TCP connection could not be opened or was lost
    #[error("SMTP connection error: {0}")]
    Connection(String),

    /// Invalid configuration or credentials file
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SendError {
    /// Map a failed token exchange
    pub(crate) fn token_exchange(e: AuthError) -> Self {
        match e {
            AuthError::Timeout => SendError::Timeout,
            other => SendError::TokenExchange {
                status: other.http_status(),
                message: other.to_string(),
            },
        }
    }
}

impl From<SmtpError> for SendError {
    fn from(e: SmtpError) -> Self {
        match e {
            SmtpError::TlsError(msg) => SendError::Tls(msg),
            SmtpError::AuthNotSupported => SendError::AuthNotSupported,
            SmtpError::AuthenticationFailed { message, .. } => SendError::Authentication(message),
            SmtpError::RecipientRejected {
                address,
                code,
                message,
            } => SendError::RecipientRejected {
                address,
                reason: format!("{} {}", code, message),
            },
            SmtpError::DataTransfer(msg) => SendError::DataTransfer(msg),
            SmtpError::Timeout => SendError::Timeout,
            SmtpError::Protocol(msg) => SendError::Protocol(msg),
            e @ SmtpError::UnexpectedReply { .. } => SendError::Protocol(e.to_string()),
            e @ (SmtpError::ConnectionFailed(_)
            | SmtpError::ConnectionClosed
            | SmtpError::NotConnected
            | SmtpError::IoError(_)) => SendError::Connection(e.to_string()),
        }
    }
}
