//! Error types for SMTP operations

use thiserror::Error;

/// Result type for SMTP operations
pub type SmtpResult<T> = Result<T, SmtpError>;

/// Errors that can occur during SMTP operations
#[derive(Debug, Error)]
pub enum SmtpError {
    /// Connection failed
    #[error("Failed to connect to SMTP server: {0}")]
    ConnectionFailed(String),

    /// Server closed the connection in the middle of a reply
    #[error("SMTP server closed the connection")]
    ConnectionClosed,

    /// Session has no connection left
    #[error("SMTP session is not connected")]
    NotConnected,

    /// Reply that could not be parsed, or a command issued out of sequence
    #[error("SMTP protocol error: {0}")]
    Protocol(String),

    /// Server answered a command with an unexpected code
    #[error("Unexpected reply to {command}: {code} {message}")]
    UnexpectedReply {
        command: String,
        code: u16,
        message: String,
    },

    /// TLS error
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Server does not advertise AUTH
    #[error("SMTP server does not support AUTH")]
    AuthNotSupported,

    /// Authentication failed
    #[error("SMTP authentication failed: {message}")]
    AuthenticationFailed { code: Option<u16>, message: String },

    /// Server refused a recipient
    #[error("Recipient {address} rejected: {code} {message}")]
    RecipientRejected {
        address: String,
        code: u16,
        message: String,
    },

    /// Failure while handing the message over with DATA
    #[error("Failed to transfer message data: {0}")]
    DataTransfer(String),

    /// Server did not answer in time
    #[error("Operation timed out")]
    Timeout,

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
