//! Core send logic for RelayMail
//!
//! Ties the pieces together: OAuth2 token, XOAUTH2 string, attachments,
//! MIME message and SMTP delivery, behind a small `init` / `send` API.

mod attachments;
mod config;
mod error;
mod sender;

pub use attachments::load_attachments;
pub use config::SenderConfig;
pub use error::{SendError, SendResult};
pub use sender::Sender;

pub use relaymail_auth::Credentials;
pub use relaymail_smtp::{Attachment, TlsUpgrader};
