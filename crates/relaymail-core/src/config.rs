//! Sender configuration

use relaymail_auth::gmail;
use serde::Deserialize;
use std::time::Duration;

/// Where and how messages are sent
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// SMTP relay hostname
    pub smtp_host: String,
    /// SMTP relay port (submission, upgraded with STARTTLS)
    pub smtp_port: u16,
    /// Name checked against the server certificate; defaults to `smtp_host`
    pub tls_server_name: Option<String>,
    /// OAuth2 token endpoint
    pub token_url: String,
    /// Name announced in EHLO/HELO
    pub client_identity: String,
    /// Display name for the From header
    pub from_name: Option<String>,
    /// Bound on the token request and on every SMTP round-trip, in seconds
    pub timeout_secs: u64,
    /// Refuse to authenticate when the server does not offer STARTTLS
    pub require_tls: bool,
}

impl SenderConfig {
    /// Gmail configuration
    pub fn gmail() -> Self {
        Self {
            smtp_host: gmail::SMTP_HOST.to_string(),
            smtp_port: gmail::SMTP_PORT,
            tls_server_name: None,
            token_url: gmail::TOKEN_URL.to_string(),
            client_identity: "localhost".to_string(),
            from_name: None,
            timeout_secs: 30,
            require_tls: false,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tls_server_name(&self) -> &str {
        self.tls_server_name.as_deref().unwrap_or(&self.smtp_host)
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self::gmail()
    }
}
