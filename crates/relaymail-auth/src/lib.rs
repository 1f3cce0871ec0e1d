//! Authentication module for RelayMail
//!
//! Provides everything needed to authenticate an SMTP session with OAuth2:
//! 1. Loading the client credentials and refresh token
//! 2. Exchanging the refresh token for a short-lived access token
//! 3. Encoding the access token as an XOAUTH2 SASL response

mod credentials;
mod error;
mod token;
mod xoauth2;

pub use credentials::Credentials;
pub use error::{AuthError, AuthResult};
pub use token::{AccessToken, TokenExchanger};
pub use xoauth2::{encode_xoauth2, xoauth2_auth_string};

/// Gmail OAuth2 and SMTP endpoints
pub mod gmail {
    /// OAuth2 token endpoint
    pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

    /// Gmail SMTP submission server
    pub const SMTP_HOST: &str = "smtp.gmail.com";
    pub const SMTP_PORT: u16 = 587;
}
