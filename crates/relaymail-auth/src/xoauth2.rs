//! XOAUTH2 SASL mechanism for SMTP
//!
//! Implements the XOAUTH2 authentication mechanism as specified at:
//! https://developers.google.com/workspace/gmail/imap/xoauth2-protocol

use base64::prelude::*;

/// Build the raw XOAUTH2 initial client response
///
/// Format: "user={email}\x01auth=Bearer {token}\x01\x01"
pub fn xoauth2_auth_string(username: &str, access_token: &str) -> String {
    format!("user={}\x01auth=Bearer {}\x01\x01", username, access_token)
}

/// Build the base64-encoded XOAUTH2 initial client response
///
/// This is the argument of `AUTH XOAUTH2` sent to the SMTP server.
/// Standard alphabet, padded.
pub fn encode_xoauth2(username: &str, access_token: &str) -> String {
    BASE64_STANDARD.encode(xoauth2_auth_string(username, access_token))
}
