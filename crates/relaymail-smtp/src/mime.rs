//! multipart/mixed message composition
//!
//! Builds the complete wire payload handed to DATA: headers, a plain-text
//! preview for non-MIME readers, the text/plain body part and one base64
//! part per attachment. See https://en.wikipedia.org/wiki/MIME

use base64::prelude::*;

const CRLF: &str = "\r\n";

/// Boundary used unless the composer is given another one
pub const DEFAULT_BOUNDARY: &str = "relaymail-part-boundary-6b9f2e41";

/// Base64 payload line width (RFC 2045)
const BASE64_LINE_LEN: usize = 76;

/// Bytes of UTF-8 that fit in one 75-character RFC 2047 encoded word
const ENCODED_WORD_CHUNK: usize = 45;

/// A file attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name shown to the recipient (no directories)
    filename: String,
    /// File contents, base64 encoded
    content_base64: String,
}

impl Attachment {
    /// Create an attachment from already encoded content
    pub fn new(filename: impl Into<String>, content_base64: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            content_base64: content_base64.into(),
        }
    }

    /// Create an attachment from raw file bytes
    pub fn from_bytes(filename: impl Into<String>, data: &[u8]) -> Self {
        Self::new(filename, BASE64_STANDARD.encode(data))
    }

    /// Get the file name shown to recipients
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Get the base64-encoded content
    pub fn content_base64(&self) -> &str {
        &self.content_base64
    }
}

/// Composes multipart/mixed messages for a single sender
#[derive(Debug, Clone)]
pub struct MimeComposer {
    from: String,
    from_name: Option<String>,
    boundary: String,
}

impl MimeComposer {
    /// Create a composer for messages sent by `from`
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            from_name: None,
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }

    /// Set the From display name
    pub fn from_name(mut self, name: impl Into<String>) -> Self {
        self.from_name = Some(name.into());
        self
    }

    /// Use a different part boundary
    ///
    /// The boundary is emitted unquoted, so it must be a MIME token.
    pub fn with_boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = boundary.into();
        self
    }

    /// Get the part boundary
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Build the full message, ending with the SMTP end-of-data line
    ///
    /// The first recipient goes in To, the rest in Cc. Both headers are
    /// left out when there are no recipients.
    pub fn compose<B, R>(
        &self,
        subject: &str,
        body_lines: &[B],
        attachments: &[Attachment],
        recipients: &[R],
    ) -> Vec<u8>
    where
        B: AsRef<str>,
        R: AsRef<str>,
    {
        let body: String = body_lines
            .iter()
            .map(|line| format!("{}{}", line.as_ref(), CRLF))
            .collect();
        let boundary = &self.boundary;

        let mut msg = String::with_capacity(
            body.len() * 2
                + attachments
                    .iter()
                    .map(|a| a.content_base64.len() + 256)
                    .sum::<usize>()
                + 512,
        );

        // Headers
        match &self.from_name {
            Some(name) => msg.push_str(&format!(
                "From: \"{}\" <{}>{}",
                quote(name),
                self.from,
                CRLF
            )),
            None => msg.push_str(&format!("From: <{}>{}", self.from, CRLF)),
        }
        msg.push_str(&format!("Subject: {}{}", encode_subject(subject), CRLF));
        if let Some((first, rest)) = recipients.split_first() {
            msg.push_str(&format!("To: <{}>{}", first.as_ref(), CRLF));
            if !rest.is_empty() {
                let cc: Vec<&str> = rest.iter().map(AsRef::as_ref).collect();
                msg.push_str(&format!("Cc: {}{}", cc.join(", "), CRLF));
            }
        }
        msg.push_str(&format!("MIME-Version: 1.0{}", CRLF));
        msg.push_str(&format!(
            "Content-Type: multipart/mixed; boundary={}{}{}",
            boundary, CRLF, CRLF
        ));

        // Preview for readers that don't understand MIME
        msg.push_str(&format!("{}{}", body, CRLF));

        // Body part
        msg.push_str(&format!("--{}{}", boundary, CRLF));
        msg.push_str(&format!("Content-Type: text/plain{}{}", CRLF, CRLF));
        msg.push_str(&format!("{}{}", body, CRLF));

        for attachment in attachments {
            msg.push_str(&format!("--{}{}", boundary, CRLF));
            msg.push_str(&format!(
                "Content-Type: application/octet-stream; name=\"{}\"{}",
                quote(&attachment.filename),
                CRLF
            ));
            msg.push_str(&format!("Content-Transfer-Encoding: base64{}{}", CRLF, CRLF));
            fold_base64(&attachment.content_base64, &mut msg);
            msg.push_str(CRLF);
        }

        msg.push_str(&format!("--{}--{}", boundary, CRLF));
        msg.push_str(&format!(".{}", CRLF));

        msg.into_bytes()
    }
}

/// Write base64 text as CRLF-terminated lines of at most 76 characters
fn fold_base64(data: &str, out: &mut String) {
    if data.is_empty() {
        out.push_str(CRLF);
        return;
    }

    let mut rest = data;
    while !rest.is_empty() {
        let mut split = rest.len().min(BASE64_LINE_LEN);
        while !rest.is_char_boundary(split) {
            split += 1;
        }
        let (line, tail) = rest.split_at(split);
        out.push_str(line);
        out.push_str(CRLF);
        rest = tail;
    }
}

/// Escape a value for use inside a quoted-string
fn quote(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .flat_map(|c| match c {
            '"' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect()
}

/// Subject header value: plain ASCII as-is, anything else as RFC 2047 words
fn encode_subject(subject: &str) -> String {
    let subject = subject.replace(['\r', '\n'], " ");
    if subject.is_ascii() {
        return subject;
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in subject.chars() {
        if chunk.len() + c.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }

    words.join("\r\n ")
}

fn encoded_word(text: &str) -> String {
    format!("=?UTF-8?B?{}?=", BASE64_STANDARD.encode(text))
}
