//! SMTP replies and EHLO capabilities

use crate::{SmtpError, SmtpResult};
use std::collections::HashMap;
use std::fmt;

/// A complete (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// Three-digit reply code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Text of every line, without code and separator
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// All lines joined with newlines
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx reply
    pub fn is_positive_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message())
    }
}

/// Parse one reply line into (code, is_last_line, text)
///
/// Lines look like "250-SIZE 35882577" (more to follow) or "250 OK" (last).
pub(crate) fn parse_line(line: &str) -> SmtpResult<(u16, bool, String)> {
    let line = line.trim_end_matches(['\r', '\n']);
    let bytes = line.as_bytes();

    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return Err(SmtpError::Protocol(format!("Malformed reply line: {:?}", line)));
    }

    let code: u16 = line[..3]
        .parse()
        .map_err(|_| SmtpError::Protocol(format!("Malformed reply code: {:?}", line)))?;

    match bytes.get(3) {
        None => Ok((code, true, String::new())),
        Some(b' ') => Ok((code, true, line[4..].to_string())),
        Some(b'-') => Ok((code, false, line[4..].to_string())),
        Some(_) => Err(SmtpError::Protocol(format!("Malformed reply line: {:?}", line))),
    }
}

/// Service extensions advertised in an EHLO reply
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    extensions: HashMap<String, Vec<String>>,
}

impl Capabilities {
    /// Parse the EHLO reply; the first line is the server greeting and is skipped
    pub fn from_ehlo(reply: &Reply) -> Self {
        let extensions = reply
            .lines()
            .iter()
            .skip(1)
            .filter_map(|line| {
                let mut words = line.split_whitespace();
                let keyword = words.next()?.to_ascii_uppercase();
                Some((keyword, words.map(str::to_string).collect()))
            })
            .collect();

        Self { extensions }
    }

    /// Whether the server advertised `keyword` (case-insensitive)
    pub fn supports(&self, keyword: &str) -> bool {
        self.extensions.contains_key(&keyword.to_ascii_uppercase())
    }

    /// Parameters following an extension keyword, e.g. the mechanisms of AUTH
    pub fn params(&self, keyword: &str) -> Option<&[String]> {
        self.extensions
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
    }
}
