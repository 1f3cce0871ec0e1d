//! SMTP session driven over a raw connection
//!
//! Walks one connection through greeting, optional STARTTLS, XOAUTH2
//! authentication, envelope, DATA and QUIT. Each step checks the session
//! state so commands cannot be issued out of order.

use crate::reply::{self, Capabilities, Reply};
use crate::stream::{BoxedStream, TlsUpgrader};
use crate::{SmtpError, SmtpResult};
use base64::prelude::*;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Longest reply line accepted, CRLF included
const MAX_REPLY_LINE_LEN: usize = 1000;
/// Most lines accepted in one multi-line reply
const MAX_REPLY_LINES: usize = 128;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connection open, banner not read yet
    Connected,
    /// Banner read and EHLO (or HELO) accepted
    Greeted,
    /// STARTTLS completed and EHLO re-issued
    TlsNegotiated,
    /// Server did not offer STARTTLS
    PlainText,
    /// AUTH XOAUTH2 accepted
    Authenticated,
    /// MAIL and every RCPT accepted
    EnvelopeSet,
    /// Message accepted for delivery
    DataSent,
    /// Connection released
    Closed,
}

/// Run an IO future under the session timeout
async fn timed<T>(
    timeout: Duration,
    fut: impl Future<Output = std::io::Result<T>>,
) -> SmtpResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(SmtpError::from),
        Err(_) => Err(SmtpError::Timeout),
    }
}

/// One SMTP connection, exclusively owned for its lifetime
pub struct SmtpSession {
    stream: Option<BufReader<BoxedStream>>,
    state: SessionState,
    capabilities: Capabilities,
    timeout: Duration,
}

impl SmtpSession {
    /// Open a TCP connection to `host:port`
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> SmtpResult<Self> {
        info!("Connecting to {}:{}", host, port);

        let connect = TcpStream::connect((host, port));
        let tcp_stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SmtpError::ConnectionFailed(format!(
                    "{}:{}: {}",
                    host, port, e
                )))
            }
            Err(_) => return Err(SmtpError::Timeout),
        };

        Ok(Self::from_stream(Box::new(tcp_stream), timeout))
    }

    /// Run a session over an already established connection
    pub fn from_stream(stream: BoxedStream, timeout: Duration) -> Self {
        Self {
            stream: Some(BufReader::new(stream)),
            state: SessionState::Connected,
            capabilities: Capabilities::default(),
            timeout,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Extensions from the most recent EHLO
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn require_state(&self, allowed: &[SessionState], operation: &str) -> SmtpResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SmtpError::Protocol(format!(
                "{} is not allowed in state {:?}",
                operation, self.state
            )))
        }
    }

    async fn write_raw(&mut self, data: &[u8]) -> SmtpResult<()> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(SmtpError::NotConnected)?.get_mut();
        timed(timeout, async {
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
    }

    async fn read_reply(&mut self) -> SmtpResult<Reply> {
        let timeout = self.timeout;
        let stream = self.stream.as_mut().ok_or(SmtpError::NotConnected)?;

        match tokio::time::timeout(timeout, read_reply_from(stream)).await {
            Ok(result) => result,
            Err(_) => Err(SmtpError::Timeout),
        }
    }

    async fn send_command(&mut self, line: &str, logged_as: &str) -> SmtpResult<Reply> {
        debug!("C: {}", logged_as);
        self.write_raw(format!("{}\r\n", line).as_bytes()).await?;
        self.read_reply().await
    }

    /// Send an arbitrary command line and return the server's reply
    ///
    /// Low-level escape hatch for commands the session has no method for.
    pub async fn command(&mut self, line: &str) -> SmtpResult<Reply> {
        self.send_command(line, line).await
    }

    /// Send a command and require the reply to carry `expected_code`
    pub async fn command_expect(&mut self, line: &str, expected_code: u16) -> SmtpResult<Reply> {
        let reply = self.command(line).await?;
        expect_code(line, reply, expected_code)
    }

    /// Read the server banner and introduce ourselves as `identity`
    ///
    /// Falls back to HELO when EHLO is refused; no extensions are known then.
    pub async fn greet(&mut self, identity: &str) -> SmtpResult<()> {
        self.require_state(&[SessionState::Connected], "greeting")?;

        let banner = self.read_reply().await?;
        expect_code("connection greeting", banner, 220)?;

        let ehlo = format!("EHLO {}", identity);
        let reply = self.command(&ehlo).await?;
        self.capabilities = if reply.code() == 250 {
            Capabilities::from_ehlo(&reply)
        } else {
            debug!("EHLO refused ({}), falling back to HELO", reply);
            self.command_expect(&format!("HELO {}", identity), 250).await?;
            Capabilities::default()
        };

        self.state = SessionState::Greeted;
        Ok(())
    }

    /// Upgrade to TLS if the server offers STARTTLS
    ///
    /// Returns whether the connection is now encrypted. Without STARTTLS the
    /// session carries on in plain text.
    pub async fn starttls(
        &mut self,
        upgrader: &dyn TlsUpgrader,
        server_name: &str,
        identity: &str,
    ) -> SmtpResult<bool> {
        self.require_state(&[SessionState::Greeted], "STARTTLS")?;

        if !self.capabilities.supports("STARTTLS") {
            debug!("Server does not offer STARTTLS, staying in plain text");
            self.state = SessionState::PlainText;
            return Ok(false);
        }

        let reply = self.command("STARTTLS").await?;
        if reply.code() != 220 {
            return Err(SmtpError::TlsError(format!("STARTTLS refused: {}", reply)));
        }

        let reader = self.stream.take().ok_or(SmtpError::NotConnected)?;
        self.state = SessionState::Closed;
        if !reader.buffer().is_empty() {
            return Err(SmtpError::Protocol(
                "Server sent data after accepting STARTTLS".to_string(),
            ));
        }

        let tls_stream = upgrader.upgrade(server_name, reader.into_inner()).await?;
        self.stream = Some(BufReader::new(tls_stream));

        let ehlo = format!("EHLO {}", identity);
        let reply = self.command_expect(&ehlo, 250).await?;
        self.capabilities = Capabilities::from_ehlo(&reply);

        info!("STARTTLS negotiated with {}", server_name);
        self.state = SessionState::TlsNegotiated;
        Ok(true)
    }

    /// Authenticate with `AUTH XOAUTH2 <encoded>`
    ///
    /// `encoded` is the base64 XOAUTH2 initial response. A 334 challenge
    /// means the token was refused; it is answered with an empty line and its
    /// decoded text reported.
    pub async fn authenticate_xoauth2(&mut self, encoded: &str) -> SmtpResult<()> {
        self.require_state(
            &[SessionState::TlsNegotiated, SessionState::PlainText],
            "AUTH",
        )?;

        if !self.capabilities.supports("AUTH") {
            return Err(SmtpError::AuthNotSupported);
        }

        let reply = self
            .send_command(&format!("AUTH XOAUTH2 {}", encoded), "AUTH XOAUTH2 <redacted>")
            .await
            .map_err(auth_failure)?;

        match reply.code() {
            235 => {
                info!("XOAUTH2 authentication successful");
                self.state = SessionState::Authenticated;
                Ok(())
            }
            334 => {
                let challenge = BASE64_STANDARD
                    .decode(reply.message().trim())
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_else(|_| reply.message());

                let final_reply = self
                    .send_command("", "<empty response>")
                    .await
                    .map_err(auth_failure)?;
                Err(SmtpError::AuthenticationFailed {
                    code: Some(final_reply.code()),
                    message: format!("{} ({})", final_reply, challenge),
                })
            }
            code => Err(SmtpError::AuthenticationFailed {
                code: Some(code),
                message: reply.to_string(),
            }),
        }
    }

    /// Send MAIL FROM and one RCPT TO per recipient, in order
    ///
    /// Stops at the first refused recipient.
    pub async fn envelope<R: AsRef<str>>(
        &mut self,
        from: &str,
        recipients: &[R],
    ) -> SmtpResult<()> {
        self.require_state(&[SessionState::Authenticated], "MAIL")?;

        let mail = format!("MAIL FROM:<{}>", from);
        self.command_expect(&mail, 250).await?;

        for recipient in recipients {
            let address = recipient.as_ref();
            let reply = self.command(&format!("RCPT TO:<{}>", address)).await?;
            if !matches!(reply.code(), 250 | 251) {
                return Err(SmtpError::RecipientRejected {
                    address: address.to_string(),
                    code: reply.code(),
                    message: reply.message(),
                });
            }
        }

        self.state = SessionState::EnvelopeSet;
        Ok(())
    }

    /// Transfer the message with DATA
    ///
    /// Lines starting with '.' are dot-stuffed. A trailing "." line already
    /// present in `message` is taken as the end-of-data marker.
    pub async fn data(&mut self, message: &[u8]) -> SmtpResult<()> {
        self.require_state(&[SessionState::EnvelopeSet], "DATA")?;

        let reply = self.command("DATA").await.map_err(data_failure)?;
        if reply.code() != 354 {
            return Err(SmtpError::DataTransfer(format!("DATA refused: {}", reply)));
        }

        debug!("C: <{} bytes of message data>", message.len());
        self.write_raw(&prepare_data(message)).await.map_err(data_failure)?;

        let reply = self.read_reply().await.map_err(data_failure)?;
        if reply.code() != 250 {
            return Err(SmtpError::DataTransfer(format!("Message not accepted: {}", reply)));
        }

        info!("Message accepted: {}", reply);
        self.state = SessionState::DataSent;
        Ok(())
    }

    /// End the session with QUIT and release the connection
    ///
    /// The connection is released even when QUIT fails.
    pub async fn quit(&mut self) -> SmtpResult<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }

        let result = self.command_expect("QUIT", 221).await.map(|_| ());
        self.close().await;
        result
    }

    /// Release the connection without QUIT
    pub async fn close(&mut self) {
        if let Some(mut reader) = self.stream.take() {
            if let Err(e) = timed(self.timeout, reader.get_mut().shutdown()).await {
                warn!("Error shutting down SMTP connection: {}", e);
            }
        }
        self.state = SessionState::Closed;
    }
}

/// Read one complete, possibly multi-line, reply
async fn read_reply_from(stream: &mut BufReader<BoxedStream>) -> SmtpResult<Reply> {
    let mut code = 0;
    let mut lines = Vec::new();
    loop {
        if lines.len() == MAX_REPLY_LINES {
            return Err(SmtpError::Protocol(format!(
                "Reply has more than {} lines",
                MAX_REPLY_LINES
            )));
        }

        let mut buf = Vec::new();
        let n = (&mut *stream)
            .take(MAX_REPLY_LINE_LEN as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if n == 0 {
            return Err(SmtpError::ConnectionClosed);
        }
        if buf.len() > MAX_REPLY_LINE_LEN {
            return Err(SmtpError::Protocol(format!(
                "Reply line longer than {} bytes",
                MAX_REPLY_LINE_LEN
            )));
        }

        let line = String::from_utf8_lossy(&buf);
        debug!("S: {}", line.trim_end());

        let (line_code, last, text) = reply::parse_line(&line)?;
        if lines.is_empty() {
            code = line_code;
        } else if line_code != code {
            return Err(SmtpError::Protocol(format!(
                "Reply code changed from {} to {} mid-reply",
                code, line_code
            )));
        }
        lines.push(text);

        if last {
            return Ok(Reply::new(code, lines));
        }
    }
}

fn expect_code(command: &str, reply: Reply, expected_code: u16) -> SmtpResult<Reply> {
    if reply.code() == expected_code {
        Ok(reply)
    } else {
        Err(SmtpError::UnexpectedReply {
            command: command.to_string(),
            code: reply.code(),
            message: reply.message(),
        })
    }
}

fn auth_failure(e: SmtpError) -> SmtpError {
    match e {
        SmtpError::Timeout => SmtpError::Timeout,
        other => SmtpError::AuthenticationFailed {
            code: None,
            message: other.to_string(),
        },
    }
}

fn data_failure(e: SmtpError) -> SmtpError {
    match e {
        SmtpError::Timeout | SmtpError::DataTransfer(_) => e,
        other => SmtpError::DataTransfer(other.to_string()),
    }
}

/// Dot-stuff a message and terminate it with a single "." line
fn prepare_data(message: &[u8]) -> Vec<u8> {
    let body = match message.strip_suffix(b"\r\n.\r\n") {
        Some(rest) => &message[..rest.len() + 2],
        None if message == b".\r\n" => &[][..],
        None => message,
    };

    let mut out = Vec::with_capacity(body.len() + body.len() / 64 + 5);
    let mut at_line_start = true;
    for &byte in body {
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
