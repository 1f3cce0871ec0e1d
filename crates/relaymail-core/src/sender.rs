//! Send orchestration
//!
//! One `send` runs strictly in sequence: fresh access token, XOAUTH2
//! string, attachments, message, then a single SMTP session which is
//! always closed before returning.

use crate::attachments::load_attachments;
use crate::{SendError, SendResult, SenderConfig};
use lettre::Address;
use relaymail_auth::{encode_xoauth2, Credentials, TokenExchanger};
use relaymail_smtp::{MimeComposer, RustlsUpgrader, SmtpSession, TlsUpgrader};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

/// Sender address and credentials, fixed by the first successful init
#[derive(Debug)]
struct Identity {
    from_address: String,
    credentials: Credentials,
}

/// Sends mail through an OAuth2-authenticated SMTP relay
///
/// Concurrent sends share only the read-only identity; each opens its own
/// connection and fetches its own token.
pub struct Sender {
    config: SenderConfig,
    exchanger: TokenExchanger,
    upgrader: Arc<dyn TlsUpgrader>,
    identity: OnceCell<Identity>,
}

impl Sender {
    /// Create an uninitialized sender
    pub fn new(config: SenderConfig) -> SendResult<Self> {
        if config.timeout_secs == 0 {
            return Err(SendError::Config(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        let token_url = Url::parse(&config.token_url)
            .map_err(|e| SendError::Config(format!("token_url {}: {}", config.token_url, e)))?;
        let exchanger = TokenExchanger::new(token_url, config.timeout())
            .map_err(|e| SendError::Config(e.to_string()))?;
        let upgrader = RustlsUpgrader::new().map_err(|e| SendError::Config(e.to_string()))?;

        Ok(Self {
            config,
            exchanger,
            upgrader: Arc::new(upgrader),
            identity: OnceCell::new(),
        })
    }

    /// Use a different STARTTLS implementation
    pub fn with_tls_upgrader(mut self, upgrader: Arc<dyn TlsUpgrader>) -> Self {
        self.upgrader = upgrader;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    /// Set the sender address and load credentials from a JSON file
    ///
    /// Only the first successful call has an effect; later calls return
    /// `Ok(())` without touching the file.
    pub async fn init(
        &self,
        from_address: &str,
        credentials_path: impl AsRef<Path>,
    ) -> SendResult<()> {
        let path = credentials_path.as_ref();
        self.identity
            .get_or_try_init(|| async {
                let from_address = parse_from_address(from_address)?;
                let credentials = Credentials::load(path).await.map_err(|e| {
                    SendError::Config(format!("credentials {}: {}", path.display(), e))
                })?;
                info!("Sender initialized for {}", from_address);
                Ok::<_, SendError>(Identity {
                    from_address,
                    credentials,
                })
            })
            .await?;
        Ok(())
    }

    /// Set the sender address and credentials directly
    ///
    /// Same contract as [`Sender::init`]: a no-op once initialized.
    pub fn init_with_credentials(
        &self,
        from_address: &str,
        credentials: Credentials,
    ) -> SendResult<()> {
        if self.identity.initialized() {
            return Ok(());
        }

        let from_address = parse_from_address(from_address)?;
        if self
            .identity
            .set(Identity {
                from_address,
                credentials,
            })
            .is_err()
        {
            debug!("Sender already initialized, keeping the existing identity");
        }
        Ok(())
    }

    /// Whether `init` has succeeded
    pub fn is_initialized(&self) -> bool {
        self.identity.initialized()
    }

    /// Send a message to `recipients` with the given files attached
    ///
    /// The first recipient goes in To, the others in Cc; all of them receive
    /// the message. Any failure aborts the whole send.
    pub async fn send<B, P, R>(
        &self,
        subject: &str,
        body_lines: &[B],
        attachment_paths: &[P],
        recipients: &[R],
    ) -> SendResult<()>
    where
        B: AsRef<str>,
        P: AsRef<Path>,
        R: AsRef<str>,
    {
        let identity = self.identity.get().ok_or(SendError::NotInitialized)?;

        for recipient in recipients {
            let address = recipient.as_ref();
            address
                .parse::<Address>()
                .map_err(|e| SendError::RecipientRejected {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;
        }

        let access_token = self
            .exchanger
            .fetch_access_token(&identity.credentials)
            .await
            .map_err(SendError::token_exchange)?;

        let sasl = encode_xoauth2(&identity.from_address, access_token.secret());

        let attachments = load_attachments(attachment_paths).await?;

        let mut composer = MimeComposer::new(identity.from_address.as_str());
        if let Some(name) = &self.config.from_name {
            composer = composer.from_name(name.as_str());
        }
        let message = composer.compose(subject, body_lines, &attachments, recipients);
        debug!(
            "Composed message: {} bytes, {} attachment(s)",
            message.len(),
            attachments.len()
        );

        self.deliver(&identity.from_address, &sasl, &message, recipients)
            .await?;

        info!("Sent \"{}\" to {} recipient(s)", subject, recipients.len());
        Ok(())
    }

    /// Run one SMTP session; the connection is released on every path
    async fn deliver<R: AsRef<str>>(
        &self,
        from: &str,
        sasl: &str,
        message: &[u8],
        recipients: &[R],
    ) -> SendResult<()> {
        let mut session = SmtpSession::connect(
            &self.config.smtp_host,
            self.config.smtp_port,
            self.config.timeout(),
        )
        .await?;

        match self.transfer(&mut session, from, sasl, message, recipients).await {
            Ok(()) => session.quit().await.map_err(SendError::from),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn transfer<R: AsRef<str>>(
        &self,
        session: &mut SmtpSession,
        from: &str,
        sasl: &str,
        message: &[u8],
        recipients: &[R],
    ) -> SendResult<()> {
        let identity = self.config.client_identity.as_str();

        session.greet(identity).await?;

        let encrypted = session
            .starttls(self.upgrader.as_ref(), self.config.tls_server_name(), identity)
            .await?;
        if !encrypted {
            if self.config.require_tls {
                return Err(SendError::Tls(format!(
                    "{} does not offer STARTTLS",
                    self.config.smtp_host
                )));
            }
            warn!(
                "{} does not offer STARTTLS, authenticating over plain text",
                self.config.smtp_host
            );
        }

        session.authenticate_xoauth2(sasl).await?;
        session.envelope(from, recipients).await?;
        session.data(message).await?;
        Ok(())
    }
}

fn parse_from_address(from_address: &str) -> SendResult<String> {
    from_address
        .parse::<Address>()
        .map(|address| address.to_string())
        .map_err(|e| SendError::Config(format!("from address {}: {}", from_address, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EHLO: &str = "250-relay.test\r\n250-8BITMIME\r\n250 AUTH XOAUTH2\r\n";
    const NO_FILES: &[&str] = &[];

    /// Accept one connection and play a scripted SMTP server on it. The
    /// transcript ends with "<closed>" once the client hangs up.
    fn fake_smtp(
        listener: TcpListener,
        script: Vec<(&'static str, &'static str)>,
    ) -> JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut server = BufReader::new(socket);
            let mut transcript = Vec::new();
            server.get_mut().write_all(b"220 relay.test ESMTP\r\n").await.unwrap();

            let mut steps = script.into_iter().peekable();
            while let Some((expected, response)) = steps.next() {
                let mut line = String::new();
                if server.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                assert!(line.starts_with(expected), "expected {:?}, got {:?}", expected, line);
                transcript.push(line.trim_end().to_string());
                server.get_mut().write_all(response.as_bytes()).await.unwrap();

                if expected == "DATA" {
                    let mut data = String::new();
                    loop {
                        let mut data_line = String::new();
                        server.read_line(&mut data_line).await.unwrap();
                        if data_line == ".\r\n" {
                            break;
                        }
                        data.push_str(&data_line);
                    }
                    transcript.push(data);

                    let accepted = match steps.peek() {
                        Some((".", _)) => steps.next().map_or("", |(_, reply)| reply),
                        _ => "250 2.0.0 queued\r\n",
                    };
                    server.get_mut().write_all(accepted.as_bytes()).await.unwrap();
                }
            }

            let mut rest = String::new();
            while server.read_line(&mut rest).await.unwrap_or(0) > 0 {
                transcript.push(rest.trim_end().to_string());
                rest.clear();
            }
            transcript.push("<closed>".to_string());
            transcript
        })
    }

    async fn token_endpoint(body: serde_json::Value, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    async fn sender_for(token_server: &MockServer, smtp_port: u16) -> Sender {
        let config = SenderConfig {
            smtp_host: "127.0.0.1".to_string(),
            smtp_port,
            token_url: format!("{}/token", token_server.uri()),
            client_identity: "client.test".to_string(),
            timeout_secs: 5,
            ..SenderConfig::default()
        };
        let sender = Sender::new(config).unwrap();
        sender
            .init_with_credentials("me@example.com", Credentials::new("id", "secret", "refresh"))
            .unwrap();
        sender
    }

    #[tokio::test]
    async fn test_send_with_attachment() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.one-shot" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let smtp = fake_smtp(
            listener,
            vec![
                ("EHLO client.test", EHLO),
                ("AUTH XOAUTH2 ", "235 2.7.0 Accepted\r\n"),
                ("MAIL FROM:<me@example.com>", "250 2.1.0 OK\r\n"),
                ("RCPT TO:<a@x.com>", "250 2.1.5 OK\r\n"),
                ("RCPT TO:<b@x.com>", "250 2.1.5 OK\r\n"),
                ("DATA", "354 Go ahead\r\n"),
                ("QUIT", "221 2.0.0 Bye\r\n"),
            ],
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x00\x01binary\xffdata").unwrap();
        let file_name = file.path().file_name().unwrap().to_string_lossy().into_owned();

        let sender = sender_for(&tokens, port).await;
        sender
            .send("Test", &["Hello"], &[file.path()], &["a@x.com", "b@x.com"])
            .await
            .unwrap();

        let transcript = smtp.await.unwrap();

        let auth = transcript[1].strip_prefix("AUTH XOAUTH2 ").unwrap();
        assert_eq!(
            BASE64_STANDARD.decode(auth).unwrap(),
            b"user=me@example.com\x01auth=Bearer ya29.one-shot\x01\x01"
        );

        let data = &transcript[6];
        assert!(data.contains("To: <a@x.com>\r\n"));
        assert!(data.contains("Cc: b@x.com\r\n"));
        assert!(data.contains("Content-Type: text/plain\r\n\r\nHello\r\n"));
        assert!(data.contains(&format!("name=\"{}\"\r\n", file_name)));
        assert!(!data.contains(&file.path().display().to_string()));
        assert!(data.ends_with("--\r\n"));

        assert_eq!(transcript[7], "QUIT");
        assert_eq!(transcript.last().unwrap(), "<closed>");
    }

    #[tokio::test]
    async fn test_missing_access_token_skips_smtp() {
        let tokens = token_endpoint(json!({ "token_type": "Bearer" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sender = sender_for(&tokens, port).await;
        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::TokenExchange { status: Some(200), .. }));

        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err(), "no SMTP connection should be attempted");
    }

    #[tokio::test]
    async fn test_second_recipient_rejected_closes_connection() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let smtp = fake_smtp(
            listener,
            vec![
                ("EHLO client.test", EHLO),
                ("AUTH XOAUTH2 ", "235 2.7.0 Accepted\r\n"),
                ("MAIL FROM:<me@example.com>", "250 2.1.0 OK\r\n"),
                ("RCPT TO:<a@x.com>", "250 2.1.5 OK\r\n"),
                ("RCPT TO:<b@x.com>", "550 5.1.1 No such user\r\n"),
            ],
        );

        let sender = sender_for(&tokens, port).await;
        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com", "b@x.com"])
            .await
            .unwrap_err();

        match err {
            SendError::RecipientRejected { address, reason } => {
                assert_eq!(address, "b@x.com");
                assert!(reason.contains("550"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let transcript = smtp.await.unwrap();
        assert!(!transcript.iter().any(|line| line == "DATA"));
        assert_eq!(transcript.last().unwrap(), "<closed>");
    }

    #[tokio::test]
    async fn test_require_tls_refuses_plain_text_auth() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let smtp = fake_smtp(listener, vec![("EHLO client.test", EHLO)]);

        let config = SenderConfig {
            smtp_host: "127.0.0.1".to_string(),
            smtp_port: port,
            token_url: format!("{}/token", tokens.uri()),
            client_identity: "client.test".to_string(),
            timeout_secs: 5,
            require_tls: true,
            ..SenderConfig::default()
        };
        let sender = Sender::new(config).unwrap();
        sender
            .init_with_credentials("me@example.com", Credentials::new("id", "secret", "refresh"))
            .unwrap();

        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Tls(_)));

        let transcript = smtp.await.unwrap();
        assert!(!transcript.iter().any(|line| line.starts_with("AUTH")));
        assert_eq!(transcript.last().unwrap(), "<closed>");
    }

    #[tokio::test]
    async fn test_quit_failure_after_accepted_message() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let smtp = fake_smtp(
            listener,
            vec![
                ("EHLO client.test", EHLO),
                ("AUTH XOAUTH2 ", "235 2.7.0 Accepted\r\n"),
                ("MAIL FROM:<me@example.com>", "250 2.1.0 OK\r\n"),
                ("RCPT TO:<a@x.com>", "250 2.1.5 OK\r\n"),
                ("DATA", "354 Go ahead\r\n"),
                ("QUIT", "421 4.4.2 Timeout\r\n"),
            ],
        );

        let sender = sender_for(&tokens, port).await;
        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Protocol(ref msg) if msg.contains("421")));

        let transcript = smtp.await.unwrap();
        assert_eq!(transcript[6], "QUIT");
        assert_eq!(transcript.last().unwrap(), "<closed>");
    }

    #[tokio::test]
    async fn test_message_rejected_after_data_closes_connection() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let smtp = fake_smtp(
            listener,
            vec![
                ("EHLO client.test", EHLO),
                ("AUTH XOAUTH2 ", "235 2.7.0 Accepted\r\n"),
                ("MAIL FROM:<me@example.com>", "250 2.1.0 OK\r\n"),
                ("RCPT TO:<a@x.com>", "250 2.1.5 OK\r\n"),
                ("DATA", "354 Go ahead\r\n"),
                (".", "554 5.7.1 Message rejected\r\n"),
            ],
        );

        let sender = sender_for(&tokens, port).await;
        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::DataTransfer(ref msg) if msg.contains("554")));

        let transcript = smtp.await.unwrap();
        assert!(!transcript.iter().any(|line| line == "QUIT"));
        assert_eq!(transcript.last().unwrap(), "<closed>");
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let config = SenderConfig {
            timeout_secs: 0,
            ..SenderConfig::default()
        };
        let err = Sender::new(config).err().unwrap();
        assert!(matches!(err, SendError::Config(ref msg) if msg.contains("timeout_secs")));
    }

    #[tokio::test]
    async fn test_send_before_init() {
        let sender = Sender::new(SenderConfig::default()).unwrap();
        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::NotInitialized));
    }

    #[tokio::test]
    async fn test_unreadable_attachment_skips_smtp() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 1).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sender = sender_for(&tokens, port).await;
        let err = sender
            .send("Test", &["Hello"], &["/nonexistent/relaymail/report.pdf"], &["a@x.com"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::FileRead { .. }));
        assert!(err.to_string().contains("/nonexistent/relaymail/report.pdf"));

        let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_malformed_recipient_rejected_before_token() {
        let tokens = token_endpoint(json!({ "access_token": "ya29.x" }), 0).await;
        let sender = sender_for(&tokens, 9).await;

        let err = sender
            .send("Test", &["Hello"], NO_FILES, &["a@x.com", "bad\r\nRCPT TO:<evil@x.com>"])
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::RecipientRejected { .. }));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"client_id": "id", "client_secret": "secret", "refresh_token": "refresh"}}"#
        )
        .unwrap();

        let sender = Sender::new(SenderConfig::default()).unwrap();
        assert!(!sender.is_initialized());

        sender.init("me@example.com", file.path()).await.unwrap();
        assert!(sender.is_initialized());

        // Second call must not touch the (missing) file
        sender
            .init("other@example.com", "/nonexistent/credentials.json")
            .await
            .unwrap();
        assert_eq!(sender.identity.get().unwrap().from_address, "me@example.com");
    }

    #[tokio::test]
    async fn test_init_failure_leaves_sender_uninitialized() {
        let sender = Sender::new(SenderConfig::default()).unwrap();

        let err = sender
            .init("me@example.com", "/nonexistent/credentials.json")
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Config(_)));
        assert!(!sender.is_initialized());

        let err = sender
            .init_with_credentials("not an address", Credentials::new("id", "s", "r"))
            .unwrap_err();
        assert!(matches!(err, SendError::Config(_)));
    }
}
