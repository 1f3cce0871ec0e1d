//! Byte streams carrying an SMTP session, and the STARTTLS upgrade capability

use crate::{SmtpError, SmtpResult};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Anything an SMTP session can run over: a TCP socket, a TLS stream, or an
/// in-memory pipe in tests
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for T {}

pub type BoxedStream = Box<dyn SessionStream>;

/// Upgrades a plaintext connection to an encrypted one after STARTTLS
#[async_trait]
pub trait TlsUpgrader: Send + Sync {
    /// Run the client handshake on `stream`, verifying the certificate
    /// against `server_name`
    async fn upgrade(&self, server_name: &str, stream: BoxedStream) -> SmtpResult<BoxedStream>;
}

/// rustls-backed upgrader trusting the Mozilla root store
#[derive(Clone)]
pub struct RustlsUpgrader {
    connector: TlsConnector,
}

impl RustlsUpgrader {
    /// Create an upgrader using the bundled webpki roots
    pub fn new() -> SmtpResult<Self> {
        let root_store = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| SmtpError::TlsError(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self::with_config(Arc::new(config)))
    }

    /// Create an upgrader from a caller-supplied rustls configuration
    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
        }
    }
}

#[async_trait]
impl TlsUpgrader for RustlsUpgrader {
    async fn upgrade(&self, server_name: &str, stream: BoxedStream) -> SmtpResult<BoxedStream> {
        let name = ServerName::try_from(server_name.to_owned()).map_err(|e| {
            SmtpError::TlsError(format!("Invalid server name {}: {}", server_name, e))
        })?;

        let tls_stream = self
            .connector
            .connect(name, stream)
            .await
            .map_err(|e| SmtpError::TlsError(e.to_string()))?;

        debug!("TLS connection established with {}", server_name);
        Ok(Box::new(tls_stream))
    }
}
