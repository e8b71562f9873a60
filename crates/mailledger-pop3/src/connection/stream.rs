//! Stream types for POP3 connections.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::{Config, Security};
use crate::{Error, Result};

/// A stream that can be either plaintext or TLS.
pub enum PopStream {
    /// Plaintext TCP stream.
    Plain(TcpStream),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<TcpStream>>),
}

impl PopStream {
    /// Wraps a plaintext stream in TLS.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream is already TLS, the host name is not
    /// a valid server name, or the handshake fails.
    pub async fn upgrade_to_tls(self, connector: &TlsConnector, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::InvalidOperation(
                "stream is already TLS".to_string(),
            )),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for PopStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for PopStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Future returned by [`UpgradeStream::upgrade`].
pub type UpgradeFuture<'a, S> = Pin<Box<dyn Future<Output = Result<S>> + Send + 'a>>;

/// Swaps a connected stream for an encrypted one after STLS.
///
/// The session hands over the raw stream once the server has accepted
/// STLS and continues on whatever stream comes back.
pub trait UpgradeStream<S>: Send + Sync {
    /// Upgrades `stream`, connected to `host`.
    fn upgrade<'a>(&'a self, host: &'a str, stream: S) -> UpgradeFuture<'a, S>;
}

/// Upgrades a [`PopStream`] with rustls and the webpki root store.
#[derive(Clone)]
pub struct TlsUpgrader {
    connector: TlsConnector,
}

impl TlsUpgrader {
    /// Creates an upgrader with default root certificates.
    #[must_use]
    pub fn new() -> Self {
        Self::with_connector(create_tls_connector())
    }

    /// Creates an upgrader using a custom connector.
    #[must_use]
    pub const fn with_connector(connector: TlsConnector) -> Self {
        Self { connector }
    }
}

impl Default for TlsUpgrader {
    fn default() -> Self {
        Self::new()
    }
}

impl UpgradeStream<PopStream> for TlsUpgrader {
    fn upgrade<'a>(&'a self, host: &'a str, stream: PopStream) -> UpgradeFuture<'a, PopStream> {
        Box::pin(stream.upgrade_to_tls(&self.connector, host))
    }
}

/// Creates a TLS connector with default root certificates.
#[must_use]
pub fn create_tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

/// Opens the TCP connection described by `config`, with TLS for
/// [`Security::Implicit`].
///
/// # Errors
///
/// Every failure is reported as [`Error::Connection`] wrapping the cause.
pub async fn connect(config: &Config) -> Result<PopStream> {
    let addr = (config.host.as_str(), config.port);

    let tcp = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await
    {
        Ok(Ok(tcp)) => tcp,
        Ok(Err(e)) => {
            return Err(Error::connection(
                format!("failed to connect to {}:{}", config.host, config.port),
                Some(Error::Transport(e)),
            ));
        }
        Err(_) => {
            return Err(Error::connection(
                format!("failed to connect to {}:{}", config.host, config.port),
                Some(Error::Timeout(format!(
                    "connect did not complete within {:?}",
                    config.connect_timeout
                ))),
            ));
        }
    };
    tracing::debug!(host = %config.host, port = config.port, "TCP connection established");

    let stream = PopStream::Plain(tcp);
    if config.security != Security::Implicit {
        return Ok(stream);
    }

    let connector = create_tls_connector();
    let handshake = stream.upgrade_to_tls(&connector, &config.host);
    match tokio::time::timeout(config.connect_timeout, handshake).await {
        Ok(Ok(tls)) => Ok(tls),
        Ok(Err(e)) => Err(Error::connection("TLS handshake failed", Some(e))),
        Err(_) => Err(Error::connection(
            "TLS handshake failed",
            Some(Error::Timeout(format!(
                "handshake did not complete within {:?}",
                config.connect_timeout
            ))),
        )),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use std::error::Error as _;

    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn test_connect_plain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();
        let stream = connect(&config).await.unwrap();
        assert!(!stream.is_tls());
    }

    #[tokio::test]
    async fn test_connect_refused_wraps_cause() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::None)
            .build();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::Connection { .. }));
        assert!(
            err.source()
                .unwrap()
                .to_string()
                .starts_with("Transport error")
        );
    }

    #[tokio::test]
    async fn test_connect_implicit_tls_handshake_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            // Hang up without speaking TLS.
            drop(listener.accept().await.unwrap());
        });

        let config = Config::builder("127.0.0.1")
            .port(port)
            .security(Security::Implicit)
            .build();
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(
            &err,
            Error::Connection { message, source: Some(_) } if message == "TLS handshake failed"
        ));
        server.await.unwrap();
    }
}
