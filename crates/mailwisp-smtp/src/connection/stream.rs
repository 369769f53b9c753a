//! Byte transports under an SMTP session: TCP, TLS and in-memory test pipes.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::TlsConfig;
use crate::error::{Error, Result};

/// Byte stream an SMTP connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed plaintext transport.
pub type BoxedTransport = Box<dyn Transport>;

/// SMTP stream (plaintext or TLS).
pub enum SmtpStream {
    /// Plaintext stream, usually TCP.
    Plain(BoxedTransport),
    /// Channel wrapped in rustls, boxed since the TLS state is large.
    Tls(Box<TlsStream<BoxedTransport>>),
}

impl SmtpStream {
    /// Wraps a plaintext transport.
    pub fn plain(transport: impl Transport + 'static) -> Self {
        Self::Plain(Box::new(transport))
    }

    /// Whether traffic is already encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Runs the TLS handshake over a plaintext stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StartTlsFailure`] if the stream is already encrypted
    /// or the handshake fails.
    pub async fn upgrade_to_tls(
        self,
        connector: &TlsConnector,
        server_name: ServerName<'static>,
    ) -> Result<Self> {
        let Self::Plain(transport) = self else {
            return Err(Error::StartTlsFailure("stream already uses TLS".into()));
        };

        let tls = connector
            .connect(server_name, transport)
            .await
            .map_err(|e| Error::StartTlsFailure(e.to_string()))?;
        Ok(Self::Tls(Box::new(tls)))
    }
}

impl fmt::Debug for SmtpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("SmtpStream::Plain"),
            Self::Tls(_) => f.write_str("SmtpStream::Tls"),
        }
    }
}

impl AsyncRead for SmtpStream {
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

impl AsyncWrite for SmtpStream {
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

/// Opens a plaintext TCP channel to `host:port`.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(host: &str, port: u16) -> Result<SmtpStream> {
    Ok(SmtpStream::plain(connect_tcp(host, port).await?))
}

/// Opens a TCP channel and runs the TLS handshake before any SMTP traffic.
///
/// # Errors
///
/// Returns an error if the connection, certificate loading or TLS handshake fails.
pub async fn connect_tls(host: &str, port: u16, tls: &TlsConfig) -> Result<SmtpStream> {
    let connector = create_tls_connector(tls).await?;
    let server_name = server_name(host)?;
    let transport: BoxedTransport = Box::new(connect_tcp(host, port).await?);

    let tls = connector.connect(server_name, transport).await?;
    Ok(SmtpStream::Tls(Box::new(tls)))
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    tcp.set_nodelay(true)?;
    Ok(tcp)
}

/// Converts a hostname into a TLS server name.
///
/// # Errors
///
/// Returns [`Error::InvalidHostname`] if the name is not a valid DNS name or IP address.
pub fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_owned()).map_err(|_| Error::InvalidHostname(host.to_owned()))
}

/// Creates a TLS connector trusting the roots selected by `tls`.
///
/// # Errors
///
/// Returns an error if a custom root file cannot be read or holds no usable certificate.
pub async fn create_tls_connector(tls: &TlsConfig) -> Result<TlsConnector> {
    let config = match tls {
        TlsConfig::Default => {
            let root_store = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        }
        TlsConfig::CustomRoot(path) => {
            let pem = tokio::fs::read(path).await?;
            let mut root_store = RootCertStore::empty();
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                root_store.add(cert?)?;
            }
            if root_store.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("no certificates found in {}", path.display()),
                )
                .into());
            }
            Arc::new(
                rustls::ClientConfig::builder()
                    .with_root_certificates(root_store)
                    .with_no_client_auth(),
            )
        }
        TlsConfig::Custom(config) => Arc::clone(config),
    };

    Ok(TlsConnector::from(config))
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
    use super::*;

    #[test]
    fn test_server_name() {
        assert!(server_name("smtp.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(matches!(
            server_name("not a host"),
            Err(Error::InvalidHostname(h)) if h == "not a host"
        ));
    }

    #[tokio::test]
    async fn test_default_connector() {
        assert!(create_tls_connector(&TlsConfig::Default).await.is_ok());
    }

    #[tokio::test]
    async fn test_custom_root_missing_file() {
        let tls = TlsConfig::CustomRoot("/nonexistent/mailwisp-ca.pem".into());
        assert!(matches!(create_tls_connector(&tls).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_custom_root_without_certificates() {
        let path = std::env::temp_dir().join(format!("mailwisp-empty-{}.pem", std::process::id()));
        tokio::fs::write(&path, b"not a certificate\n").await.unwrap();

        let result = create_tls_connector(&TlsConfig::CustomRoot(path.clone())).await;
        tokio::fs::remove_file(&path).await.unwrap();

        assert!(matches!(result, Err(Error::Io(e)) if e.kind() == io::ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn test_plain_stream_is_not_tls() {
        let (client, _server) = tokio::io::duplex(64);
        let stream = SmtpStream::plain(client);
        assert!(!stream.is_tls());
        assert_eq!(format!("{stream:?}"), "SmtpStream::Plain");
    }
}
