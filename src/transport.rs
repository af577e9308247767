//! Deadline-enforcing transport wrappers and connect helpers.
//!
//! Every read and write against the broker carries a deadline so a dead
//! peer can never stall the connection forever. The write deadline is
//! fixed; the read deadline is shared through [`ReadDeadline`] so the
//! heartbeater can stretch it to cover the negotiated interval.
//!
//! TLS layers above the TCP stream and below the framing layer. The
//! handshake runs to completion before any protocol bytes are sent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// Deadline applied to every individual read and write.
pub(crate) const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Any bidirectional byte stream usable as a broker transport.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

pub(crate) type BoxStream = Box<dyn IoStream>;
pub(crate) type ReadStream = tokio::io::ReadHalf<BoxStream>;
pub(crate) type WriteStream = tokio::io::WriteHalf<BoxStream>;

/// TLS client settings handed through to the TLS layer.
///
/// When `server_name` is absent the connect host is used for
/// certificate validation; the caller's value is never modified.
#[derive(Clone)]
pub struct TlsSettings {
    /// rustls client configuration (roots, ALPN, client auth).
    pub config: Arc<ClientConfig>,
    /// Name presented for SNI and certificate validation.
    pub server_name: Option<ServerName<'static>>,
}

impl TlsSettings {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            config,
            server_name: None,
        }
    }
}

/// Shared, atomically adjustable read deadline.
///
/// The reader applies the current value to each read; the heartbeater
/// raises it to three missed server heartbeats once tuning completes.
#[derive(Clone)]
pub(crate) struct ReadDeadline(Arc<AtomicU64>);

impl ReadDeadline {
    pub(crate) fn new(initial: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(initial.as_millis() as u64)))
    }

    pub(crate) fn set(&self, deadline: Duration) {
        self.0.store(deadline.as_millis() as u64, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }
}

/// Read half with a per-read deadline taken from a [`ReadDeadline`].
pub(crate) struct TimeoutReader<R> {
    inner: R,
    deadline: ReadDeadline,
}

impl<R: AsyncRead + Unpin> TimeoutReader<R> {
    pub(crate) fn new(inner: R, deadline: ReadDeadline) -> Self {
        Self { inner, deadline }
    }

    /// Fill `buf` completely or fail. A missed deadline surfaces as a
    /// `TimedOut` I/O error.
    pub(crate) async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match tokio::time::timeout(self.deadline.get(), self.inner.read_exact(buf)).await {
            Ok(res) => res.map(|_| ()),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "read deadline expired",
            )),
        }
    }
}

/// Write half with a fixed per-write deadline.
pub(crate) struct TimeoutWriter<W> {
    inner: W,
    timeout: Duration,
}

impl<W: AsyncWrite + Unpin> TimeoutWriter<W> {
    pub(crate) fn new(inner: W, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let timeout = self.timeout;
        let io = &mut self.inner;
        match tokio::time::timeout(timeout, async {
            io.write_all(buf).await?;
            io.flush().await
        })
        .await
        {
            Ok(res) => res,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write deadline expired",
            )),
        }
    }

    /// Shut the stream down, closing the transport.
    pub(crate) async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }
}

/// TCP connect bounded by `timeout`.
pub(crate) async fn tcp_connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(Error::transport(format!(
            "connect to {host}:{port} failed: {err}"
        ))),
        Err(_) => Err(Error::transport(format!(
            "connect to {host}:{port} timed out"
        ))),
    }
}

/// Run the TLS handshake over an established stream.
///
/// The server name defaults to `host`; `settings` is only read, so a
/// caller reusing one configuration across URLs keeps it intact.
pub(crate) async fn tls_connect(
    stream: TcpStream,
    settings: &TlsSettings,
    host: &str,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>> {
    let server_name = match &settings.server_name {
        Some(name) => name.clone(),
        None => ServerName::try_from(host.to_string())
            .map_err(|_| Error::transport(format!("invalid TLS server name {host:?}")))?,
    };

    let connector = TlsConnector::from(settings.config.clone());
    match tokio::time::timeout(timeout, connector.connect(server_name, stream)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(err)) => Err(Error::transport(format!("TLS handshake failed: {err}"))),
        Err(_) => Err(Error::transport("TLS handshake timed out")),
    }
}
