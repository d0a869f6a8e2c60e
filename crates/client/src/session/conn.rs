//! A cached connection to one scheme/host/port destination.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;

use trawlr_core::{Error, ProxyConfig};

use super::key::SessionKey;
use super::{SessionConfig, proxy, tls};

/// The underlying byte stream of a session.
pub(crate) enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Transport::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Transport::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// A connection handle bound to one destination.
///
/// Proxy and timeout settings are captured from the cache at creation and
/// stay fixed for the session's lifetime. TLS sessions handshake when the
/// cache creates them; plain sessions open on first [`Session::io`] call.
///
/// The cache never probes a reused session for liveness. A peer that went
/// away surfaces as an I/O error on the caller's next read or write; the
/// expected response is to kill the session and fetch a fresh one.
pub struct Session {
    key: SessionKey,
    config: SessionConfig,
    transport: Mutex<Option<Transport>>,
}

impl Session {
    pub(crate) fn new(key: SessionKey, config: SessionConfig) -> Self {
        Self { key, config, transport: Mutex::new(None) }
    }

    /// The destination this session is bound to.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Proxy settings this session was created with.
    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.config.proxy.as_ref()
    }

    /// Timeout for opening the TCP connection.
    pub fn open_timeout(&self) -> Duration {
        self.config.open_timeout
    }

    /// Timeout the request layer should apply to response reads.
    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Timeout for the TLS handshake.
    pub fn ssl_timeout(&self) -> Duration {
        self.config.ssl_timeout
    }

    /// How long the request layer should wait for a 100 Continue.
    pub fn continue_timeout(&self) -> Duration {
        self.config.continue_timeout
    }

    /// How long the request layer may reuse this session while idle.
    pub fn keep_alive_timeout(&self) -> Duration {
        self.config.keep_alive_timeout
    }

    /// Whether the underlying transport is currently open.
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// Ensure the underlying transport is open.
    ///
    /// No-op when already connected.
    pub async fn connect(&self) -> Result<(), Error> {
        self.io().await?;
        Ok(())
    }

    /// Borrow the session's byte stream for request traffic, opening the
    /// transport first if this is a plain session's first use.
    pub async fn io(&self) -> Result<SessionIo<'_>, Error> {
        let mut transport = self.transport.lock().await;
        if transport.is_none() {
            *transport = Some(self.open().await?);
        }
        Ok(SessionIo { guard: transport })
    }

    /// Close the transport, ignoring shutdown errors.
    ///
    /// The transport may already be gone (peer reset, prior close); that is
    /// logged and dropped, never surfaced.
    pub(crate) async fn close(&self) {
        let mut transport = self.transport.lock().await;
        if let Some(mut stream) = transport.take()
            && let Err(e) = stream.shutdown().await
        {
            tracing::debug!("ignoring error closing session to {}: {e}", self.key);
        }
    }

    async fn open(&self) -> Result<Transport, Error> {
        let (dial_host, dial_port) = match self.config.proxy.as_ref() {
            Some(proxy) => (proxy.host.as_str(), proxy.port),
            None => (self.key.host(), self.key.port()),
        };
        // url keeps IPv6 hosts bracketed; the resolver wants them bare
        let dial_host = dial_host.trim_start_matches('[').trim_end_matches(']');

        let stream = timeout(self.config.open_timeout, TcpStream::connect((dial_host, dial_port)))
            .await
            .map_err(|_| Error::Timeout(format!("open timeout connecting to {}", self.key)))?
            .map_err(|e| Error::Connect(format!("{}: {e}", self.key)))?;

        if !self.key.is_tls() {
            tracing::debug!("opened plain session to {}", self.key);
            return Ok(Transport::Plain(stream));
        }

        // Through a proxy the handshake runs over a CONNECT tunnel to the
        // origin; the tunnel exchange counts against the open timeout.
        let stream = match self.config.proxy.as_ref() {
            Some(proxy) => {
                let auth = proxy
                    .user
                    .as_deref()
                    .map(|user| proxy::basic_auth(user, proxy.password.as_deref()));
                timeout(
                    self.config.open_timeout,
                    proxy::connect_tunnel(stream, self.key.host(), self.key.port(), auth),
                )
                .await
                .map_err(|_| Error::Timeout(format!("open timeout tunneling to {}", self.key)))??
            }
            None => stream,
        };

        let sni = self.key.host().trim_start_matches('[').trim_end_matches(']').to_string();
        let server_name =
            ServerName::try_from(sni).map_err(|e| Error::Tls(format!("invalid server name for {}: {e}", self.key)))?;

        let tls_stream = timeout(self.config.ssl_timeout, tls::connector().connect(server_name, stream))
            .await
            .map_err(|_| Error::Timeout(format!("ssl timeout handshaking with {}", self.key)))?
            .map_err(|e| Error::Tls(format!("{}: {e}", self.key)))?;

        tracing::debug!("opened tls session to {}", self.key);
        Ok(Transport::Tls(Box::new(tls_stream)))
    }
}

/// Exclusive borrow of a session's transport.
///
/// Implements `AsyncRead + AsyncWrite`; the request layer drives its HTTP
/// traffic through this and drops it when the exchange is done, releasing
/// the session for the next request.
pub struct SessionIo<'a> {
    guard: MutexGuard<'a, Option<Transport>>,
}

impl SessionIo<'_> {
    fn transport(&mut self) -> io::Result<&mut Transport> {
        self.guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "session transport closed"))
    }
}

impl AsyncRead for SessionIo<'_> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.transport() {
            Ok(transport) => Pin::new(transport).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for SessionIo<'_> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match this.transport() {
            Ok(transport) => Pin::new(transport).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.transport() {
            Ok(transport) => Pin::new(transport).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.transport() {
            Ok(transport) => Pin::new(transport).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
