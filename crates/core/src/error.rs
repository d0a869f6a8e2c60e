//! Unified error types for trawlr.

/// Unified error types for the crawl client.
///
/// Every variant describes a failure to establish a session; errors during
/// session teardown are swallowed at the close site and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// URL could not be parsed or lacks a usable host.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// URL scheme the session layer does not speak.
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// DNS resolution or TCP connect failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Open or TLS deadline exceeded while establishing a session.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Proxy negotiation failed (CONNECT refused, bad credentials).
    #[error("proxy error: {0}")]
    Proxy(String),

    /// TLS handshake failed.
    #[error("tls error: {0}")]
    Tls(String),
}
