//! Session key derivation.

use std::fmt;

use url::Url;

use super::url::UrlError;

/// Identifies one destination and therefore one cache slot.
///
/// Two URLs share a session iff their scheme, host, and resolved port are
/// all equal. Callers should rely only on equality semantics, not on any
/// internal representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    scheme: String,
    host: String,
    port: u16,
}

impl SessionKey {
    /// Derive the key for a normalized URL.
    ///
    /// The port is the URL's explicit port or the scheme default (80/443).
    /// Pure derivation, no I/O.
    pub fn from_url(url: &Url) -> Result<Self, UrlError> {
        let host = url.host_str().ok_or(UrlError::MissingHost)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| UrlError::InvalidUrl(format!("no port for {url}")))?;

        Ok(Self { scheme: url.scheme().to_string(), host: host.to_string(), port })
    }

    /// Destination host.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Destination port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether sessions for this key negotiate TLS.
    pub fn is_tls(&self) -> bool {
        self.scheme == "https"
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}
