//! Per-destination session cache.
//!
//! ### Keying
//! - One session per `(scheme, host, port)` triple.
//! - URLs are normalized once at the boundary before any lookup.
//!
//! ### Lifecycle
//! - Sessions are created on first access and reused until killed.
//! - `https` destinations handshake eagerly at creation, with certificate
//!   verification disabled; plain destinations open on first use.
//! - `kill` and `clear` close best-effort; teardown never fails the crawl.
//!
//! ### Concurrency
//! - The cache lock covers only lookup and install, never connection setup.
//! - Handles are `Arc`-shared, so killing a key does not disturb I/O already
//!   in flight on a previously returned session.

pub mod conn;
pub mod key;
pub mod proxy;
pub mod tls;
pub mod url;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use trawlr_core::{AppConfig, Error, ProxyConfig};

pub use conn::{Session, SessionIo};
pub use key::SessionKey;
pub use url::{UrlError, canonicalize};

/// Configuration captured by each session at creation.
///
/// Built from the process-wide [`AppConfig`] once, at cache construction;
/// later changes to process-wide settings do not reach an existing cache or
/// its sessions.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Forward proxy for all sessions, or direct connections when absent.
    pub proxy: Option<ProxyConfig>,

    /// Timeout for opening the TCP connection (and CONNECT tunnel).
    pub open_timeout: Duration,

    /// Timeout the request layer applies to response reads.
    pub read_timeout: Duration,

    /// Timeout for the TLS handshake.
    pub ssl_timeout: Duration,

    /// How long the request layer waits for a 100 Continue.
    pub continue_timeout: Duration,

    /// How long an idle session may be reused.
    pub keep_alive_timeout: Duration,
}

impl SessionConfig {
    /// Capture the process-wide defaults.
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            proxy: config.proxy.clone(),
            open_timeout: config.open_timeout(),
            read_timeout: config.read_timeout(),
            ssl_timeout: config.ssl_timeout(),
            continue_timeout: config.continue_timeout(),
            keep_alive_timeout: config.keep_alive_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

/// In-memory cache of one live session per destination.
///
/// Owns every session it creates. Other components hold a returned handle
/// only for the duration of a request, or re-fetch it from the cache.
pub struct SessionCache {
    config: SessionConfig,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
}

impl SessionCache {
    /// Create an empty cache with the given configuration.
    ///
    /// Does no I/O; sessions are opened on demand.
    pub fn new(config: SessionConfig) -> Self {
        Self { config, sessions: Mutex::new(HashMap::new()) }
    }

    /// Whether a session currently exists for the URL's destination.
    ///
    /// Never creates a session.
    pub async fn is_active(&self, url: &str) -> Result<bool, Error> {
        let key = parse_key(url)?;
        Ok(self.sessions.lock().await.contains_key(&key))
    }

    /// Fetch the session for the URL's destination, creating it on first
    /// access.
    ///
    /// A cached session is returned unchanged; its liveness is not probed
    /// (a dead peer surfaces as an I/O error on the caller's next request).
    /// On creation failure nothing is stored, so the next call retries from
    /// scratch.
    pub async fn get(&self, url: &str) -> Result<Arc<Session>, Error> {
        let key = parse_key(url)?;

        {
            let sessions = self.sessions.lock().await;
            if let Some(session) = sessions.get(&key) {
                tracing::debug!("session cache hit for {}", key);
                return Ok(Arc::clone(session));
            }
        }

        let session = Arc::new(Session::new(key.clone(), self.config.clone()));

        // Eager handshake for TLS destinations, outside the cache lock so
        // other destinations' lookups proceed while we negotiate.
        if key.is_tls() {
            session.connect().await?;
        }

        let raced = {
            let mut sessions = self.sessions.lock().await;
            match sessions.entry(key) {
                Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
                Entry::Vacant(entry) => {
                    tracing::debug!("created session for {}", entry.key());
                    entry.insert(Arc::clone(&session));
                    None
                }
            }
        };

        match raced {
            // lost a creation race; the installed session wins and ours is
            // released so a half-open connection cannot leak
            Some(winner) => {
                session.close().await;
                Ok(winner)
            }
            None => Ok(session),
        }
    }

    /// Remove and close the session for the URL's destination.
    ///
    /// Closing is best-effort: a transport that is already gone is logged
    /// and ignored, and the key is removed either way. No-op when no
    /// session exists for the destination.
    pub async fn kill(&self, url: &str) -> Result<(), Error> {
        let key = parse_key(url)?;
        let removed = self.sessions.lock().await.remove(&key);
        if let Some(session) = removed {
            tracing::debug!("killing session for {}", key);
            session.close().await;
        }
        Ok(())
    }

    /// Close every session and empty the cache.
    ///
    /// Called by the crawl loop when a crawl finishes. Returns the cache
    /// for chaining.
    pub async fn clear(&self) -> &Self {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        if !drained.is_empty() {
            tracing::debug!("clearing {} cached sessions", drained.len());
        }
        for session in drained {
            session.close().await;
        }
        self
    }

    /// Number of destinations with a live session.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether the cache holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Get reference to the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

/// Normalize a URL and derive its session key.
fn parse_key(url: &str) -> Result<SessionKey, Error> {
    let parsed = canonicalize(url).map_err(|e| match e {
        UrlError::UnsupportedScheme(scheme) => Error::UnsupportedScheme(scheme),
        other => Error::InvalidUrl(other.to_string()),
    })?;
    SessionKey::from_url(&parsed).map_err(|e| Error::InvalidUrl(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn cache() -> SessionCache {
        SessionCache::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn test_same_destination_returns_same_session() {
        let cache = cache();
        let a = cache.get("http://example.com/page-one").await.unwrap();
        let b = cache.get("http://example.com/page-two?q=1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_differing_destinations_get_distinct_sessions() {
        let cache = cache();
        let base = cache.get("http://example.com/").await.unwrap();
        let other_host = cache.get("http://other.example.com/").await.unwrap();
        let other_port = cache.get("http://example.com:8080/").await.unwrap();
        assert!(!Arc::ptr_eq(&base, &other_host));
        assert!(!Arc::ptr_eq(&base, &other_port));
        assert_eq!(cache.len().await, 3);
    }

    #[tokio::test]
    async fn test_is_active_reflects_lifecycle() {
        let cache = cache();
        assert!(!cache.is_active("http://example.com/").await.unwrap());

        cache.get("http://example.com/").await.unwrap();
        assert!(cache.is_active("http://example.com/").await.unwrap());
        // is_active never creates
        assert!(!cache.is_active("http://other.example.com/").await.unwrap());
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_kill_removes_and_next_get_creates_fresh() {
        let cache = cache();
        let first = cache.get("http://example.com/").await.unwrap();

        cache.kill("http://example.com/").await.unwrap();
        assert!(!cache.is_active("http://example.com/").await.unwrap());

        let second = cache.get("http://example.com/").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_kill_without_session_is_noop() {
        let cache = cache();
        cache.kill("http://example.com/").await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_kill_survives_dead_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move { listener.accept().await.unwrap() });

        let cache = cache();
        let url = format!("http://127.0.0.1:{}/", addr.port());
        let session = cache.get(&url).await.unwrap();
        session.connect().await.unwrap();

        // tear the peer down out-of-band before killing
        let (mut socket, _) = server.await.unwrap();
        let _ = socket.shutdown().await;
        drop(socket);

        cache.kill(&url).await.unwrap();
        assert!(!cache.is_active(&url).await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_empties_cache_and_chains() {
        let cache = cache();
        cache.get("http://example.com/").await.unwrap();
        cache.get("http://other.example.com/").await.unwrap();

        let returned = cache.clear().await;
        assert!(std::ptr::eq(returned, &cache));
        assert!(cache.is_empty().await);
        assert!(!cache.is_active("http://example.com/").await.unwrap());
        assert!(!cache.is_active("http://other.example.com/").await.unwrap());
    }

    #[tokio::test]
    async fn test_plain_get_does_not_open_or_handshake() {
        let config = SessionConfig { read_timeout: Duration::from_secs(5), ..Default::default() };
        let cache = SessionCache::new(config);

        let session = cache.get("http://example.com/").await.unwrap();
        assert_eq!(session.read_timeout(), Duration::from_secs(5));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn test_tls_get_failure_leaves_cache_clean() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cache = cache();
        let url = format!("https://127.0.0.1:{}/", addr.port());
        let result = cache.get(&url).await;
        assert!(matches!(result, Err(Error::Connect(_))));
        assert!(!cache.is_active(&url).await.unwrap());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_tls_get_through_rejecting_proxy_propagates() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
            socket
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
        });

        let config = SessionConfig {
            proxy: Some(ProxyConfig { host: "127.0.0.1".into(), port: addr.port(), user: None, password: None }),
            ..Default::default()
        };
        let cache = SessionCache::new(config);
        let result = cache.get("https://example.com/").await;
        assert!(matches!(result, Err(Error::Proxy(_))));
        assert!(!cache.is_active("https://example.com/").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_gets_install_one_session() {
        let cache = Arc::new(cache());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get("http://example.com/").await.unwrap() }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }

        for session in &sessions[1..] {
            assert!(Arc::ptr_eq(&sessions[0], session));
        }
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_at_the_boundary() {
        let cache = cache();
        assert!(matches!(cache.get("").await, Err(Error::InvalidUrl(_))));
        assert!(matches!(cache.get("ftp://example.com/").await, Err(Error::UnsupportedScheme(_))));
        assert!(matches!(cache.is_active("   ").await, Err(Error::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_kill_does_not_disturb_in_flight_io() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            tokio::io::AsyncReadExt::read_exact(&mut socket, &mut buf).await.unwrap();
            buf
        });

        let cache = Arc::new(cache());
        let url = format!("http://127.0.0.1:{}/", addr.port());
        let session = cache.get(&url).await.unwrap();

        let mut io = session.io().await.unwrap();

        // kill removes the key right away but its close must wait for the
        // borrowed transport, so the write below still goes through
        let killer = tokio::spawn({
            let cache = Arc::clone(&cache);
            let url = url.clone();
            async move { cache.kill(&url).await }
        });

        io.write_all(b"late").await.unwrap();
        drop(io);

        killer.await.unwrap().unwrap();
        assert!(!cache.is_active(&url).await.unwrap());
        assert_eq!(&server.await.unwrap(), b"late");
    }
}
