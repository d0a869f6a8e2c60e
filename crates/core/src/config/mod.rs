//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (TRAWLR_*)
//! 2. TOML config file (if TRAWLR_CONFIG_FILE set)
//! 3. Built-in defaults
//!
//! These are the process-wide defaults for the session layer. The session
//! cache captures them once at construction and never reads them again, so
//! changing the environment after a cache exists has no effect on it.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Forward proxy settings applied to every session opened while they are in
/// effect.
///
/// Credentials are optional; when `user` is set without `password` the
/// proxy is expected to accept a blank password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,

    /// Proxy port.
    ///
    /// Set via TRAWLR_PROXY__PORT environment variable.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Username for proxy authentication.
    #[serde(default)]
    pub user: Option<String>,

    /// Password for proxy authentication.
    #[serde(default)]
    pub password: Option<String>,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (TRAWLR_*)
/// 2. TOML config file (if TRAWLR_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Forward proxy for all sessions.
    ///
    /// Set via TRAWLR_PROXY__HOST / TRAWLR_PROXY__PORT / TRAWLR_PROXY__USER /
    /// TRAWLR_PROXY__PASSWORD environment variables.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    /// Timeout for opening a TCP connection, in milliseconds.
    ///
    /// Set via TRAWLR_OPEN_TIMEOUT_MS environment variable.
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Timeout for reading a response, in milliseconds.
    ///
    /// Set via TRAWLR_READ_TIMEOUT_MS environment variable.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Timeout for the TLS handshake, in milliseconds.
    ///
    /// Set via TRAWLR_SSL_TIMEOUT_MS environment variable.
    #[serde(default = "default_ssl_timeout_ms")]
    pub ssl_timeout_ms: u64,

    /// How long to wait for a 100 Continue before sending a request body,
    /// in milliseconds.
    ///
    /// Set via TRAWLR_CONTINUE_TIMEOUT_MS environment variable.
    #[serde(default = "default_continue_timeout_ms")]
    pub continue_timeout_ms: u64,

    /// How long an idle session may be reused without a fresh liveness
    /// check, in milliseconds.
    ///
    /// Set via TRAWLR_KEEP_ALIVE_TIMEOUT_MS environment variable.
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub keep_alive_timeout_ms: u64,
}

fn default_proxy_port() -> u16 {
    8080
}

fn default_open_timeout_ms() -> u64 {
    10_000
}

fn default_read_timeout_ms() -> u64 {
    20_000
}

fn default_ssl_timeout_ms() -> u64 {
    10_000
}

fn default_continue_timeout_ms() -> u64 {
    1_000
}

fn default_keep_alive_timeout_ms() -> u64 {
    2_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            open_timeout_ms: default_open_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            ssl_timeout_ms: default_ssl_timeout_ms(),
            continue_timeout_ms: default_continue_timeout_ms(),
            keep_alive_timeout_ms: default_keep_alive_timeout_ms(),
        }
    }
}

impl AppConfig {
    /// Open timeout as Duration for use with tokio.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    /// Read timeout as Duration for use with tokio.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// TLS handshake timeout as Duration for use with tokio.
    pub fn ssl_timeout(&self) -> Duration {
        Duration::from_millis(self.ssl_timeout_ms)
    }

    /// 100 Continue timeout as Duration for use with tokio.
    pub fn continue_timeout(&self) -> Duration {
        Duration::from_millis(self.continue_timeout_ms)
    }

    /// Keep-alive timeout as Duration for use with tokio.
    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `TRAWLR_`
    /// 2. TOML file from `TRAWLR_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("TRAWLR_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("TRAWLR_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
