//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - any timeout is less than 100ms or exceeds 5 minutes
    /// - a proxy is configured with an empty host or port 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("open_timeout_ms", self.open_timeout_ms),
            ("read_timeout_ms", self.read_timeout_ms),
            ("ssl_timeout_ms", self.ssl_timeout_ms),
            ("continue_timeout_ms", self.continue_timeout_ms),
            ("keep_alive_timeout_ms", self.keep_alive_timeout_ms),
        ] {
            if value < 100 {
                return Err(ConfigError::Invalid { field: field.into(), reason: "must be at least 100ms".into() });
            }
            if value > 300_000 {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must not exceed 5 minutes (300000ms)".into(),
                });
            }
        }

        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::Invalid { field: "proxy.host".into(), reason: "must not be empty".into() });
            }
            if proxy.port == 0 {
                return Err(ConfigError::Invalid { field: "proxy.port".into(), reason: "must not be 0".into() });
            }

            if proxy.password.is_some() && proxy.user.is_none() {
                tracing::warn!(
                    proxy_host = %proxy.host,
                    "proxy password is set without a user; credentials will not be sent"
                );
            }
        }

        Ok(())
    }
}
