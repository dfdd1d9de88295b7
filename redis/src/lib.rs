//! Redis backend for the ticket registry.
//!
//! # Architecture
//!
//! - **Tickets**: one hash per ticket at `{namespace}:{storage}:{key}` with
//!   fields `prefix`, `parent`, `payload` and `expires_at` (epoch millis).
//!   `PEXPIREAT` is set to the storage deadline so Redis evicts abandoned
//!   tickets on its own; reads still evaluate expiration in the registry.
//! - **Locks**: one hash per application at `{namespace}:lock:{application}`
//!   with fields `owner` and `expires_at`, updated by Lua scripts so
//!   check-and-set is atomic.
//!
//! # Example
//!
//! ```no_run
//! use ticket_registry_redis::{RedisConfig, RedisLockStore, RedisTicketStorage};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::new("redis://127.0.0.1:6379");
//! let storage = RedisTicketStorage::new(&config).await?;
//! let locks = RedisLockStore::new(&config).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod lock;
pub mod storage;

pub use lock::RedisLockStore;
pub use storage::RedisTicketStorage;

use redis::aio::ConnectionManager;
use redis::Client;
use serde::Deserialize;
use ticket_registry_core::StorageError;

/// Connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL.
    pub url: String,

    /// Prefix of every key written by the registry.
    pub namespace: String,
}

impl RedisConfig {
    /// Settings for `url` with the default namespace.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Use `namespace` as key prefix.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Open a managed connection.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if Redis is unreachable.
    pub async fn connect(&self) -> Result<ConnectionManager, StorageError> {
        let client = Client::open(self.url.as_str()).map_err(|e| {
            StorageError::Connection(format!("Failed to create Redis client: {e}"))
        })?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::Connection(format!("Failed to create Redis connection manager: {e}"))
        })?;
        tracing::info!(namespace = %self.namespace, "Connected to Redis");
        Ok(manager)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "cas".to_string(),
        }
    }
}

/// Classify a redis error.
pub(crate) fn map_redis_error(error: &redis::RedisError) -> StorageError {
    if error.is_io_error()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
        || error.is_timeout()
    {
        StorageError::Connection(error.to_string())
    } else {
        StorageError::Database(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RedisConfig::new("redis://cache:6379").with_namespace("sso");
        assert_eq!(config.url, "redis://cache:6379");
        assert_eq!(config.namespace, "sso");
        assert_eq!(RedisConfig::default().namespace, "cas");
    }

    #[test]
    fn io_errors_are_connection_errors() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(map_redis_error(&io), StorageError::Connection(_)));

        let typed = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(map_redis_error(&typed), StorageError::Database(_)));
    }
}
