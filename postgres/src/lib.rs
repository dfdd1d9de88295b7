//! `PostgreSQL` backend for the ticket registry.
//!
//! This crate provides the reference transactional backend:
//!
//! - [`PostgresTicketStorage`]: one table per catalog storage location,
//!   implementing `TicketStorage`
//! - [`PostgresLockStore`]: the `locks` table, implementing `LockStore` with
//!   row-level locking
//!
//! # Example
//!
//! ```ignore
//! use ticket_registry_core::TicketCatalog;
//! use ticket_registry_postgres::{PostgresConfig, PostgresLockStore, PostgresTicketStorage};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PostgresConfig::new("postgres://localhost/sso").connect().await?;
//!     ticket_registry_postgres::migrate(&pool).await?;
//!
//!     let storage = PostgresTicketStorage::new(pool.clone());
//!     storage.ensure_schema(&TicketCatalog::default()).await?;
//!     let locks = PostgresLockStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod lock;
pub mod storage;

pub use lock::PostgresLockStore;
pub use storage::PostgresTicketStorage;

use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use ticket_registry_core::StorageError;

/// SQLSTATE for a missing table.
const UNDEFINED_TABLE: &str = "42P01";

/// Connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Connection URL.
    pub url: String,

    /// Pool size.
    pub max_connections: u32,

    /// How long to wait for a pooled connection.
    pub acquire_timeout_seconds: u64,
}

impl PostgresConfig {
    /// Settings for `url` with default pool sizing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the pool size.
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_seconds))
            .connect(&self.url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect: {e}")))?;
        tracing::info!(max_connections = self.max_connections, "Connected to PostgreSQL");
        Ok(pool)
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/ticket_registry".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

/// Create the `locks` table.
///
/// Ticket tables depend on the catalog and are created by
/// [`PostgresTicketStorage::ensure_schema`].
///
/// # Errors
///
/// Returns [`StorageError::Database`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StorageError::Database(format!("Migration failed: {e}")))?;
    Ok(())
}

/// Classify a sqlx error.
pub(crate) fn map_sqlx_error(error: sqlx::Error, storage: &str) -> StorageError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageError::Connection(error.to_string()),
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNDEFINED_TABLE) => {
            StorageError::UnknownLocation(storage.to_string())
        }
        _ => StorageError::Database(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = PostgresConfig::new("postgres://db/sso").with_max_connections(4);
        assert_eq!(config.url, "postgres://db/sso");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.acquire_timeout_seconds, 5);
    }

    #[test]
    fn pool_errors_are_connection_errors() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut, "service_tickets"),
            StorageError::Connection(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound, "service_tickets"),
            StorageError::Database(_)
        ));
    }
}
