//! Ticket tables.
//!
//! Each catalog storage location is a table:
//!
//! ```sql
//! CREATE TABLE <storage_name> (
//!     id         TEXT PRIMARY KEY,      -- encoded ticket id
//!     prefix     TEXT NOT NULL,
//!     parent_id  TEXT,                  -- encoded granting ticket id
//!     payload    BYTEA NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL,  -- hint only, reads never trust it
//!     updated_at TIMESTAMPTZ NOT NULL
//! )
//! ```
//!
//! Table names come from the catalog and are validated before being spliced
//! into SQL; values are always bound.

use crate::map_sqlx_error;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use ticket_registry_core::catalog::validate_storage_name;
use ticket_registry_core::{BoxFuture, StorageError, StoredTicket, TicketCatalog, TicketStorage};

/// `PostgreSQL` ticket storage.
#[derive(Clone, Debug)]
pub struct PostgresTicketStorage {
    pool: PgPool,
}

impl PostgresTicketStorage {
    /// Create a storage over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the table and indexes of every catalog location.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if a statement fails or a storage name is
    /// not a valid identifier.
    pub async fn ensure_schema(&self, catalog: &TicketCatalog) -> Result<(), StorageError> {
        for storage in catalog.storage_names() {
            let table = table_name(storage)?;
            for statement in [
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        id TEXT PRIMARY KEY,
                        prefix TEXT NOT NULL,
                        parent_id TEXT,
                        payload BYTEA NOT NULL,
                        expires_at TIMESTAMPTZ NOT NULL,
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )"
                ),
                format!("CREATE INDEX IF NOT EXISTS {table}_parent_idx ON {table} (parent_id)"),
                format!("CREATE INDEX IF NOT EXISTS {table}_expires_idx ON {table} (expires_at)"),
            ] {
                sqlx::query(&statement)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(e, storage))?;
            }
            tracing::info!(storage, "Ensured ticket table");
        }
        Ok(())
    }

    /// Drop rows whose storage deadline has passed.
    ///
    /// Housekeeping only; the registry never relies on it for expiration.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    pub async fn purge_past_deadline(
        &self,
        storage: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let table = table_name(storage)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at < $1"))
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, storage))?;
        Ok(result.rows_affected())
    }

    fn row_to_ticket(row: &PgRow, storage: &str) -> Result<StoredTicket, StorageError> {
        let corrupt = |e: sqlx::Error| StorageError::Corrupt {
            storage: storage.to_string(),
            key: row.try_get::<String, _>("id").unwrap_or_default(),
            reason: e.to_string(),
        };
        Ok(StoredTicket {
            key: row.try_get("id").map_err(corrupt)?,
            prefix: row.try_get("prefix").map_err(corrupt)?,
            parent_key: row.try_get("parent_id").map_err(corrupt)?,
            payload: row.try_get("payload").map_err(corrupt)?,
            expires_at: row.try_get("expires_at").map_err(corrupt)?,
        })
    }
}

/// Validated table name for a storage location.
fn table_name(storage: &str) -> Result<&str, StorageError> {
    validate_storage_name(storage)
        .map(|()| storage)
        .map_err(|_| StorageError::UnknownLocation(storage.to_string()))
}

impl TicketStorage for PostgresTicketStorage {
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            sqlx::query(&format!(
                "INSERT INTO {table} (id, prefix, parent_id, payload, expires_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (id) DO UPDATE SET
                     prefix = EXCLUDED.prefix,
                     parent_id = EXCLUDED.parent_id,
                     payload = EXCLUDED.payload,
                     expires_at = EXCLUDED.expires_at,
                     updated_at = NOW()"
            ))
            .bind(&ticket.key)
            .bind(&ticket.prefix)
            .bind(&ticket.parent_key)
            .bind(&ticket.payload)
            .bind(ticket.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, storage))?;
            Ok(())
        })
    }

    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            let row = sqlx::query(&format!(
                "SELECT id, prefix, parent_id, payload, expires_at FROM {table} WHERE id = $1"
            ))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, storage))?;

            row.map(|row| Self::row_to_ticket(&row, storage)).transpose()
        })
    }

    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = $1"))
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(e, storage))?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn delete_all<'a>(
        &'a self,
        storage: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            if keys.is_empty() {
                return Ok(0);
            }
            let table = table_name(storage)?;
            let result = sqlx::query(&format!("DELETE FROM {table} WHERE id = ANY($1)"))
                .bind(keys)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(e, storage))?;
            Ok(result.rows_affected())
        })
    }

    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            let result = sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(e, storage))?;
            Ok(result.rows_affected())
        })
    }

    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            let rows = sqlx::query(&format!(
                "SELECT id, prefix, parent_id, payload, expires_at FROM {table} ORDER BY id"
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, storage))?;

            let mut tickets = Vec::with_capacity(rows.len());
            for row in &rows {
                match Self::row_to_ticket(row, storage) {
                    Ok(ticket) => tickets.push(ticket),
                    Err(e) => {
                        tracing::warn!(storage, error = %e, "Skipping unreadable ticket row");
                    }
                }
            }
            Ok(tickets)
        })
    }

    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let table = table_name(storage)?;
            let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.pool)
                .await
                .map_err(|e| map_sqlx_error(e, storage))?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_must_be_identifiers() {
        assert_eq!(table_name("service_tickets"), Ok("service_tickets"));
        assert_eq!(
            table_name("tickets; DROP TABLE locks"),
            Err(StorageError::UnknownLocation(
                "tickets; DROP TABLE locks".to_string()
            ))
        );
    }
}
