//! Cluster lock rows.
//!
//! Acquisition runs in one transaction:
//!
//! 1. `SELECT ... FOR UPDATE` the application's row
//! 2. no row: `INSERT ... ON CONFLICT DO NOTHING` (a concurrent inserter
//!    wins, the loser sees zero rows affected)
//! 3. row unowned or expired: take it over with `UPDATE`
//! 4. otherwise: refuse
//!
//! Release clears the owner and expiration only when the caller still owns
//! the row, so a node whose hold was taken over cannot release the new
//! owner's lock.

use crate::map_sqlx_error;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use ticket_registry_core::{BoxFuture, LockRecord, LockStore, StorageError};

const LOCKS: &str = "locks";

/// `PostgreSQL` lock store over the `locks` table.
#[derive(Clone, Debug)]
pub struct PostgresLockStore {
    pool: PgPool,
}

impl PostgresLockStore {
    /// Create a lock store over `pool`. Run [`crate::migrate`] first.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn acquire(
        &self,
        application_id: &str,
        owner_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT unique_id, expiration_date FROM locks WHERE application_id = $1 FOR UPDATE",
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?;

        let acquired = match row {
            None => {
                sqlx::query(
                    "INSERT INTO locks (application_id, unique_id, expiration_date)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (application_id) DO NOTHING",
                )
                .bind(application_id)
                .bind(owner_id)
                .bind(expires_at)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                    == 1
            }
            Some(row) => {
                let record = LockRecord {
                    application_id: application_id.to_string(),
                    owner_id: row.try_get("unique_id")?,
                    expiration_date: row.try_get("expiration_date")?,
                };
                if record.is_available_at(now) {
                    sqlx::query(
                        "UPDATE locks SET unique_id = $2, expiration_date = $3
                         WHERE application_id = $1",
                    )
                    .bind(application_id)
                    .bind(owner_id)
                    .bind(expires_at)
                    .execute(&mut *tx)
                    .await?;
                    true
                } else {
                    false
                }
            }
        };

        tx.commit().await?;
        Ok(acquired)
    }
}

impl LockStore for PostgresLockStore {
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            self.acquire(application_id, owner_id, expires_at, now)
                .await
                .map_err(|e| map_sqlx_error(e, LOCKS))
        })
    }

    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE locks SET unique_id = NULL, expiration_date = NULL
                 WHERE application_id = $1 AND unique_id = $2",
            )
            .bind(application_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, LOCKS))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT application_id, unique_id, expiration_date FROM locks
                 WHERE application_id = $1",
            )
            .bind(application_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error(e, LOCKS))?;

            row.map(|row| {
                Ok(LockRecord {
                    application_id: row.try_get("application_id")?,
                    owner_id: row.try_get("unique_id")?,
                    expiration_date: row.try_get("expiration_date")?,
                })
            })
            .transpose()
            .map_err(|e: sqlx::Error| map_sqlx_error(e, LOCKS))
        })
    }
}
