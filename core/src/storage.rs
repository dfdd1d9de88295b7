//! Storage backend contract.
//!
//! Every backend (relational, document, key-value, in-memory) implements
//! [`TicketStorage`]. The registry and the cleaner depend only on this trait,
//! so adding a backend never touches registry logic.
//!
//! # Contract
//!
//! Per storage location name (one per catalog entry):
//!
//! - `save` is an upsert keyed by [`StoredTicket::key`]
//! - `find` returns the record or `None`
//! - `delete` returns `true` iff a record was removed
//! - `delete_all` is a best-effort batch delete returning how many went away
//! - `scan_all` enumerates every record; each scan is complete and
//!   independent, no cursor survives between calls
//! - `count` returns the number of records
//!
//! A write followed by a read of the same key on the same backend must
//! observe the write. No ordering across keys is required.
//!
//! # Implementations
//!
//! - `PostgresTicketStorage` (in `ticket-registry-postgres`): reference
//!   transactional backend
//! - `RedisTicketStorage` (in `ticket-registry-redis`): key-value backend
//! - `InMemoryTicketStorage` (in `ticket-registry-testing`): tests
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the registry
//! can hold an `Arc<dyn TicketStorage>` chosen at runtime.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed, sendable future returned by the backend traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by storage backends and lock stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend rejected or failed a query.
    #[error("Database error: {0}")]
    Database(String),

    /// The backend could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The storage location does not exist in this backend.
    #[error("Unknown storage location: {0}")]
    UnknownLocation(String),

    /// A stored record could not be read back.
    #[error("Corrupt record {key} in {storage}: {reason}")]
    Corrupt {
        /// Storage location name.
        storage: String,
        /// Storage key of the record.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// A ticket as persisted by a backend.
///
/// Everything here has already passed through the cipher: `key` and
/// `parent_key` are encoded ids, and `payload` is the (possibly encrypted)
/// serialized ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTicket {
    /// Encoded ticket id, the primary key.
    pub key: String,

    /// Ticket type prefix, kept in clear for diagnostics and bulk queries.
    pub prefix: String,

    /// Encoded id of the granting ticket.
    pub parent_key: Option<String>,

    /// Serialized, possibly encrypted ticket.
    pub payload: Vec<u8>,

    /// Native TTL hint; never authoritative for expiration.
    pub expires_at: DateTime<Utc>,
}

/// Persistence adapter for tickets.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the registry shares one instance
/// across every request-handling task.
pub trait TicketStorage: Send + Sync {
    /// Insert or overwrite `ticket` in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Look up a record by key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the read fails. A missing record is
    /// `Ok(None)`.
    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>>;

    /// Remove one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails. Deleting a missing record
    /// is `Ok(false)`.
    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Remove several records, best-effort.
    ///
    /// The default implementation deletes one key at a time and skips keys
    /// whose delete fails.
    ///
    /// # Errors
    ///
    /// Backends with a native batch delete return [`StorageError`] if the
    /// batch fails as a whole.
    fn delete_all<'a>(
        &'a self,
        storage: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let mut removed = 0;
            for key in keys {
                match self.delete(storage, key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(storage, key = %key, error = %e, "Batch delete skipped key");
                    }
                }
            }
            Ok(removed)
        })
    }

    /// Remove every record in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the delete fails.
    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>>;

    /// Enumerate every record in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the scan fails.
    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>>;

    /// Number of records in `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the count fails.
    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>>;
}

impl<T: TicketStorage + ?Sized> TicketStorage for Arc<T> {
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        (**self).save(storage, ticket)
    }

    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>> {
        (**self).find(storage, key)
    }

    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        (**self).delete(storage, key)
    }

    fn delete_all<'a>(
        &'a self,
        storage: &'a str,
        keys: &'a [String],
    ) -> BoxFuture<'a, Result<u64, StorageError>> {
        (**self).delete_all(storage, keys)
    }

    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        (**self).clear(storage)
    }

    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>> {
        (**self).scan_all(storage)
    }

    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        (**self).count(storage)
    }
}
