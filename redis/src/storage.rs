//! Ticket hashes.
//!
//! A record lives at `{namespace}:{storage}:{key}`:
//!
//! | field        | value                                  |
//! |--------------|----------------------------------------|
//! | `prefix`     | ticket type prefix                     |
//! | `parent`     | encoded granting ticket id, if any     |
//! | `payload`    | encoded ticket bytes                   |
//! | `expires_at` | storage deadline, epoch milliseconds   |
//!
//! The deadline doubles as the key's `PEXPIREAT`.

use crate::{RedisConfig, map_redis_error};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use ticket_registry_core::catalog::validate_storage_name;
use ticket_registry_core::{BoxFuture, StorageError, StoredTicket, TicketStorage};

const FIELD_PREFIX: &str = "prefix";
const FIELD_PARENT: &str = "parent";
const FIELD_PAYLOAD: &str = "payload";
const FIELD_EXPIRES_AT: &str = "expires_at";

/// Keys fetched per `SCAN` round trip.
const SCAN_BATCH: usize = 200;

/// Redis ticket storage.
#[derive(Clone)]
pub struct RedisTicketStorage {
    conn_manager: ConnectionManager,
    namespace: String,
}

impl RedisTicketStorage {
    /// Connect using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if Redis is unreachable.
    pub async fn new(config: &RedisConfig) -> Result<Self, StorageError> {
        let conn_manager = config.connect().await?;
        Ok(Self::with_connection(conn_manager, config.namespace.clone()))
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn with_connection(conn_manager: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn_manager,
            namespace: namespace.into(),
        }
    }

    /// Key prefix of every record.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn location(&self, storage: &str) -> Result<String, StorageError> {
        validate_storage_name(storage)
            .map_err(|_| StorageError::UnknownLocation(storage.to_string()))?;
        Ok(format!("{}:{storage}", self.namespace))
    }

    fn record_key(&self, storage: &str, key: &str) -> Result<String, StorageError> {
        Ok(format!("{}:{key}", self.location(storage)?))
    }

    /// Every record key in `storage`, via `SCAN` so large locations never
    /// block the server.
    async fn keys(&self, storage: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}:*", self.location(storage)?);
        let mut conn = self.conn_manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

/// Rebuild a record from its hash fields.
///
/// An empty hash means the key does not exist.
fn decode_record(
    storage: &str,
    key: &str,
    mut fields: HashMap<String, Vec<u8>>,
) -> Result<Option<StoredTicket>, StorageError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let corrupt = |reason: String| StorageError::Corrupt {
        storage: storage.to_string(),
        key: key.to_string(),
        reason,
    };
    let text = |bytes: Vec<u8>, field: &str| {
        String::from_utf8(bytes).map_err(|e| corrupt(format!("field {field}: {e}")))
    };

    let prefix = fields
        .remove(FIELD_PREFIX)
        .ok_or_else(|| corrupt(format!("missing field {FIELD_PREFIX}")))?;
    let payload = fields
        .remove(FIELD_PAYLOAD)
        .ok_or_else(|| corrupt(format!("missing field {FIELD_PAYLOAD}")))?;
    let expires_at = fields
        .remove(FIELD_EXPIRES_AT)
        .ok_or_else(|| corrupt(format!("missing field {FIELD_EXPIRES_AT}")))?;
    let millis: i64 = text(expires_at, FIELD_EXPIRES_AT)?
        .parse()
        .map_err(|e| corrupt(format!("field {FIELD_EXPIRES_AT}: {e}")))?;
    let expires_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(format!("field {FIELD_EXPIRES_AT}: out of range")))?;
    let parent_key = fields
        .remove(FIELD_PARENT)
        .map(|parent| text(parent, FIELD_PARENT))
        .transpose()?;

    Ok(Some(StoredTicket {
        key: key.to_string(),
        prefix: text(prefix, FIELD_PREFIX)?,
        parent_key,
        payload,
        expires_at,
    }))
}

impl TicketStorage for RedisTicketStorage {
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let record_key = self.record_key(storage, &ticket.key)?;
            let mut conn = self.conn_manager.clone();

            let mut hset = redis::cmd("HSET");
            hset.arg(&record_key)
                .arg(FIELD_PREFIX)
                .arg(&ticket.prefix)
                .arg(FIELD_PAYLOAD)
                .arg(&ticket.payload)
                .arg(FIELD_EXPIRES_AT)
                .arg(ticket.expires_at.timestamp_millis());
            if let Some(parent) = &ticket.parent_key {
                hset.arg(FIELD_PARENT).arg(parent);
            }

            // Replace the whole hash so a cleared parent does not linger.
            let _: () = redis::pipe()
                .atomic()
                .del(&record_key)
                .ignore()
                .add_command(hset)
                .ignore()
                .cmd("PEXPIREAT")
                .arg(&record_key)
                .arg(ticket.expires_at.timestamp_millis())
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;

            tracing::trace!(storage, key = %ticket.key, "Saved ticket record");
            Ok(())
        })
    }

    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>> {
        Box::pin(async move {
            let record_key = self.record_key(storage, key)?;
            let mut conn = self.conn_manager.clone();
            let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            decode_record(storage, key, fields)
        })
    }

    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let record_key = self.record_key(storage, key)?;
            let mut conn = self.conn_manager.clone();
            let removed: u64 = redis::cmd("DEL")
                .arg(&record_key)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            Ok(removed > 0)
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
            let record_keys = keys
                .iter()
                .map(|key| self.record_key(storage, key))
                .collect::<Result<Vec<_>, _>>()?;
            let mut conn = self.conn_manager.clone();
            let removed: u64 = redis::cmd("DEL")
                .arg(&record_keys)
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            Ok(removed)
        })
    }

    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let record_keys = self.keys(storage).await?;
            if record_keys.is_empty() {
                return Ok(0);
            }
            let mut conn = self.conn_manager.clone();
            let mut removed = 0;
            for chunk in record_keys.chunks(SCAN_BATCH) {
                let count: u64 = redis::cmd("DEL")
                    .arg(chunk)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error(&e))?;
                removed += count;
            }
            tracing::debug!(storage, removed, "Cleared ticket records");
            Ok(removed)
        })
    }

    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>> {
        Box::pin(async move {
            let location = self.location(storage)?;
            let record_keys = self.keys(storage).await?;
            let mut conn = self.conn_manager.clone();
            let mut tickets = Vec::with_capacity(record_keys.len());

            for chunk in record_keys.chunks(SCAN_BATCH) {
                let mut pipe = redis::pipe();
                for record_key in chunk {
                    pipe.cmd("HGETALL").arg(record_key);
                }
                let rows: Vec<HashMap<String, Vec<u8>>> = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| map_redis_error(&e))?;

                for (record_key, fields) in chunk.iter().zip(rows) {
                    let key = record_key
                        .strip_prefix(&location)
                        .and_then(|rest| rest.strip_prefix(':'))
                        .unwrap_or(record_key);
                    match decode_record(storage, key, fields) {
                        Ok(Some(ticket)) => tickets.push(ticket),
                        // Expired or deleted between SCAN and HGETALL.
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                storage,
                                error = %e,
                                "Skipping unreadable ticket record"
                            );
                        }
                    }
                }
            }
            Ok(tickets)
        })
    }

    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let keys = self.keys(storage).await?;
            Ok(u64::try_from(keys.len()).unwrap_or(u64::MAX))
        })
    }
}
