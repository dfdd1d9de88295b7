//! Cluster lock hashes.
//!
//! A lock lives at `{namespace}:lock:{application}` with fields `owner` and
//! `expires_at` (epoch milliseconds). Both are empty strings while the lock
//! is free. Acquire and release are Lua scripts so the check and the write
//! happen in one step on the server.

use crate::{RedisConfig, map_redis_error};
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use ticket_registry_core::{BoxFuture, LockRecord, LockStore, StorageError};

/// KEYS[1] = lock key, ARGV = owner, expires_at, now.
const ACQUIRE_SCRIPT: &str = r"
local owner = redis.call('HGET', KEYS[1], 'owner')
local expires_at = tonumber(redis.call('HGET', KEYS[1], 'expires_at'))
if owner and owner ~= '' and expires_at and expires_at > tonumber(ARGV[3]) then
    return 0
end
redis.call('HSET', KEYS[1], 'owner', ARGV[1], 'expires_at', ARGV[2])
return 1
";

/// KEYS[1] = lock key, ARGV[1] = owner.
const RELEASE_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'owner') == ARGV[1] then
    redis.call('HSET', KEYS[1], 'owner', '', 'expires_at', '')
    return 1
end
return 0
";

/// Redis lock store.
#[derive(Clone)]
pub struct RedisLockStore {
    conn_manager: ConnectionManager,
    namespace: String,
}

impl RedisLockStore {
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

    fn lock_key(&self, application_id: &str) -> String {
        format!("{}:lock:{application_id}", self.namespace)
    }
}

fn decode_lock(
    application_id: &str,
    fields: &HashMap<String, String>,
) -> Result<Option<LockRecord>, StorageError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let owner_id = fields.get("owner").filter(|owner| !owner.is_empty()).cloned();
    let expiration_date = match fields.get("expires_at").filter(|value| !value.is_empty()) {
        None => None,
        Some(value) => {
            let millis: i64 = value.parse().map_err(|e| StorageError::Corrupt {
                storage: "lock".to_string(),
                key: application_id.to_string(),
                reason: format!("field expires_at: {e}"),
            })?;
            DateTime::<Utc>::from_timestamp_millis(millis)
        }
    };
    Ok(Some(LockRecord {
        application_id: application_id.to_string(),
        owner_id,
        expiration_date,
    }))
}

impl LockStore for RedisLockStore {
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let acquired: i64 = redis::Script::new(ACQUIRE_SCRIPT)
                .key(self.lock_key(application_id))
                .arg(owner_id)
                .arg(expires_at.timestamp_millis())
                .arg(now.timestamp_millis())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            Ok(acquired == 1)
        })
    }

    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let released: i64 = redis::Script::new(RELEASE_SCRIPT)
                .key(self.lock_key(application_id))
                .arg(owner_id)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            Ok(released == 1)
        })
    }

    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let fields: HashMap<String, String> = redis::cmd("HGETALL")
                .arg(self.lock_key(application_id))
                .query_async(&mut conn)
                .await
                .map_err(|e| map_redis_error(&e))?;
            decode_lock(application_id, &fields)
        })
    }
}
