//! In-memory lock stores.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use ticket_registry_core::lock::{LockRecord, LockStore};
use ticket_registry_core::storage::{BoxFuture, StorageError};

/// Mutex-guarded lock table; each call is atomic with respect to all others.
#[derive(Clone, Debug, Default)]
pub struct InMemoryLockStore {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
}

impl InMemoryLockStore {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a record.
    #[must_use]
    pub fn record(&self, application_id: &str) -> Option<LockRecord> {
        self.records.lock().unwrap().get(application_id).cloned()
    }
}

impl LockStore for InMemoryLockStore {
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            let available = records
                .get(application_id)
                .is_none_or(|record| record.is_available_at(now));
            if available {
                records.insert(
                    application_id.to_string(),
                    LockRecord {
                        application_id: application_id.to_string(),
                        owner_id: Some(owner_id.to_string()),
                        expiration_date: Some(expires_at),
                    },
                );
            }
            Ok(available)
        })
    }

    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            let mut records = self.records.lock().unwrap();
            match records.get_mut(application_id) {
                Some(record) if record.owner_id.as_deref() == Some(owner_id) => {
                    record.owner_id = None;
                    record.expiration_date = None;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>> {
        Box::pin(async move { Ok(self.record(application_id)) })
    }
}

/// Lock store that can be switched into failing every call.
#[derive(Clone, Debug, Default)]
pub struct FailingLockStore {
    inner: InMemoryLockStore,
    failing: Arc<AtomicBool>,
}

impl FailingLockStore {
    /// Healthy store backed by a fresh lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call while `failing` is set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The wrapped lock table.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryLockStore {
        &self.inner
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StorageError::Connection("injected lock store failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl LockStore for FailingLockStore {
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            self.check()?;
            self.inner
                .try_acquire(application_id, owner_id, expires_at, now)
                .await
        })
    }

    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            self.check()?;
            self.inner.release(application_id, owner_id).await
        })
    }

    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>> {
        Box::pin(async move {
            self.check()?;
            self.inner.find(application_id).await
        })
    }
}
