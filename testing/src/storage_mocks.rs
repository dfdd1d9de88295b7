//! In-memory ticket storage for fast, deterministic tests.
//!
//! - [`InMemoryTicketStorage`]: `HashMap`-backed [`TicketStorage`]
//! - [`FailingTicketStorage`]: wraps another storage and fails chosen
//!   locations or operations

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on poisoned locks

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use ticket_registry_core::storage::{BoxFuture, StorageError, StoredTicket, TicketStorage};

type Locations = HashMap<String, HashMap<String, StoredTicket>>;

/// In-memory ticket storage.
///
/// Locations are created on first write; reading an unknown location behaves
/// like reading an empty one.
///
/// # Example
///
/// ```
/// use ticket_registry_testing::InMemoryTicketStorage;
///
/// let storage = InMemoryTicketStorage::new();
/// assert!(storage.is_empty());
/// assert_eq!(storage.len("service_tickets"), 0);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStorage {
    data: Arc<RwLock<Locations>>,
}

impl InMemoryTicketStorage {
    /// Create a new empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in `storage`.
    #[must_use]
    pub fn len(&self, storage: &str) -> usize {
        self.data.read().unwrap().get(storage).map_or(0, HashMap::len)
    }

    /// Whether every location is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().values().all(HashMap::is_empty)
    }

    /// Raw record lookup, bypassing the registry.
    #[must_use]
    pub fn raw(&self, storage: &str, key: &str) -> Option<StoredTicket> {
        self.data
            .read()
            .unwrap()
            .get(storage)
            .and_then(|records| records.get(key))
            .cloned()
    }

    /// Overwrite a record's payload, for corruption tests.
    pub fn corrupt(&self, storage: &str, key: &str, payload: Vec<u8>) {
        if let Some(record) = self
            .data
            .write()
            .unwrap()
            .get_mut(storage)
            .and_then(|records| records.get_mut(key))
        {
            record.payload = payload;
        }
    }
}

impl TicketStorage for InMemoryTicketStorage {
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.data
                .write()
                .unwrap()
                .entry(storage.to_string())
                .or_default()
                .insert(ticket.key.clone(), ticket);
            Ok(())
        })
    }

    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>> {
        Box::pin(async move { Ok(self.raw(storage, key)) })
    }

    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            Ok(self
                .data
                .write()
                .unwrap()
                .get_mut(storage)
                .and_then(|records| records.remove(key))
                .is_some())
        })
    }

    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move {
            let removed = self
                .data
                .write()
                .unwrap()
                .remove(storage)
                .map_or(0, |records| records.len());
            Ok(removed as u64)
        })
    }

    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>> {
        Box::pin(async move {
            Ok(self
                .data
                .read()
                .unwrap()
                .get(storage)
                .map(|records| records.values().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        Box::pin(async move { Ok(self.len(storage) as u64) })
    }
}

/// Operations a [`FailingTicketStorage`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOperation {
    /// `save`
    Save,
    /// `find`
    Find,
    /// `delete`
    Delete,
    /// `scan_all`
    Scan,
}

/// Storage wrapper that fails chosen operations on chosen locations.
///
/// Everything not configured to fail is forwarded to the inner storage.
#[derive(Clone, Debug)]
pub struct FailingTicketStorage<S> {
    inner: S,
    failures: Arc<RwLock<HashSet<(String, StorageOperation)>>>,
}

impl<S: TicketStorage> FailingTicketStorage<S> {
    /// Wrap `inner` with no failures configured.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Make `operation` on `storage` fail from now on.
    pub fn fail(&self, storage: &str, operation: StorageOperation) {
        self.failures
            .write()
            .unwrap()
            .insert((storage.to_string(), operation));
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.failures.write().unwrap().clear();
    }

    /// The wrapped storage.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, storage: &str, operation: StorageOperation) -> Result<(), StorageError> {
        if self
            .failures
            .read()
            .unwrap()
            .contains(&(storage.to_string(), operation))
        {
            Err(StorageError::Connection(format!(
                "injected {operation:?} failure on {storage}"
            )))
        } else {
            Ok(())
        }
    }
}

impl<S: TicketStorage> TicketStorage for FailingTicketStorage<S> {
    fn save<'a>(
        &'a self,
        storage: &'a str,
        ticket: StoredTicket,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.check(storage, StorageOperation::Save)?;
            self.inner.save(storage, ticket).await
        })
    }

    fn find<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<StoredTicket>, StorageError>> {
        Box::pin(async move {
            self.check(storage, StorageOperation::Find)?;
            self.inner.find(storage, key).await
        })
    }

    fn delete<'a>(
        &'a self,
        storage: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move {
            self.check(storage, StorageOperation::Delete)?;
            self.inner.delete(storage, key).await
        })
    }

    fn clear<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        self.inner.clear(storage)
    }

    fn scan_all<'a>(
        &'a self,
        storage: &'a str,
    ) -> BoxFuture<'a, Result<Vec<StoredTicket>, StorageError>> {
        Box::pin(async move {
            self.check(storage, StorageOperation::Scan)?;
            self.inner.scan_all(storage).await
        })
    }

    fn count<'a>(&'a self, storage: &'a str) -> BoxFuture<'a, Result<u64, StorageError>> {
        self.inner.count(storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(key: &str) -> StoredTicket {
        StoredTicket {
            key: key.to_string(),
            prefix: "ST".to_string(),
            parent_key: Some("TGT-1".to_string()),
            payload: b"{}".to_vec(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let storage = InMemoryTicketStorage::new();
        storage.save("service_tickets", record("ST-1")).await.unwrap();

        let mut updated = record("ST-1");
        updated.payload = b"{\"v\":2}".to_vec();
        storage.save("service_tickets", updated.clone()).await.unwrap();

        assert_eq!(storage.len("service_tickets"), 1);
        assert_eq!(
            storage.find("service_tickets", "ST-1").await.unwrap(),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn locations_are_independent() {
        let storage = InMemoryTicketStorage::new();
        storage.save("service_tickets", record("ST-1")).await.unwrap();

        assert!(storage.find("proxy_tickets", "ST-1").await.unwrap().is_none());
        assert!(!storage.delete("proxy_tickets", "ST-1").await.unwrap());
        assert_eq!(storage.count("service_tickets").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_counts_removed_keys() {
        let storage = InMemoryTicketStorage::new();
        storage.save("service_tickets", record("ST-1")).await.unwrap();
        storage.save("service_tickets", record("ST-2")).await.unwrap();

        let keys = vec!["ST-1".to_string(), "ST-2".to_string(), "ST-3".to_string()];
        assert_eq!(storage.delete_all("service_tickets", &keys).await.unwrap(), 2);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_hit_only_their_location() {
        let storage = FailingTicketStorage::new(InMemoryTicketStorage::new());
        storage.fail("service_tickets", StorageOperation::Save);

        assert!(storage.save("service_tickets", record("ST-1")).await.is_err());
        assert!(storage.save("proxy_tickets", record("PT-1")).await.is_ok());

        storage.heal();
        assert!(storage.save("service_tickets", record("ST-1")).await.is_ok());
        assert_eq!(storage.inner().len("service_tickets"), 1);
    }
}
