//! Cluster-wide mutual exclusion for maintenance work.
//!
//! A lock is identified by an application id and held by at most one owner
//! at a time. Every lock carries an expiration date so a crashed holder cannot
//! block the cluster forever: once the date has passed, any node may take the
//! lock over.
//!
//! The lock is **not reentrant**. An owner that already holds the lock and
//! asks again is refused, exactly like any other contender.
//!
//! # Layers
//!
//! - [`LockStore`]: the backend primitive (conditional write on a record)
//! - [`ClusterLock`]: binds an application id, an owner id and a TTL to a
//!   store and implements [`LockingStrategy`]
//! - [`NoLockingStrategy`]: single-node deployments

use crate::environment::{Clock, SystemClock};
use crate::storage::{BoxFuture, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Persisted state of one named lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Name of the lock.
    pub application_id: String,

    /// Current holder, `None` when released.
    pub owner_id: Option<String>,

    /// When the current hold lapses, `None` when released.
    pub expiration_date: Option<DateTime<Utc>>,
}

impl LockRecord {
    /// Whether someone holds the lock at `now`.
    #[must_use]
    pub fn is_held_at(&self, now: DateTime<Utc>) -> bool {
        self.owner_id.is_some() && self.expiration_date.is_some_and(|expires| expires > now)
    }

    /// Whether a new owner may take the lock at `now`.
    #[must_use]
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_held_at(now)
    }
}

/// Backend primitive behind [`ClusterLock`].
///
/// # Contract
///
/// `try_acquire` must be atomic with respect to every other `try_acquire`
/// and `release` on the same application id, across every node sharing the
/// backend. It succeeds iff there is no record, the record has no owner, or
/// the record's expiration date is at or before `now`.
pub trait LockStore: Send + Sync {
    /// Take the lock for `owner_id` until `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails. Contention is
    /// `Ok(false)`, not an error.
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Release the lock if `owner_id` holds it.
    ///
    /// Returns `true` iff the record was owned by `owner_id` and is now
    /// released. A release by anyone else changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Read the current record, if one was ever written.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>>;
}

impl<T: LockStore + ?Sized> LockStore for Arc<T> {
    fn try_acquire<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        (**self).try_acquire(application_id, owner_id, expires_at, now)
    }

    fn release<'a>(
        &'a self,
        application_id: &'a str,
        owner_id: &'a str,
    ) -> BoxFuture<'a, Result<bool, StorageError>> {
        (**self).release(application_id, owner_id)
    }

    fn find<'a>(
        &'a self,
        application_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LockRecord>, StorageError>> {
        (**self).find(application_id)
    }
}

/// Guard for work that must run on one node at a time.
///
/// Neither method fails: a backend error during acquisition is reported as
/// `false`, and a failed release is logged and left to expiry.
pub trait LockingStrategy: Send + Sync {
    /// Try to take the lock without waiting.
    fn acquire(&self) -> BoxFuture<'_, bool>;

    /// Give the lock back. Releasing a lock not held is a no-op.
    fn release(&self) -> BoxFuture<'_, ()>;
}

/// Locking strategy that always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLockingStrategy;

impl LockingStrategy for NoLockingStrategy {
    fn acquire(&self) -> BoxFuture<'_, bool> {
        Box::pin(async { true })
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// A named lock held by this node, backed by a [`LockStore`].
///
/// # Example
///
/// ```ignore
/// let lock = ClusterLock::new("ticket-registry-cleaner", Arc::new(store))
///     .with_ttl(Duration::from_secs(3600));
///
/// if lock.acquire().await {
///     // exclusive section
///     lock.release().await;
/// }
/// ```
#[derive(Clone)]
pub struct ClusterLock {
    application_id: String,
    owner_id: String,
    ttl: Duration,
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
}

impl ClusterLock {
    /// Default hold time before the lock may be taken over.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

    /// Shortest hold time. A hold must outlive the instant it was taken,
    /// otherwise every record would be free the moment it is written.
    pub const MIN_TTL: Duration = Duration::from_secs(1);

    /// Create a lock with a generated owner id and the default TTL.
    #[must_use]
    pub fn new(application_id: impl Into<String>, store: Arc<dyn LockStore>) -> Self {
        Self {
            application_id: application_id.into(),
            owner_id: default_owner_id(),
            ttl: Self::DEFAULT_TTL,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Use an explicit owner id.
    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    /// Set how long a hold lasts, raised to [`Self::MIN_TTL`] if shorter.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.as_nanos() < Self::MIN_TTL.as_nanos() {
            Self::MIN_TTL
        } else {
            ttl
        };
        self
    }

    /// How long a hold lasts.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Name of the lock.
    #[must_use]
    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// This node's owner id.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Current holder, if the lock is held right now.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn current_owner(&self) -> Result<Option<String>, StorageError> {
        let now = self.clock.now();
        Ok(self
            .store
            .find(&self.application_id)
            .await?
            .filter(|record| record.is_held_at(now))
            .and_then(|record| record.owner_id))
    }

    async fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        match self
            .store
            .try_acquire(&self.application_id, &self.owner_id, expires_at, now)
            .await
        {
            Ok(acquired) => {
                let outcome = if acquired { "acquired" } else { "contended" };
                metrics::counter!(
                    "cluster_lock_acquire_total",
                    "application" => self.application_id.clone(),
                    "outcome" => outcome
                )
                .increment(1);
                tracing::debug!(
                    application_id = %self.application_id,
                    owner_id = %self.owner_id,
                    acquired,
                    "Lock acquisition attempted"
                );
                acquired
            }
            Err(e) => {
                metrics::counter!(
                    "cluster_lock_acquire_total",
                    "application" => self.application_id.clone(),
                    "outcome" => "error"
                )
                .increment(1);
                tracing::warn!(
                    application_id = %self.application_id,
                    owner_id = %self.owner_id,
                    error = %e,
                    "Lock acquisition failed"
                );
                false
            }
        }
    }

    async fn try_release(&self) {
        match self
            .store
            .release(&self.application_id, &self.owner_id)
            .await
        {
            Ok(true) => {
                metrics::counter!(
                    "cluster_lock_release_total",
                    "application" => self.application_id.clone()
                )
                .increment(1);
                tracing::debug!(
                    application_id = %self.application_id,
                    owner_id = %self.owner_id,
                    "Released lock"
                );
            }
            Ok(false) => {
                tracing::debug!(
                    application_id = %self.application_id,
                    owner_id = %self.owner_id,
                    "Lock not held by this owner, nothing to release"
                );
            }
            Err(e) => {
                tracing::warn!(
                    application_id = %self.application_id,
                    owner_id = %self.owner_id,
                    error = %e,
                    "Lock release failed, hold will lapse at expiry"
                );
            }
        }
    }
}

impl LockingStrategy for ClusterLock {
    fn acquire(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.try_acquire())
    }

    fn release(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.try_release())
    }
}

impl std::fmt::Debug for ClusterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterLock")
            .field("application_id", &self.application_id)
            .field("owner_id", &self.owner_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// `<host>-<uuid>`, unique per process.
#[must_use]
pub fn default_owner_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| "node".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4())
}
