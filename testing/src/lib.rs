//! # Ticket Registry Testing
//!
//! Testing utilities for the ticket registry.
//!
//! This crate provides:
//! - In-memory implementations of the backend traits
//!   ([`InMemoryTicketStorage`], [`InMemoryLockStore`])
//! - Fault-injecting wrappers ([`FailingTicketStorage`], [`FailingLockStore`])
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Ticket fixtures
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticket_registry_core::{TicketCatalog, TicketRegistry};
//! use ticket_registry_testing::{InMemoryTicketStorage, ManualClock, fixtures};
//!
//! #[tokio::test]
//! async fn service_ticket_expires() {
//!     let clock = Arc::new(ManualClock::default());
//!     let storage = Arc::new(InMemoryTicketStorage::new());
//!     let registry =
//!         TicketRegistry::new(storage, TicketCatalog::default()).with_clock(clock.clone());
//!
//!     let (tgt, st) = fixtures::session_with_service_ticket(clock.now());
//!     registry.add_ticket(&tgt.into()).await.unwrap();
//!     registry.add_ticket(&st.clone().into()).await.unwrap();
//!
//!     clock.advance(std::time::Duration::from_secs(11));
//!     assert!(registry.find_ticket(st.id()).await.unwrap().is_none());
//! }
//! ```

pub mod fixtures;
pub mod lock_mocks;
pub mod storage_mocks;

use chrono::{DateTime, Utc};
use ticket_registry_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_registry_testing::mocks::FixedClock;
    /// use ticket_registry_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Shared between the registry, the cluster lock and the test body so
    /// expiry can be driven without sleeping.
    ///
    /// ```
    /// use std::time::Duration;
    /// use ticket_registry_testing::mocks::ManualClock;
    /// use ticket_registry_core::environment::Clock;
    ///
    /// let clock = ManualClock::default();
    /// let start = clock.now();
    /// clock.advance(Duration::from_secs(11));
    /// assert_eq!((clock.now() - start).num_seconds(), 11);
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time = time.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, once per process.
///
/// Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use lock_mocks::{FailingLockStore, InMemoryLockStore};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use storage_mocks::{FailingTicketStorage, InMemoryTicketStorage};
