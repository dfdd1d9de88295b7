//! # Ticket Registry Core
//!
//! Core types and orchestration for a single sign-on ticket registry.
//!
//! This crate owns everything that is independent of a concrete persistence
//! backend:
//!
//! - **Ticket model**: ticket-granting tickets, service tickets and their
//!   expiration policies
//! - **Cipher contract**: pluggable encoding of ticket ids and payloads
//! - **Ticket catalog**: storage routing and cascade metadata per ticket type
//! - **Storage contract**: the uniform save/find/delete/scan/count interface
//!   every backend implements
//! - **Ticket registry**: encode/decode around storage calls, cascade delete
//!   and expiration-aware reads
//! - **Cluster lock**: named, time-bounded mutual exclusion backed by a shared
//!   store
//! - **Registry cleaner**: the lock-protected sweep of expired tickets
//!
//! ## Architecture
//!
//! ```text
//! caller ──► TicketRegistry ──► TicketCatalog (routing)
//!                 │         └─► CipherExecutor (encode/decode)
//!                 └──────────► TicketStorage (backend)
//!
//! scheduler ──► RegistryCleaner ──► ClusterLock ──► LockStore (backend)
//!                     └──────────► TicketRegistry
//! ```
//!
//! Backends live in sibling crates (`ticket-registry-postgres`,
//! `ticket-registry-redis`) and in-memory implementations for tests live in
//! `ticket-registry-testing`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ticket_registry_core::{Ticket, TicketCatalog, TicketGrantingTicket, TicketRegistry};
//!
//! let registry = TicketRegistry::new(Arc::new(storage), TicketCatalog::default());
//!
//! let tgt = TicketGrantingTicket::new("TGT-1-abc".into(), authentication, policy, now);
//! registry.add_ticket(&Ticket::from(tgt)).await?;
//!
//! let found = registry.find_ticket("TGT-1-abc").await?;
//! assert!(found.is_some());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use chrono::{DateTime, Utc};

pub mod catalog;
pub mod cipher;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod expiration;
pub mod id;
pub mod lock;
pub mod logout;
pub mod registry;
pub mod storage;
pub mod ticket;

/// Environment abstractions injected into the registry, lock and cleaner.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Expiration is evaluated against this clock, never against a backend's
    /// notion of time.
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_registry_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use catalog::{TicketCatalog, TicketDefinition};
pub use cipher::{AesGcmCipher, CipherError, CipherExecutor, NoOpCipher};
pub use cleaner::{CleanerState, RegistryCleaner};
pub use config::{CleanerConfig, CryptoConfig, LockConfig, RegistryConfig};
pub use environment::{Clock, SystemClock};
pub use error::{RegistryError, Result};
pub use expiration::ExpirationPolicy;
pub use id::TicketIdGenerator;
pub use lock::{ClusterLock, LockRecord, LockStore, LockingStrategy, NoLockingStrategy};
pub use logout::{LogoutHandler, NoLogoutHandler};
pub use registry::{DeletionOutcome, TicketRegistry};
pub use storage::{BoxFuture, StorageError, StoredTicket, TicketStorage};
pub use ticket::{ServiceTicket, Ticket, TicketGrantingTicket, TicketState};
