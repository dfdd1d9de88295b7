//! Expired ticket cleanup.
//!
//! One cleaning pass:
//!
//! ```text
//! Idle ──► AcquiringLock ──(refused)──────────────────────────► Idle
//!               │
//!               └─(acquired)─► Scanning ◄─► Deleting ──► ReleasingLock ──► Idle
//! ```
//!
//! The cleaner only deletes tickets that are expired by policy at the time of
//! the sweep. Storage locations are visited in catalog order, and deleting an
//! expired ticket-granting ticket cascades to its children, so the count of
//! removed tickets includes cascaded records exactly once. Each expired
//! ticket-granting ticket is handed to the [`LogoutHandler`] before its
//! cascade delete.

use crate::lock::LockingStrategy;
use crate::logout::{LogoutHandler, NoLogoutHandler};
use crate::registry::TicketRegistry;
use crate::ticket::Ticket;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Phase of the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanerState {
    /// Not running.
    #[default]
    Idle,
    /// Waiting on the cluster lock.
    AcquiringLock,
    /// Enumerating a storage location.
    Scanning,
    /// Removing expired tickets.
    Deleting,
    /// Giving the cluster lock back.
    ReleasingLock,
}

/// Periodic sweeper of expired tickets.
#[derive(Clone)]
pub struct RegistryCleaner {
    registry: TicketRegistry,
    lock: Arc<dyn LockingStrategy>,
    logout: Arc<dyn LogoutHandler>,
    enabled: bool,
    state: Arc<Mutex<CleanerState>>,
}

impl RegistryCleaner {
    /// Create an enabled cleaner.
    #[must_use]
    pub fn new(registry: TicketRegistry, lock: Arc<dyn LockingStrategy>) -> Self {
        Self {
            registry,
            lock,
            logout: Arc::new(NoLogoutHandler),
            enabled: true,
            state: Arc::new(Mutex::new(CleanerState::Idle)),
        }
    }

    /// Enable or disable cleaning.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Notify `logout` of every expired session before it is removed.
    #[must_use]
    pub fn with_logout_handler(mut self, logout: Arc<dyn LogoutHandler>) -> Self {
        self.logout = logout;
        self
    }

    /// Whether [`Self::clean`] does anything.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> CleanerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: CleanerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Run one cleaning pass and return how many tickets were removed.
    ///
    /// Returns 0 without touching storage when disabled or when another node
    /// holds the lock. Never fails: scan and delete errors are logged, the
    /// pass moves on, and the lock is always released.
    pub async fn clean(&self) -> u64 {
        if !self.enabled {
            tracing::debug!("Ticket registry cleaner is disabled");
            return 0;
        }

        self.transition(CleanerState::AcquiringLock);
        if !self.lock.acquire().await {
            tracing::debug!("Cleaner lock held elsewhere, skipping pass");
            metrics::counter!("registry_cleaner_skipped_total").increment(1);
            self.transition(CleanerState::Idle);
            return 0;
        }

        let started = Instant::now();
        let removed = self.sweep().await;

        self.transition(CleanerState::ReleasingLock);
        self.lock.release().await;
        self.transition(CleanerState::Idle);

        metrics::counter!("registry_cleaner_runs_total").increment(1);
        metrics::counter!("registry_cleaner_removed_total").increment(removed);
        metrics::histogram!("registry_cleaner_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        if removed > 0 {
            tracing::info!(removed, "Removed expired tickets");
        } else {
            tracing::debug!("No expired tickets found");
        }
        removed
    }

    async fn sweep(&self) -> u64 {
        let mut removed = 0;

        for definition in self.registry.catalog().find_all() {
            self.transition(CleanerState::Scanning);
            let tickets = match self.registry.scan_tickets(definition).await {
                Ok(tickets) => tickets,
                Err(e) => {
                    tracing::error!(
                        prefix = %definition.prefix,
                        storage = %definition.storage_name,
                        error = %e,
                        "Failed to scan tickets, continuing with next type"
                    );
                    continue;
                }
            };

            let now = self.registry.clock().now();
            let expired: Vec<_> = tickets
                .into_iter()
                .filter(|ticket| ticket.is_expired(now))
                .collect();
            if expired.is_empty() {
                continue;
            }

            self.transition(CleanerState::Deleting);
            tracing::debug!(
                prefix = %definition.prefix,
                count = expired.len(),
                "Deleting expired tickets"
            );
            for ticket in &expired {
                if let Ticket::Granting(tgt) = ticket {
                    self.logout.perform_logout(tgt).await;
                }
                match self.registry.delete_ticket_tree(ticket.id()).await {
                    Ok(outcome) => removed += outcome.total(),
                    Err(e) => {
                        tracing::warn!(
                            ticket_id = ticket.id(),
                            error = %e,
                            "Failed to delete expired ticket"
                        );
                    }
                }
            }
        }
        removed
    }
}

impl std::fmt::Debug for RegistryCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCleaner")
            .field("enabled", &self.enabled)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
