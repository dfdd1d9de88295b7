//! Ticket registry.
//!
//! The registry orchestrates every ticket operation:
//!
//! ```text
//! add/update:  Ticket ──serialize──► cipher.encode ──► storage.save(location)
//! get:         id ──cipher.encode_id──► storage.find ──► cipher.decode ──► predicate
//! delete:      get ──► cascade children ──► storage.delete
//! ```
//!
//! # Expiration
//!
//! Expiration is authoritative here, not in the backend. A backend's native
//! TTL sweep is best-effort and eventually consistent, so every read checks
//! the ticket against the registry clock and an expired ticket is reported
//! exactly like a missing one.
//!
//! # Cascade delete
//!
//! Deleting a ticket-granting ticket deletes every ticket recorded in its
//! `children` map, then walks its proxy-granting tickets the same way, before
//! the ticket itself is removed. A surviving child of a deleted session would
//! outlive the logout, so every child delete is attempted even when an earlier
//! one fails; failures are logged, never fatal.

use crate::catalog::{TicketCatalog, TicketDefinition};
use crate::cipher::{CipherExecutor, NoOpCipher};
use crate::config::RegistryConfig;
use crate::environment::{Clock, SystemClock};
use crate::error::{RegistryError, Result};
use crate::storage::{StoredTicket, TicketStorage};
use crate::ticket::{
    ServiceTicket, Ticket, TicketGrantingTicket, SERVICE_TICKET_PREFIX,
    TICKET_GRANTING_TICKET_PREFIX,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// What a cascading delete removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionOutcome {
    /// Whether the requested ticket's own record was removed.
    pub primary_removed: bool,

    /// Records removed through the cascade.
    pub descendants_removed: u64,
}

impl DeletionOutcome {
    /// Total records removed.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.descendants_removed + if self.primary_removed { 1 } else { 0 }
    }
}

/// Backend-agnostic ticket registry.
///
/// Cheap to clone; clones share the backend, catalog, cipher and clock. The
/// registry keeps no mutable state of its own and is safe to call from any
/// number of tasks.
#[derive(Clone)]
pub struct TicketRegistry {
    storage: Arc<dyn TicketStorage>,
    catalog: Arc<TicketCatalog>,
    cipher: Arc<dyn CipherExecutor>,
    clock: Arc<dyn Clock>,
}

impl TicketRegistry {
    /// Create a registry with no cipher and the system clock.
    #[must_use]
    pub fn new(storage: Arc<dyn TicketStorage>, catalog: TicketCatalog) -> Self {
        Self {
            storage,
            catalog: Arc::new(catalog),
            cipher: Arc::new(NoOpCipher),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a registry from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if the catalog definitions or
    /// the encryption key are invalid.
    pub fn from_config(storage: Arc<dyn TicketStorage>, config: &RegistryConfig) -> Result<Self> {
        let registry =
            Self::new(storage, config.build_catalog()?).with_cipher(config.build_cipher()?);
        tracing::info!(
            locations = registry.catalog.storage_names().len(),
            encryption = registry.cipher.is_enabled(),
            "Ticket registry initialized"
        );
        Ok(registry)
    }

    /// Use `cipher` for ids and payloads.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn CipherExecutor>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Evaluate expiration against `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The catalog used for routing.
    #[must_use]
    pub fn catalog(&self) -> &TicketCatalog {
        &self.catalog
    }

    /// The clock expiration is evaluated against.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ═══════════════════════════════════════════════════════════
    // Encoding
    // ═══════════════════════════════════════════════════════════

    /// Serialize and encode a ticket into its stored form.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Serialization`] or [`RegistryError::Cipher`].
    pub fn encode_ticket(&self, ticket: &Ticket) -> Result<StoredTicket> {
        let serialized = serde_json::to_vec(ticket)?;
        let payload = self.cipher.encode(&serialized)?;
        let state = ticket.state();

        Ok(StoredTicket {
            key: self.cipher.encode_id(ticket.id()),
            prefix: ticket.prefix().to_string(),
            parent_key: state.parent_id().map(|parent| self.cipher.encode_id(parent)),
            payload,
            expires_at: state
                .expiration_policy()
                .storage_deadline(state.creation_time()),
        })
    }

    /// Decode and deserialize a stored ticket.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Cipher`] if the payload fails to decrypt, or
    /// [`RegistryError::Serialization`] if it is not a ticket.
    pub fn decode_ticket(&self, stored: &StoredTicket) -> Result<Ticket> {
        let serialized = self.cipher.decode(&stored.payload)?;
        Ok(serde_json::from_slice(&serialized)?)
    }

    fn definition_for(&self, ticket: &Ticket) -> Result<&TicketDefinition> {
        self.catalog
            .find_for(ticket)
            .ok_or_else(|| RegistryError::UnknownTicketType(ticket.id().to_string()))
    }

    // ═══════════════════════════════════════════════════════════
    // Writes
    // ═══════════════════════════════════════════════════════════

    /// Store a new ticket.
    ///
    /// No retry is performed; retrying is the caller's decision.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::UnknownTicketType`]: no catalog entry for the prefix
    /// - [`RegistryError::Storage`]: the backend write failed
    pub async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.write_ticket(ticket, "add").await
    }

    /// Overwrite a stored ticket (use counts, new children, ...).
    ///
    /// Concurrent updates of the same ticket are last-writer-wins.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_ticket`].
    pub async fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.write_ticket(ticket, "update").await
    }

    async fn write_ticket(&self, ticket: &Ticket, operation: &'static str) -> Result<()> {
        let started = Instant::now();
        let definition = self.definition_for(ticket)?;
        let stored = self.encode_ticket(ticket)?;

        let result = self.storage.save(&definition.storage_name, stored).await;
        record_operation(operation, &definition.storage_name, started, result.is_ok());

        match result {
            Ok(()) => {
                tracing::debug!(
                    ticket_id = ticket.id(),
                    storage = %definition.storage_name,
                    operation,
                    "Stored ticket"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    ticket_id = ticket.id(),
                    storage = %definition.storage_name,
                    operation,
                    error = %e,
                    "Failed to store ticket"
                );
                Err(e.into())
            }
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════

    /// Look a ticket up and return it only if `predicate` accepts it.
    ///
    /// Absent tickets, tickets of an unknown type and tickets rejected by the
    /// predicate all produce `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the backend read fails or the stored
    /// record cannot be decoded.
    pub async fn get_ticket<P>(&self, ticket_id: &str, predicate: P) -> Result<Option<Ticket>>
    where
        P: Fn(&Ticket) -> bool,
    {
        let Some(definition) = self.catalog.find(ticket_id) else {
            tracing::debug!(ticket_id, "No ticket definition for id");
            return Ok(None);
        };
        let key = self.cipher.encode_id(ticket_id);
        if key.is_empty() {
            return Ok(None);
        }

        let started = Instant::now();
        let result = self.storage.find(&definition.storage_name, &key).await;
        record_operation("get", &definition.storage_name, started, result.is_ok());

        let Some(stored) = result? else {
            tracing::debug!(ticket_id, storage = %definition.storage_name, "Ticket not found");
            return Ok(None);
        };

        let ticket = self.decode_ticket(&stored)?;
        if predicate(&ticket) {
            Ok(Some(ticket))
        } else {
            tracing::debug!(ticket_id, "Ticket rejected by predicate");
            Ok(None)
        }
    }

    /// Look a ticket up, treating expired tickets as absent.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_ticket`].
    pub async fn find_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        let now = self.clock.now();
        self.get_ticket(ticket_id, |ticket| !ticket.is_expired(now))
            .await
    }

    /// Look up an unexpired ticket-granting (or proxy-granting) ticket.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_ticket`].
    pub async fn get_ticket_granting_ticket(
        &self,
        ticket_id: &str,
    ) -> Result<Option<TicketGrantingTicket>> {
        let now = self.clock.now();
        let ticket = self
            .get_ticket(ticket_id, |ticket| {
                ticket.as_granting().is_some() && !ticket.is_expired(now)
            })
            .await?;
        Ok(match ticket {
            Some(Ticket::Granting(tgt)) => Some(tgt),
            _ => None,
        })
    }

    /// Look up an unexpired service (or proxy) ticket.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_ticket`].
    pub async fn get_service_ticket(&self, ticket_id: &str) -> Result<Option<ServiceTicket>> {
        let now = self.clock.now();
        let ticket = self
            .get_ticket(ticket_id, |ticket| {
                ticket.as_service().is_some() && !ticket.is_expired(now)
            })
            .await?;
        Ok(match ticket {
            Some(Ticket::Service(st)) => Some(st),
            _ => None,
        })
    }

    /// Every unexpired ticket across all catalog locations.
    ///
    /// Records that fail to decode are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if any location cannot be scanned.
    pub async fn get_tickets(&self) -> Result<Vec<Ticket>> {
        let now = self.clock.now();
        self.get_tickets_filtered(|ticket| !ticket.is_expired(now))
            .await
    }

    /// Every ticket accepted by `predicate`, expired or not.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if any location cannot be scanned.
    pub async fn get_tickets_filtered<P>(&self, predicate: P) -> Result<Vec<Ticket>>
    where
        P: Fn(&Ticket) -> bool,
    {
        let mut tickets = Vec::new();
        for storage in self.catalog.storage_names() {
            tickets.extend(
                self.scan_location(storage)
                    .await?
                    .into_iter()
                    .filter(|ticket| predicate(ticket)),
            );
        }
        Ok(tickets)
    }

    /// Every ticket of one catalog type, expired or not.
    ///
    /// Locations shared between types are filtered by prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if the location cannot be scanned.
    pub async fn scan_tickets(&self, definition: &TicketDefinition) -> Result<Vec<Ticket>> {
        let tickets = self.scan_location(&definition.storage_name).await?;
        Ok(tickets
            .into_iter()
            .filter(|ticket| ticket.prefix() == definition.prefix)
            .collect())
    }

    async fn scan_location(&self, storage: &str) -> Result<Vec<Ticket>> {
        let started = Instant::now();
        let result = self.storage.scan_all(storage).await;
        record_operation("scan", storage, started, result.is_ok());

        let records = result?;
        let mut tickets = Vec::with_capacity(records.len());
        for stored in &records {
            match self.decode_ticket(stored) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    tracing::warn!(
                        storage,
                        key = %stored.key,
                        error = %e,
                        "Skipping undecodable ticket record"
                    );
                }
            }
        }
        Ok(tickets)
    }

    // ═══════════════════════════════════════════════════════════
    // Deletes
    // ═══════════════════════════════════════════════════════════

    /// Remove exactly one ticket, without cascading.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if the backend delete fails.
    pub async fn delete_single_ticket(&self, ticket_id: &str) -> Result<bool> {
        let Some(definition) = self.catalog.find(ticket_id) else {
            tracing::debug!(ticket_id, "No ticket definition for id");
            return Ok(false);
        };
        let key = self.cipher.encode_id(ticket_id);

        let started = Instant::now();
        let result = self.storage.delete(&definition.storage_name, &key).await;
        record_operation("delete", &definition.storage_name, started, result.is_ok());

        let removed = result?;
        tracing::debug!(ticket_id, removed, "Deleted ticket");
        Ok(removed)
    }

    /// Remove a ticket, cascading to its children when it is a
    /// ticket-granting ticket.
    ///
    /// Returns `true` only if the requested ticket's own record was removed.
    /// A record that cannot be decoded is removed on its own, without a
    /// cascade.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the initial lookup or the final delete of
    /// the ticket itself fails. Child delete failures are logged only.
    pub async fn delete_ticket(&self, ticket_id: &str) -> Result<bool> {
        Ok(self.delete_ticket_tree(ticket_id).await?.primary_removed)
    }

    /// [`Self::delete_ticket`], reporting everything that was removed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::delete_ticket`].
    pub async fn delete_ticket_tree(&self, ticket_id: &str) -> Result<DeletionOutcome> {
        let ticket = match self.get_ticket(ticket_id, |_| true).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Ok(DeletionOutcome::default()),
            Err(e @ (RegistryError::Serialization(_) | RegistryError::Cipher(_))) => {
                tracing::warn!(
                    ticket_id,
                    error = %e,
                    "Removing undecodable ticket without cascade"
                );
                return Ok(DeletionOutcome {
                    primary_removed: self.delete_single_ticket(ticket_id).await?,
                    descendants_removed: 0,
                });
            }
            Err(e) => return Err(e),
        };

        let mut outcome = DeletionOutcome::default();
        if let Ticket::Granting(tgt) = &ticket {
            if self.cascades(&ticket) {
                tracing::debug!(
                    ticket_id,
                    children = tgt.children().len(),
                    proxies = tgt.proxy_granting_tickets().len(),
                    "Removing children of ticket"
                );
                outcome.descendants_removed = self.delete_descendants(tgt).await;
            }
        }

        outcome.primary_removed = self.delete_single_ticket(ticket_id).await?;
        metrics::counter!("ticket_registry_cascade_deleted_total")
            .increment(outcome.descendants_removed);
        Ok(outcome)
    }

    fn cascades(&self, ticket: &Ticket) -> bool {
        self.catalog.find_for(ticket).is_some_and(|d| d.cascade)
    }

    /// Delete every child and proxy-granting ticket below `root`.
    ///
    /// Proxy-granting tickets are expanded depth-first so each one's children
    /// go before it does. Each proxy-granting ticket is visited at most once,
    /// so a chain that loops back on itself still terminates.
    async fn delete_descendants(&self, root: &TicketGrantingTicket) -> u64 {
        let mut removed = self.delete_children(root).await;
        let mut visited: HashSet<String> = HashSet::from([root.id().to_string()]);

        // (ticket, children already deleted)
        let mut pending: Vec<(String, bool)> = Vec::new();
        for id in root.proxy_granting_tickets().keys() {
            if visited.insert(id.clone()) {
                pending.push((id.clone(), false));
            }
        }

        while let Some((pgt_id, expanded)) = pending.pop() {
            if !expanded {
                pending.push((pgt_id.clone(), true));
                match self.get_ticket(&pgt_id, |_| true).await {
                    Ok(Some(Ticket::Granting(pgt))) => {
                        removed += self.delete_children(&pgt).await;
                        for id in pgt.proxy_granting_tickets().keys() {
                            if visited.insert(id.clone()) {
                                pending.push((id.clone(), false));
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(
                            ticket_id = %pgt_id,
                            error = %e,
                            "Failed to load proxy-granting ticket for cascade"
                        );
                    }
                }
                continue;
            }
            removed += u64::from(self.delete_child(&pgt_id).await);
        }
        removed
    }

    async fn delete_children(&self, ticket: &TicketGrantingTicket) -> u64 {
        let mut removed = 0;
        for child_id in ticket.children().keys() {
            removed += u64::from(self.delete_child(child_id).await);
        }
        removed
    }

    async fn delete_child(&self, ticket_id: &str) -> bool {
        match self.delete_single_ticket(ticket_id).await {
            Ok(true) => {
                tracing::debug!(ticket_id, "Removed child ticket");
                true
            }
            Ok(false) => {
                tracing::debug!(ticket_id, "Child ticket already gone");
                false
            }
            Err(e) => {
                tracing::warn!(ticket_id, error = %e, "Unable to remove child ticket");
                false
            }
        }
    }

    /// Clear every storage location known to the catalog.
    ///
    /// Intended for cluster-wide resets, not normal traffic.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] on the first location that fails.
    pub async fn delete_all(&self) -> Result<u64> {
        let mut removed = 0;
        for storage in self.catalog.storage_names() {
            let count = self.storage.clear(storage).await?;
            tracing::info!(storage, count, "Cleared ticket storage");
            removed += count;
        }
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════
    // Counts
    // ═══════════════════════════════════════════════════════════

    /// Number of stored ticket-granting tickets (active or not yet swept).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the backend count fails.
    pub async fn session_count(&self) -> Result<u64> {
        self.count_prefix(TICKET_GRANTING_TICKET_PREFIX).await
    }

    /// Number of stored service tickets.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the backend count fails.
    pub async fn service_ticket_count(&self) -> Result<u64> {
        self.count_prefix(SERVICE_TICKET_PREFIX).await
    }

    /// Number of stored tickets across all locations.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Storage`] if any count fails.
    pub async fn count_tickets(&self) -> Result<u64> {
        let mut total = 0;
        for storage in self.catalog.storage_names() {
            total += self.storage.count(storage).await?;
        }
        Ok(total)
    }

    async fn count_prefix(&self, prefix: &str) -> Result<u64> {
        let Some(definition) = self.catalog.find_by_prefix(prefix) else {
            return Ok(0);
        };
        let shared = self
            .catalog
            .find_all()
            .iter()
            .any(|other| other.prefix != prefix && other.storage_name == definition.storage_name);

        if shared {
            Ok(self.scan_tickets(definition).await?.len() as u64)
        } else {
            Ok(self.storage.count(&definition.storage_name).await?)
        }
    }
}

impl std::fmt::Debug for TicketRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketRegistry")
            .field("catalog", &self.catalog)
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

fn record_operation(operation: &'static str, storage: &str, started: Instant, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "ticket_registry_operations_total",
        "operation" => operation,
        "storage" => storage.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "ticket_registry_operation_duration_seconds",
        "operation" => operation
    )
    .record(started.elapsed().as_secs_f64());
}
