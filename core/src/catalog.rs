//! Ticket catalog.
//!
//! The catalog maps each ticket-type prefix to where its tickets are stored,
//! whether deleting one must cascade to the tickets it issued, and the
//! expiration policy new tickets of that type get by default.

use crate::error::{RegistryError, Result};
use crate::expiration::ExpirationPolicy;
use crate::ticket::{
    ticket_prefix, Ticket, PROXY_GRANTING_TICKET_PREFIX, PROXY_TICKET_PREFIX,
    SERVICE_TICKET_PREFIX, TICKET_GRANTING_TICKET_PREFIX,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest storage name accepted (`PostgreSQL` identifier limit).
const MAX_STORAGE_NAME_LENGTH: usize = 63;

/// Metadata describing one ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketDefinition {
    /// Id prefix that identifies the type (`TGT`, `ST`, ...).
    pub prefix: String,

    /// Storage location: table, collection or key namespace.
    pub storage_name: String,

    /// Whether deleting a ticket of this type deletes the tickets it issued.
    pub cascade: bool,

    /// Default policy for newly issued tickets of this type.
    pub expiration_policy: ExpirationPolicy,
}

impl TicketDefinition {
    /// Create a definition.
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        storage_name: impl Into<String>,
        cascade: bool,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            storage_name: storage_name.into(),
            cascade,
            expiration_policy,
        }
    }
}

/// Registry of ticket definitions, in registration order.
///
/// Registration order matters: the cleaner sweeps storage locations in this
/// order, so granting types are registered before the types they issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketCatalog {
    definitions: Vec<TicketDefinition>,
}

impl TicketCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            definitions: Vec::new(),
        }
    }

    /// Register a definition, replacing any existing one with the same prefix.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Configuration`] if the prefix is empty or
    /// contains `-`, or if the storage name is not a plain lowercase
    /// identifier.
    pub fn register(&mut self, definition: TicketDefinition) -> Result<()> {
        if definition.prefix.is_empty() || definition.prefix.contains('-') {
            return Err(RegistryError::Configuration(format!(
                "Invalid ticket prefix: {:?}",
                definition.prefix
            )));
        }
        validate_storage_name(&definition.storage_name)?;

        if let Some(existing) = self
            .definitions
            .iter_mut()
            .find(|existing| existing.prefix == definition.prefix)
        {
            tracing::debug!(prefix = %definition.prefix, "Replacing ticket definition");
            *existing = definition;
        } else {
            tracing::debug!(
                prefix = %definition.prefix,
                storage = %definition.storage_name,
                cascade = definition.cascade,
                "Registered ticket definition"
            );
            self.definitions.push(definition);
        }
        Ok(())
    }

    /// Build a catalog from definitions.
    ///
    /// # Errors
    ///
    /// Returns the first validation error from [`Self::register`].
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = TicketDefinition>,
    ) -> Result<Self> {
        let mut catalog = Self::empty();
        for definition in definitions {
            catalog.register(definition)?;
        }
        Ok(catalog)
    }

    /// Find the definition for a ticket id by its prefix.
    #[must_use]
    pub fn find(&self, ticket_id: &str) -> Option<&TicketDefinition> {
        self.find_by_prefix(ticket_prefix(ticket_id))
    }

    /// Find a definition by prefix.
    #[must_use]
    pub fn find_by_prefix(&self, prefix: &str) -> Option<&TicketDefinition> {
        self.definitions
            .iter()
            .find(|definition| definition.prefix == prefix)
    }

    /// Find the definition for a ticket.
    #[must_use]
    pub fn find_for(&self, ticket: &Ticket) -> Option<&TicketDefinition> {
        self.find(ticket.id())
    }

    /// All definitions, in registration order.
    #[must_use]
    pub fn find_all(&self) -> &[TicketDefinition] {
        &self.definitions
    }

    /// Distinct storage names, in registration order.
    #[must_use]
    pub fn storage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::with_capacity(self.definitions.len());
        for definition in &self.definitions {
            if !names.contains(&definition.storage_name.as_str()) {
                names.push(&definition.storage_name);
            }
        }
        names
    }
}

impl Default for TicketCatalog {
    /// The standard ticket types with their classic default policies:
    /// sessions live 8 hours with a 2 hour idle timeout, service and proxy
    /// tickets are single-use and live 10 seconds.
    fn default() -> Self {
        let session = ExpirationPolicy::ticket_granting(
            Duration::from_secs(8 * 60 * 60),
            Duration::from_secs(2 * 60 * 60),
        );
        let single_use = ExpirationPolicy::multi_time_use(1, Duration::from_secs(10));

        Self {
            definitions: vec![
                TicketDefinition::new(
                    TICKET_GRANTING_TICKET_PREFIX,
                    "ticket_granting_tickets",
                    true,
                    session,
                ),
                TicketDefinition::new(
                    PROXY_GRANTING_TICKET_PREFIX,
                    "proxy_granting_tickets",
                    true,
                    session,
                ),
                TicketDefinition::new(SERVICE_TICKET_PREFIX, "service_tickets", false, single_use),
                TicketDefinition::new(PROXY_TICKET_PREFIX, "proxy_tickets", false, single_use),
            ],
        }
    }
}

/// Check that `name` is safe to use verbatim as a table or key namespace.
///
/// # Errors
///
/// Returns [`RegistryError::Configuration`] unless `name` matches
/// `[a-z_][a-z0-9_]*` and fits in 63 bytes.
pub fn validate_storage_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_lowercase() || first == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_STORAGE_NAME_LENGTH {
        Ok(())
    } else {
        Err(RegistryError::Configuration(format!(
            "Invalid storage name: {name:?}"
        )))
    }
}
