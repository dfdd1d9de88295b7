//! Ticket model.
//!
//! Tickets are the short-lived credentials issued by the single sign-on
//! server. Two shapes exist:
//!
//! - [`TicketGrantingTicket`]: the root of an authenticated session (`TGT-`),
//!   or a proxy-granting ticket (`PGT-`) chained back to one
//! - [`ServiceTicket`]: an authorization for one target service (`ST-`), or a
//!   proxy ticket (`PT-`) issued under a proxy-granting ticket
//!
//! The ticket-granting ticket records every ticket it has issued in its
//! `children` map. That map is the cascade-delete index: deleting the parent
//! must delete every child.

use crate::expiration::ExpirationPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix of ticket-granting tickets.
pub const TICKET_GRANTING_TICKET_PREFIX: &str = "TGT";

/// Prefix of proxy-granting tickets.
pub const PROXY_GRANTING_TICKET_PREFIX: &str = "PGT";

/// Prefix of service tickets.
pub const SERVICE_TICKET_PREFIX: &str = "ST";

/// Prefix of proxy tickets.
pub const PROXY_TICKET_PREFIX: &str = "PT";

/// Extract the type prefix of a ticket id (`"ST-1-abc"` → `"ST"`).
///
/// An id without a separator is its own prefix.
#[must_use]
pub fn ticket_prefix(ticket_id: &str) -> &str {
    ticket_id
        .split_once('-')
        .map_or(ticket_id, |(prefix, _)| prefix)
}

/// State shared by every ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    id: String,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    previous_time_used: Option<DateTime<Utc>>,
    count_of_uses: u64,
    expiration_policy: ExpirationPolicy,
    parent_id: Option<String>,
}

impl TicketState {
    /// Create fresh state for a ticket issued at `now`.
    #[must_use]
    pub const fn new(
        id: String,
        expiration_policy: ExpirationPolicy,
        parent_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            parent_id,
        }
    }

    /// Ticket id, `<prefix>-<random>`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the ticket was issued.
    #[must_use]
    pub const fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// When the ticket was last consumed (creation time if never).
    #[must_use]
    pub const fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    /// The use before the last one, if any.
    #[must_use]
    pub const fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    /// How many times the ticket has been consumed or validated.
    #[must_use]
    pub const fn count_of_uses(&self) -> u64 {
        self.count_of_uses
    }

    /// The policy governing expiration.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Id of the ticket that granted this one.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Record a use at `now`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Evaluate the expiration policy at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_policy.is_expired(
            self.creation_time,
            self.last_time_used,
            self.count_of_uses,
            now,
        )
    }
}

/// Root credential of an authenticated session.
///
/// A ticket-granting ticket with a `parent_id` is a proxy-granting ticket; it
/// chains back to the session that authorized the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    state: TicketState,
    authentication: serde_json::Value,
    children: BTreeMap<String, String>,
    proxy_granting_tickets: BTreeMap<String, String>,
    proxied_by: Option<String>,
    expired: bool,
}

impl TicketGrantingTicket {
    /// Create a root ticket-granting ticket for an authenticated principal.
    ///
    /// `authentication` is opaque to the registry.
    #[must_use]
    pub fn new(
        id: String,
        authentication: serde_json::Value,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, None, now),
            authentication,
            children: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            proxied_by: None,
            expired: false,
        }
    }

    /// Create a proxy-granting ticket chained to `parent_id`.
    #[must_use]
    pub fn new_proxy(
        id: String,
        parent_id: String,
        proxied_by: String,
        authentication: serde_json::Value,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, Some(parent_id), now),
            authentication,
            children: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
            proxied_by: Some(proxied_by),
            expired: false,
        }
    }

    /// Shared ticket state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        &self.state
    }

    /// Ticket id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// The authentication result this session was created from.
    #[must_use]
    pub const fn authentication(&self) -> &serde_json::Value {
        &self.authentication
    }

    /// Child ticket id → target service, for every ticket this one issued.
    #[must_use]
    pub const fn children(&self) -> &BTreeMap<String, String> {
        &self.children
    }

    /// Proxy-granting ticket id → service that requested the proxy.
    #[must_use]
    pub const fn proxy_granting_tickets(&self) -> &BTreeMap<String, String> {
        &self.proxy_granting_tickets
    }

    /// Service that obtained this proxy-granting ticket.
    #[must_use]
    pub fn proxied_by(&self) -> Option<&str> {
        self.proxied_by.as_deref()
    }

    /// `true` for the original session ticket, `false` for proxy-granting tickets.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.state.parent_id.is_none()
    }

    /// Issue a service ticket for `service` and record it as a child.
    ///
    /// The caller supplies the id so the prefix (`ST` or `PT`) reflects
    /// whether this is a proxy chain.
    pub fn grant_service_ticket(
        &mut self,
        id: String,
        service: String,
        expiration_policy: ExpirationPolicy,
        from_new_login: bool,
        now: DateTime<Utc>,
    ) -> ServiceTicket {
        self.state.mark_used(now);
        self.children.insert(id.clone(), service.clone());
        ServiceTicket {
            state: TicketState::new(id, expiration_policy, Some(self.id().to_string()), now),
            service,
            from_new_login,
        }
    }

    /// Record a proxy-granting ticket issued on behalf of one of this
    /// ticket's service tickets.
    pub fn add_proxy_granting_ticket(&mut self, pgt_id: String, service: String) {
        self.proxy_granting_tickets.insert(pgt_id, service);
    }

    /// Forget a child, e.g. after it was consumed and removed.
    pub fn remove_child(&mut self, ticket_id: &str) -> Option<String> {
        self.children.remove(ticket_id)
    }

    /// Force expiration regardless of policy (used on logout).
    pub const fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// Record a use at `now`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.state.mark_used(now);
    }

    /// `true` if marked expired or the policy says so.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.state.is_expired(now)
    }
}

/// Authorization for a single target service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    state: TicketState,
    service: String,
    from_new_login: bool,
}

impl ServiceTicket {
    /// Shared ticket state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        &self.state
    }

    /// Ticket id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// The target service identifier.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether the ticket was issued as part of a fresh login.
    #[must_use]
    pub const fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Id of the ticket-granting ticket that issued this one.
    #[must_use]
    pub fn granting_ticket_id(&self) -> &str {
        self.state.parent_id().unwrap_or_default()
    }

    /// Issue a proxy-granting ticket for the service holding this ticket.
    ///
    /// The new ticket chains back to this ticket's granting ticket; the caller
    /// records it there with
    /// [`TicketGrantingTicket::add_proxy_granting_ticket`].
    pub fn grant_proxy_granting_ticket(
        &mut self,
        id: String,
        authentication: serde_json::Value,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> TicketGrantingTicket {
        self.state.mark_used(now);
        TicketGrantingTicket::new_proxy(
            id,
            self.granting_ticket_id().to_string(),
            self.service.clone(),
            authentication,
            expiration_policy,
            now,
        )
    }

    /// Record a use at `now`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        self.state.mark_used(now);
    }

    /// `true` if the policy says so.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state.is_expired(now)
    }
}

/// Any ticket held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Ticket {
    /// Ticket-granting or proxy-granting ticket.
    Granting(TicketGrantingTicket),

    /// Service or proxy ticket.
    Service(ServiceTicket),
}

impl Ticket {
    /// Shared ticket state.
    #[must_use]
    pub const fn state(&self) -> &TicketState {
        match self {
            Self::Granting(ticket) => &ticket.state,
            Self::Service(ticket) => &ticket.state,
        }
    }

    /// Ticket id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.state().id()
    }

    /// Type prefix derived from the id.
    #[must_use]
    pub fn prefix(&self) -> &str {
        ticket_prefix(self.id())
    }

    /// Id of the granting ticket, if any.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.state().parent_id()
    }

    /// Record a use at `now`.
    pub fn mark_used(&mut self, now: DateTime<Utc>) {
        match self {
            Self::Granting(ticket) => ticket.mark_used(now),
            Self::Service(ticket) => ticket.mark_used(now),
        }
    }

    /// Evaluate expiration at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Granting(ticket) => ticket.is_expired(now),
            Self::Service(ticket) => ticket.is_expired(now),
        }
    }

    /// Borrow as a ticket-granting ticket.
    #[must_use]
    pub const fn as_granting(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Self::Granting(ticket) => Some(ticket),
            Self::Service(_) => None,
        }
    }

    /// Borrow as a service ticket.
    #[must_use]
    pub const fn as_service(&self) -> Option<&ServiceTicket> {
        match self {
            Self::Service(ticket) => Some(ticket),
            Self::Granting(_) => None,
        }
    }
}

impl From<TicketGrantingTicket> for Ticket {
    fn from(ticket: TicketGrantingTicket) -> Self {
        Self::Granting(ticket)
    }
}

impl From<ServiceTicket> for Ticket {
    fn from(ticket: ServiceTicket) -> Self {
        Self::Service(ticket)
    }
}
