//! Ticket fixtures.
//!
//! Policies mirror the standard catalog: sessions live 8 hours with a
//! 2 hour idle timeout, service tickets are single-use and live 10 seconds.

use chrono::{DateTime, Utc};
use std::time::Duration;
use ticket_registry_core::ticket::{PROXY_GRANTING_TICKET_PREFIX, SERVICE_TICKET_PREFIX};
use ticket_registry_core::{ExpirationPolicy, ServiceTicket, TicketGrantingTicket};

/// Default service URL used by fixtures.
pub const SERVICE: &str = "https://app.example.com";

/// Session policy: 8h hard, 2h idle.
#[must_use]
pub const fn session_policy() -> ExpirationPolicy {
    ExpirationPolicy::ticket_granting(Duration::from_secs(8 * 3600), Duration::from_secs(2 * 3600))
}

/// Service ticket policy: single use, 10 seconds.
#[must_use]
pub const fn service_ticket_policy() -> ExpirationPolicy {
    ExpirationPolicy::multi_time_use(1, Duration::from_secs(10))
}

/// Authentication payload for `principal`.
#[must_use]
pub fn authentication(principal: &str) -> serde_json::Value {
    serde_json::json!({
        "principal": principal,
        "attributes": { "memberOf": ["staff"] },
        "handler": "PasswordHandler",
    })
}

/// A fresh session ticket.
#[must_use]
pub fn ticket_granting_ticket(id: &str, now: DateTime<Utc>) -> TicketGrantingTicket {
    TicketGrantingTicket::new(
        id.to_string(),
        authentication("casuser"),
        session_policy(),
        now,
    )
}

/// `TGT-1` with one child `ST-1`, as stored right after the grant.
#[must_use]
pub fn session_with_service_ticket(
    now: DateTime<Utc>,
) -> (TicketGrantingTicket, ServiceTicket) {
    let mut tgt = ticket_granting_ticket("TGT-1", now);
    let st = tgt.grant_service_ticket(
        format!("{SERVICE_TICKET_PREFIX}-1"),
        SERVICE.to_string(),
        service_ticket_policy(),
        true,
        now,
    );
    (tgt, st)
}

/// A session that issued `children` service tickets named `ST-<tag>-<n>`.
#[must_use]
pub fn session_with_children(
    tgt_id: &str,
    tag: &str,
    children: usize,
    now: DateTime<Utc>,
) -> (TicketGrantingTicket, Vec<ServiceTicket>) {
    let mut tgt = ticket_granting_ticket(tgt_id, now);
    let tickets = (1..=children)
        .map(|n| {
            tgt.grant_service_ticket(
                format!("{SERVICE_TICKET_PREFIX}-{tag}-{n}"),
                format!("{SERVICE}/{n}"),
                service_ticket_policy(),
                false,
                now,
            )
        })
        .collect();
    (tgt, tickets)
}

/// Issue a proxy-granting ticket through `st` and record it on `tgt`.
#[must_use]
pub fn proxy_granting_ticket(
    tgt: &mut TicketGrantingTicket,
    st: &mut ServiceTicket,
    tag: &str,
    now: DateTime<Utc>,
) -> TicketGrantingTicket {
    let pgt = st.grant_proxy_granting_ticket(
        format!("{PROXY_GRANTING_TICKET_PREFIX}-{tag}"),
        tgt.authentication().clone(),
        session_policy(),
        now,
    );
    tgt.add_proxy_granting_ticket(pgt.id().to_string(), st.service().to_string());
    pgt
}
