//! Logout notification for sessions ended by the cleaner.
//!
//! When the cleaner removes an expired ticket-granting ticket, the services
//! that received tickets under that session are told before the session is
//! deleted. The handler sees the ticket while its `children` map is still
//! intact.

use crate::storage::BoxFuture;
use crate::ticket::TicketGrantingTicket;

/// Notifies services that a session has ended.
///
/// Implementations must not fail the sweep: errors are theirs to log.
pub trait LogoutHandler: Send + Sync {
    /// Called once per expired ticket-granting ticket, before it is deleted.
    fn perform_logout<'a>(&'a self, ticket: &'a TicketGrantingTicket) -> BoxFuture<'a, ()>;
}

/// Handler that notifies nobody.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogoutHandler;

impl LogoutHandler for NoLogoutHandler {
    fn perform_logout<'a>(&'a self, ticket: &'a TicketGrantingTicket) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::trace!(ticket_id = ticket.id(), "Logout notification disabled");
        })
    }
}
