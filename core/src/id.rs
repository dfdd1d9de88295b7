//! Ticket id generation.
//!
//! Ids have the shape `<prefix>-<counter>-<random>[-<suffix>]`. The prefix
//! routes the ticket through the catalog, the random part carries the
//! unguessability, and the optional suffix names the issuing node.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default length of the random part.
pub const DEFAULT_RANDOM_LENGTH: usize = 32;

/// Generates unique, unguessable ticket ids.
///
/// # Examples
///
/// ```
/// use ticket_registry_core::TicketIdGenerator;
///
/// let generator = TicketIdGenerator::new().with_suffix("node-a");
/// let id = generator.new_ticket_id("ST");
/// assert!(id.starts_with("ST-1-"));
/// assert!(id.ends_with("-node-a"));
/// ```
#[derive(Debug)]
pub struct TicketIdGenerator {
    counter: AtomicU64,
    random_length: usize,
    suffix: Option<String>,
}

impl TicketIdGenerator {
    /// Create a generator with the default random length and no suffix.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            random_length: DEFAULT_RANDOM_LENGTH,
            suffix: None,
        }
    }

    /// Append `suffix` (usually the node name) to every id.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    /// Set the length of the random part.
    #[must_use]
    pub const fn with_random_length(mut self, random_length: usize) -> Self {
        self.random_length = random_length;
        self
    }

    /// Produce the next id for `prefix`.
    pub fn new_ticket_id(&self, prefix: &str) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.random_length)
            .map(char::from)
            .collect();

        match &self.suffix {
            Some(suffix) => format!("{prefix}-{sequence}-{random}-{suffix}"),
            None => format!("{prefix}-{sequence}-{random}"),
        }
    }
}

impl Default for TicketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::ticket_prefix;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_prefix_counter_and_random_part() {
        let generator = TicketIdGenerator::new().with_random_length(8);
        let id = generator.new_ticket_id("TGT");
        let parts: Vec<&str> = id.split('-').collect();

        assert_eq!(parts.len(), 3, "unexpected id shape: {id}");
        assert_eq!(parts.first().copied(), Some("TGT"));
        assert_eq!(parts.get(1).copied(), Some("1"));
        assert_eq!(parts.get(2).map(|random| random.len()), Some(8));
        assert_eq!(ticket_prefix(&id), "TGT");
    }

    #[test]
    fn ids_are_unique() {
        let generator = TicketIdGenerator::new();
        let ids: HashSet<String> = (0..1_000).map(|_| generator.new_ticket_id("ST")).collect();
        assert_eq!(ids.len(), 1_000);
    }

    #[test]
    fn empty_suffix_is_ignored() {
        let generator = TicketIdGenerator::new().with_suffix("");
        assert_eq!(generator.new_ticket_id("PT").split('-').count(), 3);
    }
}
