//! Ticket expiration policies.
//!
//! A policy is a value object carried inside every ticket. Expiration is a
//! computed property evaluated at read time against an injected clock; reaching
//! the expired state never deletes anything by itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound used when a ticket has no hard time-to-live.
///
/// Backends receive `creation_time + MAX_STORAGE_TTL` as their native TTL
/// hint in that case (ten years).
pub const MAX_STORAGE_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Expiration rules for a ticket.
///
/// Every bound is optional; `None` means "never". A ticket is expired when any
/// configured bound is exceeded:
///
/// - `now - creation_time > time_to_live`
/// - `now - last_time_used > time_to_idle`
/// - `count_of_uses >= max_uses`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use ticket_registry_core::ExpirationPolicy;
///
/// let policy = ExpirationPolicy::multi_time_use(1, Duration::from_secs(10));
/// assert_eq!(policy.max_uses, Some(1));
/// assert_eq!(policy.time_to_live, Some(Duration::from_secs(10)));
/// assert_eq!(policy.time_to_idle, None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Maximum lifetime measured from creation.
    pub time_to_live: Option<Duration>,

    /// Maximum inactivity measured from the last use.
    pub time_to_idle: Option<Duration>,

    /// Number of uses after which the ticket is spent.
    pub max_uses: Option<u64>,
}

impl ExpirationPolicy {
    /// A policy that never expires the ticket.
    #[must_use]
    pub const fn never_expires() -> Self {
        Self {
            time_to_live: None,
            time_to_idle: None,
            max_uses: None,
        }
    }

    /// Expire a fixed time after creation regardless of use.
    #[must_use]
    pub const fn hard_timeout(time_to_live: Duration) -> Self {
        Self {
            time_to_live: Some(time_to_live),
            time_to_idle: None,
            max_uses: None,
        }
    }

    /// Expire after a period of inactivity.
    #[must_use]
    pub const fn timeout(time_to_idle: Duration) -> Self {
        Self {
            time_to_live: None,
            time_to_idle: Some(time_to_idle),
            max_uses: None,
        }
    }

    /// Expire after `max_uses` uses or `time_to_live`, whichever comes first.
    ///
    /// Service and proxy tickets default to `multi_time_use(1, 10s)`.
    #[must_use]
    pub const fn multi_time_use(max_uses: u64, time_to_live: Duration) -> Self {
        Self {
            time_to_live: Some(time_to_live),
            time_to_idle: None,
            max_uses: Some(max_uses),
        }
    }

    /// Ticket-granting policy: a hard maximum lifetime plus an idle timeout.
    #[must_use]
    pub const fn ticket_granting(max_time_to_live: Duration, time_to_idle: Duration) -> Self {
        Self {
            time_to_live: Some(max_time_to_live),
            time_to_idle: Some(time_to_idle),
            max_uses: None,
        }
    }

    /// Evaluate the policy.
    ///
    /// A clock that reads earlier than `creation_time` or `last_time_used`
    /// never expires a ticket by time.
    #[must_use]
    pub fn is_expired(
        &self,
        creation_time: DateTime<Utc>,
        last_time_used: DateTime<Utc>,
        count_of_uses: u64,
        now: DateTime<Utc>,
    ) -> bool {
        if self.max_uses.is_some_and(|max| count_of_uses >= max) {
            return true;
        }
        if self
            .time_to_live
            .is_some_and(|ttl| elapsed_beyond(creation_time, now, ttl))
        {
            return true;
        }
        self.time_to_idle
            .is_some_and(|tti| elapsed_beyond(last_time_used, now, tti))
    }

    /// Deadline handed to backends as a native TTL hint.
    ///
    /// This is `creation_time + time_to_live`, capped at [`MAX_STORAGE_TTL`].
    /// It is never authoritative: the registry re-evaluates expiration on
    /// every read.
    #[must_use]
    pub fn storage_deadline(&self, creation_time: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = self
            .time_to_live
            .map_or(MAX_STORAGE_TTL, |ttl| ttl.min(MAX_STORAGE_TTL));
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| creation_time.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// `true` when strictly more than `limit` has passed between `since` and `now`.
fn elapsed_beyond(since: DateTime<Utc>, now: DateTime<Utc>, limit: Duration) -> bool {
    now.signed_duration_since(since)
        .to_std()
        .is_ok_and(|elapsed| elapsed > limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_735_689_600 + seconds, 0).unwrap_or_default()
    }

    #[test]
    fn never_expires_ignores_time_and_uses() {
        let policy = ExpirationPolicy::never_expires();
        assert!(!policy.is_expired(at(0), at(0), 1_000, at(1_000_000_000)));
    }

    #[test]
    fn hard_timeout_is_strict() {
        let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(10));
        assert!(!policy.is_expired(at(0), at(0), 0, at(10)));
        assert!(policy.is_expired(at(0), at(0), 0, at(11)));
    }

    #[test]
    fn idle_timeout_rolls_with_last_use() {
        let policy = ExpirationPolicy::timeout(Duration::from_secs(60));
        assert!(policy.is_expired(at(0), at(0), 0, at(61)));
        assert!(!policy.is_expired(at(0), at(30), 1, at(61)));
    }

    #[test]
    fn use_count_limit_expires_at_max() {
        let policy = ExpirationPolicy::multi_time_use(1, Duration::from_secs(10));
        assert!(!policy.is_expired(at(0), at(0), 0, at(1)));
        assert!(policy.is_expired(at(0), at(0), 1, at(1)));
    }

    #[test]
    fn ticket_granting_policy_applies_both_bounds() {
        let policy = ExpirationPolicy::ticket_granting(
            Duration::from_secs(8 * 3600),
            Duration::from_secs(2 * 3600),
        );
        // idle for too long
        assert!(policy.is_expired(at(0), at(0), 0, at(2 * 3600 + 1)));
        // active but past the hard limit
        assert!(policy.is_expired(at(0), at(8 * 3600 - 5), 10, at(8 * 3600 + 1)));
        assert!(!policy.is_expired(at(0), at(3600), 3, at(3 * 3600)));
    }

    #[test]
    fn clock_behind_creation_does_not_expire() {
        let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(1));
        assert!(!policy.is_expired(at(100), at(100), 0, at(0)));
    }

    #[test]
    fn storage_deadline_caps_missing_ttl() {
        let policy = ExpirationPolicy::timeout(Duration::from_secs(5));
        let deadline = policy.storage_deadline(at(0));
        assert_eq!(
            deadline.signed_duration_since(at(0)).to_std().ok(),
            Some(MAX_STORAGE_TTL)
        );

        let short = ExpirationPolicy::hard_timeout(Duration::from_secs(30));
        assert_eq!(short.storage_deadline(at(0)), at(30));
    }

    proptest! {
        #[test]
        fn expired_exactly_when_ttl_is_exceeded(ttl in 1u64..100_000, offset in 0i64..200_000) {
            let policy = ExpirationPolicy::hard_timeout(Duration::from_secs(ttl));
            let expected = u64::try_from(offset).unwrap_or_default() > ttl;
            prop_assert_eq!(policy.is_expired(at(0), at(0), 0, at(offset)), expected);
        }

        #[test]
        fn never_expires_before_any_bound(
            ttl in 10u64..10_000,
            tti in 10u64..10_000,
            uses in 2u64..50
        ) {
            let policy = ExpirationPolicy {
                time_to_live: Some(Duration::from_secs(ttl)),
                time_to_idle: Some(Duration::from_secs(tti)),
                max_uses: Some(uses),
            };
            prop_assert!(!policy.is_expired(at(0), at(0), uses - 1, at(5)));
        }
    }
}
