//! Expiration policies.
//!
//! A policy is a stateless value attached to a ticket by the factory and
//! stored with it. It answers one question, "is this ticket expired at
//! `now`?", from the ticket's own timestamps:
//!
//! | policy                   | expired when                                            |
//! |--------------------------|---------------------------------------------------------|
//! | `NeverExpires`           | never                                                   |
//! | `HardTimeout`            | `now > created + time_to_kill`                          |
//! | `Timeout`                | `now > last_used + time_to_idle`                        |
//! | `MultiTimeUseOrTimeout`  | `now > created + time_to_live`                          |
//! | `TicketGranting`         | `now > created + max_ttl` or `now > last_used + ttk`    |
//!
//! Use limits (`number_of_uses`) are reported separately through
//! [`ExpirationPolicy::max_uses`]; a ticket that has exhausted its uses is
//! *consumed*, not expired. Keeping the two apart makes `is_expired`
//! monotone in time: once true at `T`, it stays true for every `T' > T`.

use crate::constants::limits::BACKEND_EXPIRY_GRACE_SECONDS;
use crate::ticket::Ticket;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Per-kind expiration policy, serialized with each ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Ticket never expires by time.
    NeverExpires,
    /// Hard lifetime from creation.
    HardTimeout {
        /// Lifetime in seconds
        time_to_kill_seconds: i64,
    },
    /// Sliding idle timeout from last use.
    Timeout {
        /// Idle window in seconds
        time_to_idle_seconds: i64,
    },
    /// Hard lifetime plus a bounded number of uses.
    MultiTimeUseOrTimeout {
        /// Lifetime in seconds
        time_to_live_seconds: i64,
        /// Uses allowed before the ticket is consumed
        number_of_uses: u32,
    },
    /// Session policy: hard maximum lifetime plus sliding idle timeout.
    TicketGranting {
        /// Maximum lifetime in seconds
        max_time_to_live_seconds: i64,
        /// Idle window in seconds
        time_to_kill_seconds: i64,
    },
}

impl ExpirationPolicy {
    /// Whether `ticket` is expired at `now` according to time alone.
    #[must_use]
    pub fn is_expired(&self, ticket: &Ticket, now: DateTime<Utc>) -> bool {
        self.expires_at(ticket).is_some_and(|deadline| now > deadline)
    }

    /// Earliest instant after which the ticket counts as expired, given its
    /// current timestamps. `None` means time alone never expires it,
    /// including lifetimes too large to represent.
    #[must_use]
    pub fn expires_at(&self, ticket: &Ticket) -> Option<DateTime<Utc>> {
        match *self {
            Self::NeverExpires => None,
            Self::HardTimeout {
                time_to_kill_seconds,
            } => after(ticket.creation_time(), time_to_kill_seconds),
            Self::Timeout {
                time_to_idle_seconds,
            } => after(ticket.last_time_used(), time_to_idle_seconds),
            Self::MultiTimeUseOrTimeout {
                time_to_live_seconds,
                ..
            } => after(ticket.creation_time(), time_to_live_seconds),
            Self::TicketGranting {
                max_time_to_live_seconds,
                time_to_kill_seconds,
            } => {
                let hard = after(ticket.creation_time(), max_time_to_live_seconds);
                let idle = after(ticket.last_time_used(), time_to_kill_seconds);
                match (hard, idle) {
                    (Some(hard), Some(idle)) => Some(hard.min(idle)),
                    (deadline, None) | (None, deadline) => deadline,
                }
            }
        }
    }

    /// When a backend may drop the ticket on its own, if ever.
    ///
    /// Adds a grace period to [`Self::expires_at`] so the engine reports an
    /// expired ticket as expired rather than unknown.
    #[must_use]
    pub fn backend_expiry(&self, ticket: &Ticket) -> Option<DateTime<Utc>> {
        self.expires_at(ticket)
            .and_then(|deadline| after(deadline, BACKEND_EXPIRY_GRACE_SECONDS))
    }

    /// Uses allowed before the ticket is consumed; `None` means unlimited.
    #[must_use]
    pub const fn max_uses(&self) -> Option<u32> {
        match *self {
            Self::MultiTimeUseOrTimeout { number_of_uses, .. } => Some(number_of_uses),
            _ => None,
        }
    }
}

/// `start + seconds`, or `None` when that instant is not representable.
fn after(start: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|lifetime| start.checked_add_signed(lifetime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::TicketFactory;
    use crate::config::TicketConfig;
    use sso_broker_core::environment::Clock;
    use sso_broker_testing::{ManualClock, fixtures};
    use std::sync::Arc;

    fn granting_ticket(clock: &ManualClock) -> Ticket {
        let factory = TicketFactory::new(&TicketConfig::default(), Arc::new(clock.clone()));
        factory.create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()))
    }

    #[test]
    fn test_ticket_granting_policy_expires_on_idle() {
        let clock = ManualClock::starting_at_test_epoch();
        let ticket = granting_ticket(&clock);
        let policy = ExpirationPolicy::TicketGranting {
            max_time_to_live_seconds: 100,
            time_to_kill_seconds: 10,
        };

        assert!(!policy.is_expired(&ticket, clock.now() + Duration::seconds(10)));
        assert!(policy.is_expired(&ticket, clock.now() + Duration::seconds(11)));
    }

    #[test]
    fn test_ticket_granting_policy_caps_lifetime_despite_activity() {
        let clock = ManualClock::starting_at_test_epoch();
        let mut ticket = granting_ticket(&clock);
        let policy = ExpirationPolicy::TicketGranting {
            max_time_to_live_seconds: 20,
            time_to_kill_seconds: 10,
        };

        for _ in 0..3 {
            clock.advance_seconds(8);
            ticket.record_use(clock.now());
        }

        // last use at +24s is fresh, but the hard cap at +20s has passed
        assert!(policy.is_expired(&ticket, clock.now()));
    }

    #[test]
    fn test_never_expires_has_no_deadline() {
        let clock = ManualClock::starting_at_test_epoch();
        let ticket = granting_ticket(&clock);
        let policy = ExpirationPolicy::NeverExpires;

        assert!(!policy.is_expired(&ticket, clock.now() + Duration::days(10_000)));
        assert_eq!(policy.backend_expiry(&ticket), None);
        assert_eq!(policy.max_uses(), None);
    }

    #[test]
    fn test_multi_use_reports_limit_but_not_expiry() {
        let clock = ManualClock::starting_at_test_epoch();
        let ticket = granting_ticket(&clock);
        let policy = ExpirationPolicy::MultiTimeUseOrTimeout {
            time_to_live_seconds: 10,
            number_of_uses: 1,
        };

        assert_eq!(policy.max_uses(), Some(1));
        assert!(!policy.is_expired(&ticket, clock.now()));
        assert_eq!(
            policy.backend_expiry(&ticket),
            Some(clock.now() + Duration::seconds(10 + BACKEND_EXPIRY_GRACE_SECONDS))
        );
    }

    #[test]
    fn test_policy_serializes_with_tag() {
        let policy = ExpirationPolicy::HardTimeout {
            time_to_kill_seconds: 10,
        };
        let json = serde_json::to_value(policy).unwrap_or_default();
        assert_eq!(json["policy"], "hard_timeout");
        assert_eq!(json["time_to_kill_seconds"], 10);
    }

    #[test]
    fn test_unrepresentable_lifetime_means_no_deadline() {
        let clock = ManualClock::starting_at_test_epoch();
        let ticket = granting_ticket(&clock);

        for policy in [
            ExpirationPolicy::HardTimeout {
                time_to_kill_seconds: i64::MAX,
            },
            ExpirationPolicy::Timeout {
                time_to_idle_seconds: i64::MAX / 2,
            },
            ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds: i64::MAX,
                number_of_uses: 1,
            },
        ] {
            assert_eq!(policy.expires_at(&ticket), None, "{policy:?}");
            assert!(!policy.is_expired(&ticket, clock.now() + Duration::days(10_000)));
            assert_eq!(policy.backend_expiry(&ticket), None);
        }

        // the representable half of a session policy still applies
        let session = ExpirationPolicy::TicketGranting {
            max_time_to_live_seconds: i64::MAX,
            time_to_kill_seconds: 10,
        };
        assert_eq!(session.expires_at(&ticket), Some(clock.now() + Duration::seconds(10)));
    }
}
