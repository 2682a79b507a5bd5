//! Property tests for expiration and consumption.

use chrono::Duration;
use proptest::prelude::*;
use sso_broker_core::environment::Clock;
use sso_broker_testing::properties::{lifetime_seconds, offset_seconds, use_count};
use sso_broker_testing::{ManualClock, fixtures, test_epoch};
use sso_broker_tickets::{ExpirationPolicy, Ticket, TicketConfig, TicketFactory, TicketState};
use std::sync::Arc;

fn policies() -> impl Strategy<Value = ExpirationPolicy> {
    prop_oneof![
        Just(ExpirationPolicy::NeverExpires),
        lifetime_seconds().prop_map(|time_to_kill_seconds| ExpirationPolicy::HardTimeout {
            time_to_kill_seconds
        }),
        lifetime_seconds().prop_map(|time_to_idle_seconds| ExpirationPolicy::Timeout {
            time_to_idle_seconds
        }),
        (lifetime_seconds(), 1u32..=5).prop_map(|(time_to_live_seconds, number_of_uses)| {
            ExpirationPolicy::MultiTimeUseOrTimeout {
                time_to_live_seconds,
                number_of_uses,
            }
        }),
        (lifetime_seconds(), lifetime_seconds()).prop_map(|(max, idle)| {
            ExpirationPolicy::TicketGranting {
                max_time_to_live_seconds: max.max(idle),
                time_to_kill_seconds: idle,
            }
        }),
    ]
}

/// A service ticket carrying `policy`, created at the test epoch and used
/// `uses` times at one-second intervals.
#[allow(clippy::unwrap_used)] // Test code
fn used_ticket(policy: ExpirationPolicy, uses: u32) -> Ticket {
    let clock = ManualClock::starting_at_test_epoch();
    let factory = TicketFactory::new(&TicketConfig::default(), Arc::new(clock.clone()))
        .with_service_ticket_policy(policy);

    let mut tgt = factory.create_ticket_granting_ticket(fixtures::authentication("alice", test_epoch()));
    let mut st = factory
        .create_service_ticket(&mut tgt, &fixtures::app_service(), false)
        .unwrap();
    for _ in 0..uses {
        clock.advance_seconds(1);
        st.record_use(clock.now());
    }
    st
}

proptest! {
    #[test]
    fn prop_expiration_is_monotone_in_time(
        policy in policies(),
        uses in use_count(),
        at in offset_seconds(),
        later in offset_seconds(),
    ) {
        let ticket = used_ticket(policy, uses);
        let now = test_epoch() + Duration::seconds(at);

        if ticket.is_expired(now) {
            prop_assert!(ticket.is_expired(now + Duration::seconds(later)));
        }
    }

    #[test]
    fn prop_expired_wins_over_consumed(
        policy in policies(),
        uses in use_count(),
        at in offset_seconds(),
    ) {
        let ticket = used_ticket(policy, uses);
        let now = test_epoch() + Duration::seconds(at);
        let state = ticket.state(now);

        if ticket.is_expired(now) {
            prop_assert_eq!(state, TicketState::Expired);
        } else if policy.max_uses().is_some_and(|max| uses >= max) {
            prop_assert_eq!(state, TicketState::Consumed);
        } else {
            prop_assert_eq!(state, TicketState::Valid);
        }
    }

    #[test]
    fn prop_hard_timeout_boundary_is_exclusive(lifetime in lifetime_seconds()) {
        let ticket = used_ticket(
            ExpirationPolicy::HardTimeout { time_to_kill_seconds: lifetime },
            0,
        );

        prop_assert!(!ticket.is_expired(test_epoch() + Duration::seconds(lifetime)));
        prop_assert!(ticket.is_expired(test_epoch() + Duration::seconds(lifetime + 1)));
    }
}
