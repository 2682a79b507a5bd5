//! # SSO Broker Testing
//!
//! Testing utilities and helpers for the SSO ticket broker.
//!
//! This crate provides:
//! - Deterministic clocks (fixed and manually advanced)
//! - Fixtures for authentications and registered services
//! - Property-based testing strategies
//! - Tracing initialization for test output
//!
//! ## Example
//!
//! ```
//! use sso_broker_core::environment::Clock;
//! use sso_broker_testing::{ManualClock, fixtures};
//!
//! let clock = ManualClock::starting_at_test_epoch();
//! let authentication = fixtures::authentication("alice", clock.now());
//!
//! clock.advance_seconds(11);
//! assert!(clock.now() > authentication.authenticated_at());
//! ```

use chrono::{DateTime, Utc};
use sso_broker_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use sso_broker_testing::mocks::FixedClock;
    /// use sso_broker_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test tells it to.
    ///
    /// Clones share the same underlying time, so a test can keep one handle
    /// and hand another to the code under test.
    ///
    /// ```
    /// use sso_broker_testing::mocks::ManualClock;
    /// use sso_broker_core::environment::Clock;
    ///
    /// let clock = ManualClock::starting_at_test_epoch();
    /// let shared = clock.clone();
    /// let before = shared.now();
    /// clock.advance_seconds(10);
    /// assert_eq!((shared.now() - before).num_seconds(), 10);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Create a clock frozen at the test epoch (2025-01-01 00:00:00 UTC).
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(super::test_epoch())
        }

        /// Move the clock forward by `duration`.
        pub fn advance(&self, duration: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += duration;
        }

        /// Move the clock forward by whole seconds.
        pub fn advance_seconds(&self, seconds: i64) {
            self.advance(Duration::seconds(seconds));
        }

        /// Jump to an absolute time.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_epoch())
    }
}

/// Fixtures for collaborator values.
pub mod fixtures {
    use super::{DateTime, Utc};
    use sso_broker_core::authentication::{Authentication, CredentialMetadata, Principal};
    use sso_broker_core::service::{
        AttributeReleasePolicy, InMemoryServicesManager, RegisteredService, Service,
    };

    /// Service used by most scenarios.
    pub const APP_SERVICE: &str = "https://app.example";

    /// A second, distinct service.
    pub const OTHER_SERVICE: &str = "https://other.example";

    /// Callback URL of a proxying service.
    pub const PROXY_CALLBACK: &str = "https://proxy.example/pgtCallback";

    /// Password authentication for `principal` with a `mail` attribute.
    #[must_use]
    pub fn authentication(principal: &str, at: DateTime<Utc>) -> Authentication {
        Authentication::new(
            Principal::new(principal)
                .with_attribute("mail", format!("{principal}@example.com"))
                .with_attribute("uid", principal),
            at,
        )
        .with_attribute("authenticationMethod", "password")
        .with_credential(CredentialMetadata::new(principal, "password"))
    }

    /// `https://app.example`.
    #[must_use]
    pub fn app_service() -> Service {
        Service::new(APP_SERVICE)
    }

    /// `https://other.example`.
    #[must_use]
    pub fn other_service() -> Service {
        Service::new(OTHER_SERVICE)
    }

    /// `https://proxy.example/pgtCallback`.
    #[must_use]
    pub fn proxy_callback() -> Service {
        Service::new(PROXY_CALLBACK)
    }

    /// Registered service matching every `https` URL, proxying allowed,
    /// all attributes released.
    ///
    /// # Panics
    ///
    /// Never: the pattern is a literal known to compile.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn permissive_service(id: u64) -> RegisteredService {
        RegisteredService::new(id, "permissive", "^https://.*")
            .expect("literal pattern compiles")
            .with_proxy_allowed(true)
            .with_attribute_release(AttributeReleasePolicy::ReturnAll)
    }

    /// Registered service matching exactly `service` (and sub-paths).
    ///
    /// # Panics
    ///
    /// Never: the pattern is built from an escaped literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn exact_service(id: u64, service: &str) -> RegisteredService {
        let pattern = format!("^{}(/.*)?$", regex::escape(service));
        RegisteredService::new(id, service, &pattern).expect("escaped literal compiles")
    }

    /// Services manager allowing every `https` service.
    #[must_use]
    pub fn permissive_services_manager() -> InMemoryServicesManager {
        InMemoryServicesManager::new(vec![permissive_service(1000)])
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Offsets in seconds covering the interesting region around the
    /// default ticket lifetimes (seconds to days).
    pub fn offset_seconds() -> impl Strategy<Value = i64> {
        prop_oneof![0i64..=30, 0i64..=10_000, 0i64..=200_000]
    }

    /// Short lifetimes in seconds (at least one second).
    pub fn lifetime_seconds() -> impl Strategy<Value = i64> {
        1i64..=100_000
    }

    /// Use counts including zero.
    pub fn use_count() -> impl Strategy<Value = u32> {
        0u32..=8
    }
}

/// The instant every deterministic test starts from: 2025-01-01 00:00:00 UTC.
#[must_use]
pub fn test_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, once per process.
///
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock};
