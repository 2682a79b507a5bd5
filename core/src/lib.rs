//! # SSO Broker Core
//!
//! Collaborator contracts consumed by the ticket subsystem.
//!
//! The ticket lifecycle never validates credentials or renders protocol
//! messages itself. It relies on three collaborators, all defined here so
//! that storage backends and front ends can share them:
//!
//! - **Clock**: injected time source, so expiration is deterministic in tests
//! - **Authentication**: the opaque result of a primary login
//! - **Services**: target applications and the registry that answers
//!   "may this service receive tickets / request proxying"
//!
//! ## Example
//!
//! ```
//! use sso_broker_core::authentication::{Authentication, Principal};
//! use sso_broker_core::environment::{Clock, SystemClock};
//! use sso_broker_core::service::{
//!     InMemoryServicesManager, RegisteredService, Service, ServicesManager,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = SystemClock;
//! let authentication = Authentication::new(Principal::new("alice"), clock.now());
//!
//! let manager = InMemoryServicesManager::new(vec![
//!     RegisteredService::new(1, "apps", r"^https://app\.example(/.*)?$")?,
//! ]);
//!
//! let service = Service::new("https://app.example/");
//! assert!(manager.find_service_by(&service).is_some());
//! assert_eq!(authentication.principal().id(), "alice");
//! # Ok(())
//! # }
//! ```

pub mod authentication;
pub mod service;

pub use authentication::{Attributes, Authentication, CredentialMetadata, Principal};
pub use service::{
    AttributeReleasePolicy, InMemoryServicesManager, RegisteredService, Service, ServiceError,
    ServicesManager,
};

/// Environment traits for dependency injection.
///
/// All external dependencies are abstracted behind traits and injected;
/// nothing in the broker reads ambient global state.
pub mod environment {
    use chrono::{DateTime, Utc};
    use std::sync::Arc;

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use sso_broker_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time source used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    impl<C: Clock + ?Sized> Clock for Arc<C> {
        fn now(&self) -> DateTime<Utc> {
            (**self).now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};
    use std::sync::Arc;

    #[test]
    fn test_system_clock_is_monotone_enough() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
