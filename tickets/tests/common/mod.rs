//! Shared wiring for engine integration tests.

#![allow(dead_code)]

use sso_broker_core::environment::Clock;
use sso_broker_core::service::InMemoryServicesManager;
use sso_broker_testing::{ManualClock, fixtures};
use sso_broker_tickets::mocks::MockProxyHandler;
use sso_broker_tickets::retry::RetryPolicy;
use sso_broker_tickets::stores::InMemoryTicketRegistry;
use sso_broker_tickets::{CentralAuthenticationService, Ticket, TicketConfig, TicketFactory};
use std::sync::Arc;

/// Engine under test.
pub type Cas = CentralAuthenticationService<InMemoryTicketRegistry, MockProxyHandler>;

/// Engine over an in-memory registry with a manual clock.
pub struct Harness {
    pub clock: ManualClock,
    pub registry: Arc<InMemoryTicketRegistry>,
    pub proxy: Arc<MockProxyHandler>,
    pub cas: Cas,
}

impl Harness {
    /// Default lifetimes, every `https` service allowed to proxy.
    pub fn new() -> Self {
        Self::with(TicketConfig::default(), fixtures::permissive_services_manager())
    }

    pub fn with_config(config: TicketConfig) -> Self {
        Self::with(config, fixtures::permissive_services_manager())
    }

    pub fn with_services(services: InMemoryServicesManager) -> Self {
        Self::with(TicketConfig::default(), services)
    }

    pub fn with(config: TicketConfig, services: InMemoryServicesManager) -> Self {
        sso_broker_testing::init_tracing();

        let clock = ManualClock::starting_at_test_epoch();
        let registry = Arc::new(InMemoryTicketRegistry::new());
        let proxy = Arc::new(MockProxyHandler::accepting());
        let cas = CentralAuthenticationService::new(
            Arc::clone(&registry),
            TicketFactory::new(&config, Arc::new(clock.clone())),
            Arc::new(services),
        )
        .with_proxy_handler(Arc::clone(&proxy))
        .with_read_retry(RetryPolicy::no_retry());

        Self {
            clock,
            registry,
            proxy,
            cas,
        }
    }

    /// Log `principal` in and return the session.
    #[allow(clippy::unwrap_used)] // Test code
    pub async fn login(&self, principal: &str) -> Ticket {
        self.cas
            .create_ticket_granting_ticket(fixtures::authentication(principal, self.clock.now()))
            .await
            .unwrap()
    }
}
