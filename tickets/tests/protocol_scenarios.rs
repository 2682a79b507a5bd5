//! End-to-end protocol scenarios against the in-memory registry.
//!
//! These walk the engine the way a login front end and a service back
//! channel would: log in, grant, validate, log out.

mod common;

use common::Harness;
use sso_broker_core::authentication::{Authentication, Principal};
use sso_broker_core::environment::Clock;
use sso_broker_core::service::{AttributeReleasePolicy, InMemoryServicesManager, Service};
use sso_broker_testing::fixtures;
use sso_broker_tickets::config::ServiceTicketConfig;
use sso_broker_tickets::providers::TicketRegistry;
use sso_broker_tickets::{TicketConfig, TicketError, TicketKind};
use std::collections::BTreeSet;

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_alice_logs_in_and_validates_once() {
    let h = Harness::new();
    let service = fixtures::app_service();

    let tgt = h.login("alice").await;
    let st = h.cas.grant_service_ticket(tgt.id(), &service, false).await.unwrap();

    let assertion = h.cas.validate_service_ticket(st.id(), &service).await.unwrap();
    assert_eq!(assertion.principal().id(), "alice");
    assert_eq!(assertion.service(), &service);
    assert!(assertion.proxies().is_empty());
    assert!(assertion.is_from_new_login());
    assert_eq!(assertion.authenticated_at(), h.clock.now());

    let replay = h.cas.validate_service_ticket(st.id(), &service).await;
    assert_eq!(replay, Err(TicketError::InvalidTicket { id: st.id().clone() }));
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_service_ticket_expires_after_ten_seconds() {
    let h = Harness::with_config(TicketConfig::new().with_service_ticket(ServiceTicketConfig::new(10)));
    let service = fixtures::app_service();

    let tgt = h.login("alice").await;
    let st = h.cas.grant_service_ticket(tgt.id(), &service, false).await.unwrap();

    h.clock.advance_seconds(11);
    let result = h.cas.validate_service_ticket(st.id(), &service).await;

    assert_eq!(result, Err(TicketError::ExpiredTicket { id: st.id().clone() }));
    assert!(h.registry.get_ticket(st.id()).await.unwrap().is_none(), "expired ticket is purged");
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_ticket_presented_to_another_service_is_rejected_and_burned() {
    let h = Harness::new();

    let tgt = h.login("alice").await;
    let st = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();

    let wrong = h.cas.validate_service_ticket(st.id(), &fixtures::other_service()).await;
    assert_eq!(
        wrong,
        Err(TicketError::UnauthorizedService {
            service: fixtures::OTHER_SERVICE.to_string()
        })
    );

    let retry = h.cas.validate_service_ticket(st.id(), &fixtures::app_service()).await;
    assert!(matches!(retry, Err(TicketError::InvalidTicket { .. })));
}

#[tokio::test]
async fn test_unregistered_service_gets_nothing() {
    let h = Harness::new();
    let tgt = h.login("alice").await;

    let result = h
        .cas
        .grant_service_ticket(tgt.id(), &Service::new("http://plaintext.example"), false)
        .await;

    assert!(matches!(result, Err(TicketError::UnauthorizedService { .. })));
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_disabled_service_gets_nothing() {
    let services = InMemoryServicesManager::new(vec![
        fixtures::exact_service(1, fixtures::APP_SERVICE).with_enabled(false),
        fixtures::permissive_service(1000),
    ]);
    let h = Harness::with_services(services);
    let tgt = h.login("alice").await;

    let result = h.cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), false).await;
    assert!(matches!(result, Err(TicketError::UnauthorizedService { .. })));

    // the session itself was not touched
    let stored = h.registry.get_ticket(tgt.id()).await.unwrap().unwrap();
    assert_eq!(stored.count_of_uses(), 0);
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_only_the_first_grant_comes_from_the_login() {
    let h = Harness::new();
    let tgt = h.login("alice").await;

    let first = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();
    let second = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::other_service(), false)
        .await
        .unwrap();

    let first = h.cas.validate_service_ticket(first.id(), &fixtures::app_service()).await.unwrap();
    let second = h
        .cas
        .validate_service_ticket(second.id(), &fixtures::other_service())
        .await
        .unwrap();
    assert!(first.is_from_new_login());
    assert!(!second.is_from_new_login());
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_renew_requires_fresh_credentials_on_used_session() {
    let h = Harness::new();
    let tgt = h.login("alice").await;

    // first grant after login satisfies renew
    h.cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), true)
        .await
        .unwrap();

    let renew = h.cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), true).await;
    assert_eq!(renew, Err(TicketError::AuthenticationRequired { id: tgt.id().clone() }));

    let reauthenticated = h
        .cas
        .grant_service_ticket_with_authentication(
            tgt.id(),
            &fixtures::app_service(),
            &fixtures::authentication("alice", h.clock.now()),
        )
        .await
        .unwrap();
    assert!(reauthenticated.as_service().unwrap().is_from_new_login());
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_reauthentication_as_someone_else_is_rejected() {
    let h = Harness::new();
    let tgt = h.login("alice").await;

    let result = h
        .cas
        .grant_service_ticket_with_authentication(
            tgt.id(),
            &fixtures::app_service(),
            &Authentication::new(Principal::new("mallory"), h.clock.now()),
        )
        .await;

    assert_eq!(
        result,
        Err(TicketError::MixedPrincipal {
            expected: "alice".to_string(),
            actual: "mallory".to_string(),
        })
    );
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_service_outside_single_sign_on_needs_credentials() {
    let services = InMemoryServicesManager::new(vec![
        fixtures::exact_service(1, fixtures::APP_SERVICE).with_sso_enabled(false),
        fixtures::permissive_service(1000),
    ]);
    let h = Harness::with_services(services);
    let tgt = h.login("alice").await;

    h.cas
        .grant_service_ticket(tgt.id(), &fixtures::other_service(), false)
        .await
        .unwrap();

    let sso = h.cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), false).await;
    assert_eq!(
        sso,
        Err(TicketError::UnauthorizedSsoService {
            service: fixtures::APP_SERVICE.to_string()
        })
    );

    h.cas
        .grant_service_ticket_with_authentication(
            tgt.id(),
            &fixtures::app_service(),
            &fixtures::authentication("alice", h.clock.now()),
        )
        .await
        .unwrap();
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_expired_session_is_purged_on_grant() {
    let h = Harness::new();
    let tgt = h.login("alice").await;

    h.clock.advance_seconds(7_201);
    let result = h.cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), false).await;

    assert_eq!(result, Err(TicketError::ExpiredTicket { id: tgt.id().clone() }));
    assert!(h.registry.get_ticket(tgt.id()).await.unwrap().is_none());
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_logout_cascades_and_reports_services() {
    let h = Harness::new();
    let tgt = h.login("alice").await;
    let st1 = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();
    let st2 = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::other_service(), false)
        .await
        .unwrap();
    let bob = h.login("bob").await;

    let services = h.cas.destroy_ticket_granting_ticket(tgt.id()).await.unwrap();
    assert_eq!(
        services,
        BTreeSet::from([fixtures::app_service(), fixtures::other_service()])
    );

    for st in [&st1, &st2] {
        let result = h.cas.validate_service_ticket(st.id(), st.as_service().unwrap().service()).await;
        assert_eq!(result, Err(TicketError::InvalidTicket { id: st.id().clone() }));
    }
    assert!(matches!(
        h.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await,
        Err(TicketError::InvalidTicket { .. })
    ));
    assert_eq!(h.cas.count_sessions().await.unwrap(), 1, "bob's session survives");
    assert!(h.cas.get_ticket(bob.id(), TicketKind::TicketGranting).await.is_ok());

    // idempotent
    assert!(h.cas.destroy_ticket_granting_ticket(tgt.id()).await.unwrap().is_empty());
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_destroying_a_service_ticket_as_a_session_is_refused() {
    let h = Harness::new();
    let tgt = h.login("alice").await;
    let st = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();

    let result = h.cas.destroy_ticket_granting_ticket(st.id()).await;
    assert!(matches!(
        result,
        Err(TicketError::TicketKindMismatch {
            expected: TicketKind::TicketGranting,
            actual: TicketKind::Service,
            ..
        })
    ));
    assert!(h.registry.get_ticket(st.id()).await.unwrap().is_some());
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_orphaned_service_ticket_is_not_consumed() {
    let h = Harness::new();
    let tgt = h.login("alice").await;
    let st = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();

    // session vanished without cascading (e.g. dropped by backend expiry)
    h.registry.delete_single_ticket(tgt.id()).await.unwrap();

    let result = h.cas.validate_service_ticket(st.id(), &fixtures::app_service()).await;
    assert_eq!(result, Err(TicketError::InvalidTicket { id: tgt.id().clone() }));

    let stored = h.registry.get_ticket(st.id()).await.unwrap().unwrap();
    assert_eq!(stored.count_of_uses(), 0);
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_released_principal_follows_service_policy() {
    let services = InMemoryServicesManager::new(vec![
        fixtures::exact_service(1, fixtures::APP_SERVICE)
            .with_attribute_release(AttributeReleasePolicy::ReturnAllowed(BTreeSet::from([
                "mail".to_string(),
            ])))
            .with_username_attribute("mail"),
        fixtures::permissive_service(1000),
    ]);
    let h = Harness::with_services(services);
    let tgt = h.login("alice").await;

    let st = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();
    let assertion = h.cas.validate_service_ticket(st.id(), &fixtures::app_service()).await.unwrap();

    assert_eq!(assertion.principal().id(), "alice@example.com");
    assert_eq!(
        assertion.principal().attributes().keys().collect::<Vec<_>>(),
        vec!["mail"]
    );
    assert!(!format!("{assertion:?}").contains("uid"));
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_deny_all_service_sees_no_attributes() {
    let services = InMemoryServicesManager::new(vec![
        fixtures::exact_service(1, fixtures::APP_SERVICE),
        fixtures::permissive_service(1000),
    ]);
    let h = Harness::with_services(services);
    let tgt = h.login("alice").await;

    let st = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();
    let assertion = h.cas.validate_service_ticket(st.id(), &fixtures::app_service()).await.unwrap();

    assert_eq!(assertion.principal().id(), "alice");
    assert!(assertion.principal().attributes().is_empty());
    let rendered = format!("{assertion:?}");
    assert!(!rendered.contains("alice@example.com"), "{rendered}");
    assert!(!rendered.contains("authenticationMethod"), "{rendered}");
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_multi_use_service_ticket_allows_configured_uses() {
    let h = Harness::with_config(
        TicketConfig::new().with_service_ticket(ServiceTicketConfig::new(10).with_number_of_uses(2)),
    );
    let service = fixtures::app_service();
    let tgt = h.login("alice").await;
    let st = h.cas.grant_service_ticket(tgt.id(), &service, false).await.unwrap();

    h.cas.validate_service_ticket(st.id(), &service).await.unwrap();
    h.cas.validate_service_ticket(st.id(), &service).await.unwrap();

    let third = h.cas.validate_service_ticket(st.id(), &service).await;
    assert_eq!(third, Err(TicketError::InvalidTicket { id: st.id().clone() }));
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_most_recent_session_tracking() {
    let h = Harness::new();
    let tgt = h.login("alice").await;
    for _ in 0..3 {
        h.cas
            .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
            .await
            .unwrap();
    }

    let session = h.cas.get_ticket(tgt.id(), TicketKind::TicketGranting).await.unwrap();
    assert_eq!(session.as_granting().unwrap().services().len(), 1);
    assert_eq!(session.count_of_uses(), 3);
    assert_eq!(h.cas.count_service_tickets().await.unwrap(), 3);
}

#[tokio::test]
#[allow(clippy::unwrap_used)] // Test code
async fn test_logout_removes_superseded_service_tickets() {
    let h = Harness::new();
    let tgt = h.login("alice").await;
    let first = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();
    let second = h
        .cas
        .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
        .await
        .unwrap();

    let services = h.cas.destroy_ticket_granting_ticket(tgt.id()).await.unwrap();
    assert_eq!(services, BTreeSet::from([fixtures::app_service()]));

    for st in [&first, &second] {
        assert_eq!(
            h.cas.get_ticket(st.id(), TicketKind::Service).await,
            Err(TicketError::InvalidTicket { id: st.id().clone() })
        );
    }
    assert_eq!(h.cas.count_service_tickets().await.unwrap(), 0);
}

mod flaky_backend {
    use super::*;
    use sso_broker_core::environment::SystemClock;
    use sso_broker_tickets::mocks::FlakyTicketRegistry;
    use sso_broker_tickets::retry::RetryPolicy;
    use sso_broker_tickets::stores::InMemoryTicketRegistry;
    use sso_broker_tickets::{CentralAuthenticationService, TicketFactory};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(
        registry: &Arc<FlakyTicketRegistry<InMemoryTicketRegistry>>,
    ) -> CentralAuthenticationService<FlakyTicketRegistry<InMemoryTicketRegistry>> {
        engine_with(registry, &TicketConfig::default())
    }

    fn engine_with(
        registry: &Arc<FlakyTicketRegistry<InMemoryTicketRegistry>>,
        config: &TicketConfig,
    ) -> CentralAuthenticationService<FlakyTicketRegistry<InMemoryTicketRegistry>> {
        CentralAuthenticationService::new(
            Arc::clone(registry),
            TicketFactory::new(config, Arc::new(SystemClock)),
            Arc::new(fixtures::permissive_services_manager()),
        )
        .with_read_retry(
            RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(1))
                .max_delay(Duration::from_millis(5))
                .build(),
        )
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_transient_read_failures_are_retried() {
        let registry = Arc::new(FlakyTicketRegistry::new(InMemoryTicketRegistry::new()));
        let cas = engine(&registry);
        let tgt = cas
            .create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()))
            .await
            .unwrap();

        registry.fail_next_reads(2);
        let st = cas
            .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
            .await
            .unwrap();

        assert!(registry.reads() >= 3);
        cas.validate_service_ticket(st.id(), &fixtures::app_service())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_failed_consumption_is_not_retried_and_leaves_ticket_valid() {
        let registry = Arc::new(FlakyTicketRegistry::new(InMemoryTicketRegistry::new()));
        let cas = engine(&registry);
        let tgt = cas
            .create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()))
            .await
            .unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
            .await
            .unwrap();

        let before = registry.updates();
        registry.fail_next_updates(1);
        let result = cas.validate_service_ticket(st.id(), &fixtures::app_service()).await;
        assert!(matches!(result, Err(TicketError::RegistryUnavailable(_))));
        assert_eq!(registry.updates(), before + 1);

        // the ticket was never consumed, so the service may try again
        cas.validate_service_ticket(st.id(), &fixtures::app_service())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_overlapping_validations_share_remaining_uses() {
        let registry = Arc::new(
            FlakyTicketRegistry::new(InMemoryTicketRegistry::new())
                .with_read_delay(Duration::from_millis(20)),
        );
        let cas = engine_with(
            &registry,
            &TicketConfig::new().with_service_ticket(
                ServiceTicketConfig::new(10).with_number_of_uses(2),
            ),
        );
        let tgt = cas
            .create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()))
            .await
            .unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
            .await
            .unwrap();

        let service = fixtures::app_service();
        let (first, second) = tokio::join!(
            cas.validate_service_ticket(st.id(), &service),
            cas.validate_service_ticket(st.id(), &service),
        );

        assert!(first.is_ok(), "{first:?}");
        assert!(second.is_ok(), "{second:?}");
        assert!(registry.inner().get_ticket(st.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_read_retry_follows_registry_config() {
        let registry = Arc::new(FlakyTicketRegistry::new(InMemoryTicketRegistry::new()));
        let config = TicketConfig::new().with_registry(
            sso_broker_tickets::config::RegistryConfig::default().with_read_retry(RetryPolicy::no_retry()),
        );
        let cas = CentralAuthenticationService::from_config(
            Arc::clone(&registry),
            &config,
            Arc::new(SystemClock),
            Arc::new(fixtures::permissive_services_manager()),
        );
        let tgt = cas
            .create_ticket_granting_ticket(fixtures::authentication("alice", chrono::Utc::now()))
            .await
            .unwrap();

        registry.fail_next_reads(1);
        let result = cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), false).await;

        assert!(matches!(result, Err(TicketError::RegistryUnavailable(_))));
        cas.grant_service_ticket(tgt.id(), &fixtures::app_service(), false)
            .await
            .unwrap();
    }
}
