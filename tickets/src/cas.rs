//! Central authentication service.
//!
//! The engine is the sole entry point for protocol front ends. It issues
//! sessions and service tickets, validates them exactly once, delegates
//! proxy rights, and tears sessions down with everything beneath them.
//!
//! # Ticket state machine
//!
//! ```text
//!            expire (time or explicit)
//!   Valid ───────────────────────────────▶ Expired
//!     │
//!     └── last allowed use ──────────────▶ Consumed
//! ```
//!
//! Both terminal states are final. When a ticket is expired *and* out of
//! uses, expiration is reported.
//!
//! # Concurrency
//!
//! The engine holds no mutable state; clones share the registry, factory and
//! collaborators. Consumption is a compare-and-swap on the registry. A
//! caller that loses the swap rereads the ticket and tries again while uses
//! remain, so N concurrent validations of a ticket allowing k uses yield
//! exactly `min(N, k)` successes and the rest see
//! [`TicketError::TicketReuse`]. A failed backend write is never retried;
//! idempotent reads are, under the configured [`RetryPolicy`].
//!
//! # Example
//!
//! ```rust
//! use sso_broker_core::authentication::{Authentication, Principal};
//! use sso_broker_core::environment::SystemClock;
//! use sso_broker_core::service::{InMemoryServicesManager, RegisteredService, Service};
//! use sso_broker_tickets::{CentralAuthenticationService, TicketConfig};
//! use sso_broker_tickets::stores::InMemoryTicketRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let services = InMemoryServicesManager::new(vec![
//!     RegisteredService::new(1, "app", "^https://app\\.example(/.*)?$")?,
//! ]);
//! let cas = CentralAuthenticationService::from_config(
//!     Arc::new(InMemoryTicketRegistry::new()),
//!     &TicketConfig::default(),
//!     Arc::new(SystemClock),
//!     Arc::new(services),
//! );
//!
//! let login = Authentication::new(Principal::new("alice"), chrono::Utc::now());
//! let tgt = cas.create_ticket_granting_ticket(login).await?;
//!
//! let service = Service::new("https://app.example");
//! let st = cas.grant_service_ticket(tgt.id(), &service, false).await?;
//! let assertion = cas.validate_service_ticket(st.id(), &service).await?;
//! assert_eq!(assertion.principal().id(), "alice");
//! # Ok(())
//! # }
//! ```

use crate::assertion::{Assertion, ProxyGrant, ValidationResult};
use crate::config::{RegistryConfig, TicketConfig};
use crate::constants::ids::PROXY_GRANTING_TICKET_IOU_PREFIX;
use crate::constants::limits::{MAX_GRANT_ATTEMPTS, MAX_PROXY_CHAIN_DEPTH};
use crate::error::{Result, TicketError};
use crate::factory::TicketFactory;
use crate::ids::{TicketId, TicketKind};
use crate::providers::{DisabledProxyHandler, ProxyHandler, TicketRegistry};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::ticket::{Ticket, TicketState};
use chrono::{DateTime, Utc};
use sso_broker_core::authentication::Authentication;
use sso_broker_core::environment::Clock;
use sso_broker_core::service::{RegisteredService, Service, ServicesManager};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Protocol engine over a shared ticket registry.
pub struct CentralAuthenticationService<R, H = DisabledProxyHandler> {
    registry: Arc<R>,
    factory: TicketFactory,
    services: Arc<dyn ServicesManager>,
    proxy_handler: Arc<H>,
    read_retry: RetryPolicy,
}

impl<R: TicketRegistry> CentralAuthenticationService<R> {
    /// Create an engine that refuses proxy delivery.
    ///
    /// Reads retry with the default [`RegistryConfig`] policy. Use
    /// [`Self::with_proxy_handler`] to enable proxying.
    #[must_use]
    pub fn new(
        registry: Arc<R>,
        factory: TicketFactory,
        services: Arc<dyn ServicesManager>,
    ) -> Self {
        Self {
            registry,
            factory,
            services,
            proxy_handler: Arc::new(DisabledProxyHandler),
            read_retry: RegistryConfig::default().read_retry,
        }
    }

    /// Create an engine whose factory and read retry come from `config`.
    #[must_use]
    pub fn from_config(
        registry: Arc<R>,
        config: &TicketConfig,
        clock: Arc<dyn Clock>,
        services: Arc<dyn ServicesManager>,
    ) -> Self {
        Self::new(registry, TicketFactory::new(config, clock), services)
            .with_read_retry(config.registry.read_retry.clone())
    }
}

impl<R: TicketRegistry, H: ProxyHandler> CentralAuthenticationService<R, H> {
    /// Deliver proxy-granting tickets through `handler`.
    #[must_use]
    pub fn with_proxy_handler<P: ProxyHandler>(
        self,
        handler: Arc<P>,
    ) -> CentralAuthenticationService<R, P> {
        CentralAuthenticationService {
            registry: self.registry,
            factory: self.factory,
            services: self.services,
            proxy_handler: handler,
            read_retry: self.read_retry,
        }
    }

    /// Retry policy for registry reads.
    #[must_use]
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Ticket factory.
    #[must_use]
    pub const fn factory(&self) -> &TicketFactory {
        &self.factory
    }

    // ═══════════════════════════════════════════════════════════
    // Sessions
    // ═══════════════════════════════════════════════════════════

    /// Start a session for a successful primary authentication.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketAlreadyExists`] on an id collision
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn create_ticket_granting_ticket(&self, authentication: Authentication) -> Result<Ticket> {
        let principal = authentication.principal().id().to_string();
        let ticket = self.factory.create_ticket_granting_ticket(authentication);
        self.registry.add_ticket(&ticket).await?;

        metrics::counter!("tickets.created", "kind" => TicketKind::TicketGranting.prefix()).increment(1);
        tracing::info!(ticket_id = %ticket.id(), principal = %principal, "Created ticket-granting ticket");

        Ok(ticket)
    }

    /// End a session and everything beneath it.
    ///
    /// The session is marked expired first so that a node still holding a
    /// copy cannot grant from it, then removed with its descendants.
    /// Destroying an unknown session succeeds with no services.
    ///
    /// Returns the services that held tickets from the session, for single
    /// logout.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketKindMismatch`] if `id` is not a session
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn destroy_ticket_granting_ticket(&self, id: &TicketId) -> Result<BTreeSet<Service>> {
        let Some(mut ticket) = self.read(id).await? else {
            tracing::debug!(ticket_id = %id, "Destroy requested for unknown session");
            return Ok(BTreeSet::new());
        };

        if ticket.kind() != TicketKind::TicketGranting {
            return Err(TicketError::TicketKindMismatch {
                id: id.clone(),
                expected: TicketKind::TicketGranting,
                actual: ticket.kind(),
            });
        }

        ticket.mark_expired();
        if let Err(e) = self.registry.update_ticket(&mut ticket).await {
            // the cascade below removes it either way
            tracing::debug!(ticket_id = %id, error = %e, "Could not persist session expiry");
        }

        let report = self.registry.delete_ticket(id).await?;

        metrics::counter!("tickets.destroyed")
            .increment(u64::try_from(report.removed()).unwrap_or(u64::MAX));
        tracing::info!(
            ticket_id = %id,
            removed = report.removed(),
            services = report.services.len(),
            "Destroyed ticket-granting ticket"
        );

        Ok(report.services)
    }

    // ═══════════════════════════════════════════════════════════
    // Granting
    // ═══════════════════════════════════════════════════════════

    /// Issue a service ticket from an existing session.
    ///
    /// With `renew`, only a session that has not granted anything yet (i.e.
    /// a login in the same transaction) may satisfy the request.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedService`] if the service is not registered
    ///   or disabled
    /// - [`TicketError::InvalidTicket`] / [`TicketError::TicketKindMismatch`]
    ///   if `tgt_id` is not a stored session
    /// - [`TicketError::ExpiredTicket`] if the session expired (it is purged)
    /// - [`TicketError::AuthenticationRequired`] for `renew` on a used session
    /// - [`TicketError::UnauthorizedSsoService`] if the service does not
    ///   take part in single sign-on and the session was already used
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &TicketId,
        service: &Service,
        renew: bool,
    ) -> Result<Ticket> {
        self.grant(tgt_id, service, renew, None).await
    }

    /// Issue a service ticket after the user re-authenticated.
    ///
    /// The ticket counts as coming from a new login.
    ///
    /// # Errors
    ///
    /// As [`Self::grant_service_ticket`], plus
    /// [`TicketError::MixedPrincipal`] if `authentication` names a different
    /// principal than the session.
    pub async fn grant_service_ticket_with_authentication(
        &self,
        tgt_id: &TicketId,
        service: &Service,
        authentication: &Authentication,
    ) -> Result<Ticket> {
        self.grant(tgt_id, service, false, Some(authentication)).await
    }

    /// Issue a proxy ticket from a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedService`] if the target service is not
    ///   registered or disabled
    /// - [`TicketError::InvalidTicket`] / [`TicketError::TicketKindMismatch`]
    ///   if `pgt_id` is not a stored proxy-granting ticket
    /// - [`TicketError::ExpiredTicket`] if it expired (it is purged)
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn grant_proxy_ticket(&self, pgt_id: &TicketId, service: &Service) -> Result<Ticket> {
        self.authorize(service)?;

        for attempt in 1..=MAX_GRANT_ATTEMPTS {
            let mut pgt = self.load(pgt_id, TicketKind::ProxyGranting).await?;
            self.reject_expired(&pgt).await?;

            let pt = self.factory.create_proxy_ticket(&mut pgt, service)?;
            if !self.persist_parent(&mut pgt, attempt).await? {
                continue;
            }
            self.registry.add_ticket(&pt).await?;

            metrics::counter!("tickets.created", "kind" => TicketKind::Proxy.prefix()).increment(1);
            tracing::info!(
                ticket_id = %pt.id(),
                granted_by = %pgt_id,
                service = %service,
                "Granted proxy ticket"
            );
            return Ok(pt);
        }

        Err(TicketError::ConcurrentModification { id: pgt_id.clone() })
    }

    async fn grant(
        &self,
        tgt_id: &TicketId,
        service: &Service,
        renew: bool,
        authentication: Option<&Authentication>,
    ) -> Result<Ticket> {
        let registered = self.authorize(service)?;
        let credentials_provided = authentication.is_some();

        for attempt in 1..=MAX_GRANT_ATTEMPTS {
            let mut tgt = self.load(tgt_id, TicketKind::TicketGranting).await?;
            self.reject_expired(&tgt).await?;

            if let Some(authentication) = authentication {
                let expected = session_principal(&tgt);
                let actual = authentication.principal().id();
                if expected != actual {
                    tracing::warn!(ticket_id = %tgt_id, %expected, %actual, "Re-authentication principal mismatch");
                    return Err(TicketError::MixedPrincipal {
                        expected: expected.to_string(),
                        actual: actual.to_string(),
                    });
                }
            }

            if tgt.count_of_uses() > 0 && !credentials_provided {
                if renew {
                    return Err(TicketError::AuthenticationRequired { id: tgt_id.clone() });
                }
                if !registered.sso_enabled {
                    return Err(TicketError::UnauthorizedSsoService {
                        service: service.to_string(),
                    });
                }
            }

            let st = self
                .factory
                .create_service_ticket(&mut tgt, service, credentials_provided)?;
            if !self.persist_parent(&mut tgt, attempt).await? {
                continue;
            }
            self.registry.add_ticket(&st).await?;

            metrics::counter!("tickets.created", "kind" => TicketKind::Service.prefix()).increment(1);
            tracing::info!(
                ticket_id = %st.id(),
                granted_by = %tgt_id,
                service = %service,
                from_new_login = st.as_service().is_some_and(|state| state.is_from_new_login()),
                "Granted service ticket"
            );
            return Ok(st);
        }

        Err(TicketError::ConcurrentModification { id: tgt_id.clone() })
    }

    /// Write back a granting ticket after minting a child.
    ///
    /// Returns `false` when another node changed it first and the grant
    /// should start over from a fresh read.
    async fn persist_parent(&self, parent: &mut Ticket, attempt: usize) -> Result<bool> {
        match self.registry.update_ticket(parent).await {
            Ok(()) => Ok(true),
            Err(TicketError::ConcurrentModification { .. }) if attempt < MAX_GRANT_ATTEMPTS => {
                tracing::debug!(ticket_id = %parent.id(), attempt, "Granting ticket changed concurrently, retrying");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════

    /// Validate a service ticket for `service`, consuming one use.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedService`] if the service is not
    ///   registered, or differs from the one the ticket was issued for (the
    ///   ticket is then destroyed)
    /// - [`TicketError::InvalidTicket`] / [`TicketError::TicketKindMismatch`]
    ///   if `st_id` is not a stored service ticket, or its session is gone
    /// - [`TicketError::ExpiredTicket`] if the ticket or its session expired
    /// - [`TicketError::TicketReuse`] if the ticket was already consumed,
    ///   including by a concurrent validation
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn validate_service_ticket(&self, st_id: &TicketId, service: &Service) -> Result<Assertion> {
        self.validate(st_id, service, TicketKind::Service, None)
            .await
            .map(|result| result.assertion)
    }

    /// Validate a service ticket and, on success, delegate proxy rights to
    /// `proxy_callback`.
    ///
    /// A refused or failed delivery leaves the validation successful with no
    /// proxy grant.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_service_ticket`], plus
    /// [`TicketError::UnauthorizedProxying`] if the service may not proxy
    /// (checked before the ticket is consumed).
    pub async fn validate_service_ticket_with_proxy_callback(
        &self,
        st_id: &TicketId,
        service: &Service,
        proxy_callback: &Service,
    ) -> Result<ValidationResult> {
        self.validate(st_id, service, TicketKind::Service, Some(proxy_callback))
            .await
    }

    /// Validate a proxy ticket for `service`, consuming one use.
    ///
    /// The assertion lists every proxy the ticket passed through, oldest
    /// first.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_service_ticket`].
    pub async fn validate_proxy_ticket(&self, pt_id: &TicketId, service: &Service) -> Result<Assertion> {
        self.validate(pt_id, service, TicketKind::Proxy, None)
            .await
            .map(|result| result.assertion)
    }

    /// Validate a proxy ticket and delegate proxy rights further.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_service_ticket_with_proxy_callback`].
    pub async fn validate_proxy_ticket_with_proxy_callback(
        &self,
        pt_id: &TicketId,
        service: &Service,
        proxy_callback: &Service,
    ) -> Result<ValidationResult> {
        self.validate(pt_id, service, TicketKind::Proxy, Some(proxy_callback))
            .await
    }

    async fn validate(
        &self,
        id: &TicketId,
        service: &Service,
        kind: TicketKind,
        proxy_callback: Option<&Service>,
    ) -> Result<ValidationResult> {
        let result = self.validate_once(id, service, kind, proxy_callback).await;

        match &result {
            Ok(validated) => {
                metrics::counter!("tickets.validated", "kind" => kind.prefix()).increment(1);
                tracing::info!(
                    ticket_id = %id,
                    service = %service,
                    principal = %validated.assertion.principal(),
                    proxies = validated.assertion.proxies().len(),
                    proxy_granted = validated.proxy_grant.is_some(),
                    "Validated ticket"
                );
            }
            Err(e) => {
                metrics::counter!(
                    "tickets.validation_failed",
                    "kind" => kind.prefix(),
                    "code" => e.protocol_code()
                )
                .increment(1);
                if e.is_security_issue() {
                    tracing::warn!(ticket_id = %id, service = %service, error = %e, "Ticket validation rejected");
                } else {
                    tracing::info!(ticket_id = %id, service = %service, error = %e, "Ticket validation failed");
                }
            }
        }

        result
    }

    async fn validate_once(
        &self,
        id: &TicketId,
        service: &Service,
        kind: TicketKind,
        proxy_callback: Option<&Service>,
    ) -> Result<ValidationResult> {
        let registered = self.authorize(service)?;
        let mut ticket = self.load(id, kind).await?;
        let now = self.now();

        match ticket.state(now) {
            TicketState::Valid => {}
            TicketState::Expired => {
                self.discard(id).await;
                return Err(TicketError::ExpiredTicket { id: id.clone() });
            }
            TicketState::Consumed => return Err(TicketError::TicketReuse { id: id.clone() }),
        }

        let state = ticket
            .as_service()
            .cloned()
            .ok_or_else(|| TicketError::InvalidTicket { id: id.clone() })?;

        if !state.is_valid_for(service) {
            // a ticket presented to the wrong service is burned
            self.discard(id).await;
            return Err(TicketError::UnauthorizedService {
                service: service.to_string(),
            });
        }

        if proxy_callback.is_some() && !registered.allowed_to_proxy {
            return Err(TicketError::UnauthorizedProxying {
                service: service.to_string(),
            });
        }

        // resolve the chain before consuming: a broken chain must not burn the ticket
        let grantor = self.resolve_live(state.granting_ticket(), now).await?;
        let (root_authentication, proxies) = self.resolve_chain(&grantor, now).await?;

        self.consume(&mut ticket, now).await?;

        let principal = registered.released_principal(root_authentication.principal());
        let assertion = Assertion::new(
            principal,
            &root_authentication,
            state.service().clone(),
            proxies,
            state.is_from_new_login(),
        );

        let proxy_grant = match proxy_callback {
            Some(callback) => self.delegate(&mut ticket, grantor, callback, now).await,
            None => None,
        };

        if ticket.state(now) == TicketState::Consumed {
            self.discard(id).await;
        }

        Ok(ValidationResult {
            assertion,
            proxy_grant,
        })
    }

    /// Record one use of `ticket` with a compare-and-swap.
    ///
    /// A lost race applied nothing, so the ticket is reread and the use
    /// retried while uses remain. Every lost round means another caller won
    /// a use, so `max_uses + 1` rounds always reach a verdict.
    async fn consume(&self, ticket: &mut Ticket, now: DateTime<Utc>) -> Result<()> {
        let id = ticket.id().clone();
        let rounds = ticket
            .expiration_policy()
            .max_uses()
            .map_or(1, |uses| usize::try_from(uses).unwrap_or(usize::MAX))
            .saturating_add(MAX_GRANT_ATTEMPTS);

        for attempt in 1..=rounds {
            let mut candidate = ticket.clone();
            candidate.record_use(now);
            match self.registry.update_ticket(&mut candidate).await {
                Ok(()) => {
                    *ticket = candidate;
                    return Ok(());
                }
                Err(TicketError::ConcurrentModification { .. }) => {
                    tracing::debug!(ticket_id = %id, attempt, "Ticket used concurrently, rereading");
                    let Some(current) = self.read(&id).await? else {
                        return Err(TicketError::TicketReuse { id });
                    };
                    match current.state(now) {
                        TicketState::Valid => *ticket = current,
                        TicketState::Expired => {
                            self.discard(&id).await;
                            return Err(TicketError::ExpiredTicket { id });
                        }
                        TicketState::Consumed => return Err(TicketError::TicketReuse { id }),
                    }
                }
                Err(TicketError::InvalidTicket { .. }) => return Err(TicketError::TicketReuse { id }),
                Err(e) => return Err(e),
            }
        }

        Err(TicketError::TicketReuse { id })
    }

    /// Load a granting ticket that must still be live.
    async fn resolve_live(&self, id: &TicketId, now: DateTime<Utc>) -> Result<Ticket> {
        let ticket = self
            .read(id)
            .await?
            .ok_or_else(|| TicketError::InvalidTicket { id: id.clone() })?;

        if ticket.as_granting().is_none() {
            return Err(TicketError::InvalidTicket { id: id.clone() });
        }
        if ticket.is_expired(now) {
            return Err(TicketError::ExpiredTicket { id: id.clone() });
        }
        Ok(ticket)
    }

    /// Walk from `grantor` up to the session, collecting proxy callbacks.
    ///
    /// Returns the session's authentication and the callbacks oldest first.
    async fn resolve_chain(
        &self,
        grantor: &Ticket,
        now: DateTime<Utc>,
    ) -> Result<(Authentication, Vec<Service>)> {
        let mut proxies = Vec::new();
        let mut current = grantor.clone();

        for _ in 0..MAX_PROXY_CHAIN_DEPTH {
            let granting = current
                .as_granting()
                .ok_or_else(|| TicketError::InvalidTicket { id: current.id().clone() })?;

            let Some(parent) = granting.parent() else {
                proxies.reverse();
                return Ok((granting.authentication().clone(), proxies));
            };

            if let Some(callback) = granting.proxy_callback() {
                proxies.push(callback.clone());
            }
            let parent = parent.clone();
            current = self.resolve_live(&parent, now).await?;
        }

        tracing::error!(ticket_id = %grantor.id(), "Proxy chain exceeds maximum depth");
        Err(TicketError::InvalidTicket {
            id: grantor.id().clone(),
        })
    }

    /// Mint and deliver a proxy-granting ticket. Failures are logged and
    /// yield no grant; they never fail the validation.
    async fn delegate(
        &self,
        validated: &mut Ticket,
        grantor: Ticket,
        callback: &Service,
        now: DateTime<Utc>,
    ) -> Option<ProxyGrant> {
        let pgt = match self.issue_proxy_granting_ticket(validated, grantor, callback, now).await {
            Ok(pgt) => pgt,
            Err(e) => {
                tracing::warn!(ticket_id = %validated.id(), error = %e, "Could not issue proxy-granting ticket");
                return None;
            }
        };

        let iou = self.factory.generate_id(PROXY_GRANTING_TICKET_IOU_PREFIX);
        if self.proxy_handler.deliver(callback, pgt.id(), &iou).await {
            metrics::counter!("tickets.created", "kind" => TicketKind::ProxyGranting.prefix()).increment(1);
            tracing::info!(ticket_id = %pgt.id(), callback = %callback, "Delivered proxy-granting ticket");
            return Some(ProxyGrant {
                ticket_id: pgt.id().clone(),
                iou,
            });
        }

        tracing::warn!(ticket_id = %pgt.id(), callback = %callback, "Proxy callback refused delivery");
        self.discard(pgt.id()).await;
        None
    }

    async fn issue_proxy_granting_ticket(
        &self,
        validated: &mut Ticket,
        mut grantor: Ticket,
        callback: &Service,
        now: DateTime<Utc>,
    ) -> Result<Ticket> {
        let pgt = self
            .factory
            .create_proxy_granting_ticket(validated, &mut grantor, callback)?;

        // multi-use tickets keep the marker so they cannot delegate twice
        if validated.state(now) == TicketState::Valid {
            self.registry.update_ticket(validated).await?;
        }

        for attempt in 1..=MAX_GRANT_ATTEMPTS {
            if self.persist_parent(&mut grantor, attempt).await? {
                break;
            }
            grantor = self.resolve_live(grantor.id(), now).await?;
            if let Some(granting) = grantor.as_granting_mut() {
                granting.track_proxy_granting_ticket(pgt.id().clone());
            }
        }

        self.registry.add_ticket(&pgt).await?;
        Ok(pgt)
    }

    // ═══════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════

    /// Load a live ticket of `kind` for a front end.
    ///
    /// An expired ticket is purged and reported as such.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidTicket`] / [`TicketError::TicketKindMismatch`]
    /// - [`TicketError::ExpiredTicket`]
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    pub async fn get_ticket(&self, id: &TicketId, kind: TicketKind) -> Result<Ticket> {
        let ticket = self.load(id, kind).await?;
        self.reject_expired(&ticket).await?;
        Ok(ticket)
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    pub async fn count_sessions(&self) -> Result<usize> {
        self.registry
            .count_tickets_of_kind(TicketKind::TicketGranting)
            .await
    }

    /// Number of stored service tickets.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    pub async fn count_service_tickets(&self) -> Result<usize> {
        self.registry.count_tickets_of_kind(TicketKind::Service).await
    }

    // ═══════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════

    fn now(&self) -> DateTime<Utc> {
        self.factory.clock().now()
    }

    fn authorize(&self, service: &Service) -> Result<RegisteredService> {
        match self.services.find_service_by(service) {
            Some(registered) if registered.enabled => Ok(registered),
            Some(_) => {
                tracing::warn!(service = %service, "Registered service is disabled");
                Err(TicketError::UnauthorizedService {
                    service: service.to_string(),
                })
            }
            None => {
                tracing::warn!(service = %service, "Service is not registered");
                Err(TicketError::UnauthorizedService {
                    service: service.to_string(),
                })
            }
        }
    }

    async fn load(&self, id: &TicketId, kind: TicketKind) -> Result<Ticket> {
        retry_with_predicate(
            self.read_retry.clone(),
            || self.registry.get_ticket_of_kind(id, kind),
            TicketError::is_transient,
        )
        .await
    }

    async fn read(&self, id: &TicketId) -> Result<Option<Ticket>> {
        retry_with_predicate(
            self.read_retry.clone(),
            || self.registry.get_ticket(id),
            TicketError::is_transient,
        )
        .await
    }

    /// Fail with `ExpiredTicket` (purging the ticket) if it is expired.
    async fn reject_expired(&self, ticket: &Ticket) -> Result<()> {
        if ticket.is_expired(self.now()) {
            self.discard(ticket.id()).await;
            return Err(TicketError::ExpiredTicket {
                id: ticket.id().clone(),
            });
        }
        Ok(())
    }

    /// Best-effort cascading delete; failures are left to the cleaner.
    async fn discard(&self, id: &TicketId) {
        if let Err(e) = self.registry.delete_ticket(id).await {
            tracing::warn!(ticket_id = %id, error = %e, "Could not delete ticket; the cleaner will retry");
        }
    }
}

impl<R, H> Clone for CentralAuthenticationService<R, H> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            factory: self.factory.clone(),
            services: Arc::clone(&self.services),
            proxy_handler: Arc::clone(&self.proxy_handler),
            read_retry: self.read_retry.clone(),
        }
    }
}

impl<R, H> std::fmt::Debug for CentralAuthenticationService<R, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralAuthenticationService")
            .field("factory", &self.factory)
            .field("read_retry", &self.read_retry)
            .finish_non_exhaustive()
    }
}

fn session_principal(ticket: &Ticket) -> &str {
    ticket
        .as_granting()
        .map_or("", |granting| granting.authentication().principal().id())
}
