//! Ticket factory.
//!
//! The factory is the only place expiration policies are attached and the
//! only place parent/child links are wired. Every child-minting operation
//! checks its parent first: minting from an expired, consumed, or
//! wrong-kind parent fails and names the parent.

use crate::config::TicketConfig;
use crate::error::{Result, TicketError};
use crate::expiration::ExpirationPolicy;
use crate::ids::{DefaultUniqueTicketIdGenerator, TicketKind, UniqueTicketIdGenerator};
use crate::ticket::{GrantingTicket, ServiceTicket, Ticket, TicketBody, TicketState};
use sso_broker_core::authentication::Authentication;
use sso_broker_core::environment::Clock;
use sso_broker_core::service::Service;
use std::sync::Arc;

/// Builds correctly-typed tickets.
///
/// Cheap to clone; clones share the id generator and clock.
#[derive(Clone)]
pub struct TicketFactory {
    id_generator: Arc<dyn UniqueTicketIdGenerator>,
    clock: Arc<dyn Clock>,
    ticket_granting_policy: ExpirationPolicy,
    service_ticket_policy: ExpirationPolicy,
    proxy_granting_policy: ExpirationPolicy,
    proxy_ticket_policy: ExpirationPolicy,
    only_track_most_recent_session: bool,
}

impl TicketFactory {
    /// Create a factory from configuration.
    #[must_use]
    pub fn new(config: &TicketConfig, clock: Arc<dyn Clock>) -> Self {
        let mut generator = DefaultUniqueTicketIdGenerator::new(config.id_generator.random_bytes);
        if let Some(suffix) = &config.id_generator.node_suffix {
            generator = generator.with_suffix(suffix.clone());
        }

        Self {
            id_generator: Arc::new(generator),
            clock,
            ticket_granting_policy: config.ticket_granting.policy(),
            service_ticket_policy: config.service_ticket.policy(),
            proxy_granting_policy: config.proxy_granting.policy(),
            proxy_ticket_policy: config.proxy_ticket.policy(),
            only_track_most_recent_session: config.only_track_most_recent_session,
        }
    }

    /// Replace the id generator.
    #[must_use]
    pub fn with_id_generator(mut self, generator: Arc<dyn UniqueTicketIdGenerator>) -> Self {
        self.id_generator = generator;
        self
    }

    /// Override the service ticket policy.
    #[must_use]
    pub const fn with_service_ticket_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.service_ticket_policy = policy;
        self
    }

    /// Override the ticket-granting ticket policy.
    #[must_use]
    pub const fn with_ticket_granting_policy(mut self, policy: ExpirationPolicy) -> Self {
        self.ticket_granting_policy = policy;
        self
    }

    /// Clock used for timestamps.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Generate a bare identifier with `prefix` (e.g. a PGT IOU).
    #[must_use]
    pub fn generate_id(&self, prefix: &str) -> String {
        self.id_generator.generate(prefix)
    }

    /// Create a session ticket for a successful primary authentication.
    #[must_use]
    pub fn create_ticket_granting_ticket(&self, authentication: Authentication) -> Ticket {
        Ticket::new(
            self.id_generator.generate_ticket_id(TicketKind::TicketGranting),
            TicketBody::TicketGranting(GrantingTicket::root(authentication)),
            self.ticket_granting_policy,
            self.clock.now(),
        )
    }

    /// Mint a service ticket from `ticket_granting_ticket`.
    ///
    /// Records the use on the parent and tracks the new ticket under it; the
    /// caller must persist the parent. The ticket is `from_new_login` when
    /// credentials were supplied or the session has not granted before.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketKindMismatch`] if the parent is not a TGT
    /// - [`TicketError::InvalidTicket`] (naming the parent) if it is not valid
    pub fn create_service_ticket(
        &self,
        ticket_granting_ticket: &mut Ticket,
        service: &Service,
        credentials_provided: bool,
    ) -> Result<Ticket> {
        expect_kind(ticket_granting_ticket, TicketKind::TicketGranting)?;
        let from_new_login = credentials_provided || ticket_granting_ticket.count_of_uses() == 0;
        self.grant(
            ticket_granting_ticket,
            service,
            TicketKind::Service,
            self.service_ticket_policy,
            from_new_login,
        )
    }

    /// Mint a proxy ticket from `proxy_granting_ticket`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketKindMismatch`] if the parent is not a PGT
    /// - [`TicketError::InvalidTicket`] (naming the parent) if it is not valid
    pub fn create_proxy_ticket(
        &self,
        proxy_granting_ticket: &mut Ticket,
        service: &Service,
    ) -> Result<Ticket> {
        expect_kind(proxy_granting_ticket, TicketKind::ProxyGranting)?;
        self.grant(
            proxy_granting_ticket,
            service,
            TicketKind::Proxy,
            self.proxy_ticket_policy,
            false,
        )
    }

    /// Delegate a proxy-granting ticket from a just-validated ST or PT.
    ///
    /// `grantor` is the granting ticket that issued `validated`; the new
    /// ticket inherits its root authentication and is tracked under it. The
    /// caller must persist `grantor` (and `validated`, if it still exists).
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketKindMismatch`] if `validated` is not an ST/PT
    /// - [`TicketError::InvalidTicket`] if `validated` is expired, already
    ///   delegated a PGT, or `grantor` is not the valid ticket that issued it
    pub fn create_proxy_granting_ticket(
        &self,
        validated: &mut Ticket,
        grantor: &mut Ticket,
        proxy_callback: &Service,
    ) -> Result<Ticket> {
        let now = self.clock.now();
        let validated_id = validated.id().clone();
        let validated_kind = validated.kind();

        let Some(state) = validated.as_service() else {
            return Err(TicketError::TicketKindMismatch {
                id: validated_id,
                expected: TicketKind::Service,
                actual: validated_kind,
            });
        };
        if state.granted_proxy_granting_ticket().is_some() || state.granting_ticket() != grantor.id()
        {
            return Err(TicketError::InvalidTicket { id: validated_id });
        }
        let proxied_by = state.service().clone();

        // consumption is expected here; only time expiry disqualifies
        if validated.is_expired(now) {
            return Err(TicketError::InvalidTicket { id: validated_id });
        }
        ensure_valid(grantor, now)?;

        let authentication = grantor
            .as_granting()
            .map(|granting| granting.authentication().clone())
            .ok_or_else(|| TicketError::InvalidTicket {
                id: grantor.id().clone(),
            })?;

        let proxy_granting_ticket = Ticket::new(
            self.id_generator.generate_ticket_id(TicketKind::ProxyGranting),
            TicketBody::ProxyGranting(GrantingTicket::delegated(
                authentication,
                grantor.id().clone(),
                proxied_by,
                proxy_callback.clone(),
            )),
            self.proxy_granting_policy,
            now,
        );

        if let Some(state) = validated.as_service_mut() {
            state.record_proxy_granting_ticket(proxy_granting_ticket.id().clone());
        }
        if let Some(granting) = grantor.as_granting_mut() {
            granting.track_proxy_granting_ticket(proxy_granting_ticket.id().clone());
        }

        Ok(proxy_granting_ticket)
    }

    fn grant(
        &self,
        parent: &mut Ticket,
        service: &Service,
        kind: TicketKind,
        policy: ExpirationPolicy,
        from_new_login: bool,
    ) -> Result<Ticket> {
        let now = self.clock.now();
        ensure_valid(parent, now)?;

        let id = self.id_generator.generate_ticket_id(kind);
        let state = ServiceTicket::new(parent.id().clone(), service.clone(), from_new_login);
        let body = match kind {
            TicketKind::Proxy => TicketBody::Proxy(state),
            _ => TicketBody::Service(state),
        };
        let ticket = Ticket::new(id, body, policy, now);

        parent.record_use(now);
        if let Some(granting) = parent.as_granting_mut() {
            granting.track_service(
                ticket.id().clone(),
                service.clone(),
                self.only_track_most_recent_session,
            );
        }

        Ok(ticket)
    }
}

impl std::fmt::Debug for TicketFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketFactory")
            .field("ticket_granting_policy", &self.ticket_granting_policy)
            .field("service_ticket_policy", &self.service_ticket_policy)
            .field("proxy_granting_policy", &self.proxy_granting_policy)
            .field("proxy_ticket_policy", &self.proxy_ticket_policy)
            .field(
                "only_track_most_recent_session",
                &self.only_track_most_recent_session,
            )
            .finish_non_exhaustive()
    }
}

fn expect_kind(ticket: &Ticket, expected: TicketKind) -> Result<()> {
    if ticket.kind() == expected {
        Ok(())
    } else {
        Err(TicketError::TicketKindMismatch {
            id: ticket.id().clone(),
            expected,
            actual: ticket.kind(),
        })
    }
}

fn ensure_valid(parent: &Ticket, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
    match parent.state(now) {
        TicketState::Valid => Ok(()),
        TicketState::Expired | TicketState::Consumed => Err(TicketError::InvalidTicket {
            id: parent.id().clone(),
        }),
    }
}
