//! Ticket entities.
//!
//! Every ticket shares one core ([`Ticket`]: id, timestamps, use count,
//! policy, version) and carries a kind-specific [`TicketBody`]:
//!
//! ```text
//! TicketGranting ──grants──▶ Service ──validated with callback──▶ ProxyGranting
//!       ▲                                                              │
//!       └─────────────── root of every chain ◀──────────── grants ── Proxy
//! ```
//!
//! Parents record their children by id so destroying a session can cascade;
//! children reference their parent by id only and re-resolve it from the
//! registry whenever they need it.

use crate::expiration::ExpirationPolicy;
use crate::ids::{TicketId, TicketKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sso_broker_core::authentication::Authentication;
use sso_broker_core::service::Service;
use std::collections::{BTreeMap, BTreeSet};

/// Lifecycle state of a ticket at a given instant.
///
/// `Expired` and `Consumed` are terminal. When both hold, `Expired` wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    /// Usable.
    Valid,
    /// Past its expiration policy (or explicitly expired).
    Expired,
    /// All allowed uses spent.
    Consumed,
}

/// A ticket of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    id: TicketId,
    creation_time: DateTime<Utc>,
    last_time_used: DateTime<Utc>,
    previous_time_used: Option<DateTime<Utc>>,
    count_of_uses: u32,
    expiration_policy: ExpirationPolicy,
    #[serde(default)]
    expired: bool,
    #[serde(default)]
    version: u64,
    body: TicketBody,
}

/// Kind-specific ticket contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "state", rename_all = "snake_case")]
pub enum TicketBody {
    /// Ticket-granting ticket.
    TicketGranting(GrantingTicket),
    /// Service ticket.
    Service(ServiceTicket),
    /// Proxy-granting ticket.
    ProxyGranting(GrantingTicket),
    /// Proxy ticket.
    Proxy(ServiceTicket),
}

impl TicketBody {
    /// Kind of this body.
    #[must_use]
    pub const fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGranting(_) => TicketKind::TicketGranting,
            Self::Service(_) => TicketKind::Service,
            Self::ProxyGranting(_) => TicketKind::ProxyGranting,
            Self::Proxy(_) => TicketKind::Proxy,
        }
    }
}

/// State of a ticket that grants children (TGT, PGT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantingTicket {
    authentication: Authentication,
    /// Granting ticket this one was delegated from (PGT only).
    parent: Option<TicketId>,
    /// Service whose validation produced this ticket (PGT only).
    proxied_by: Option<Service>,
    /// Callback URL the ticket was delivered to (PGT only).
    proxy_callback: Option<Service>,
    #[serde(default)]
    services: BTreeMap<TicketId, Service>,
    /// Every ticket ever granted, including entries superseded in `services`.
    #[serde(default)]
    granted_tickets: BTreeSet<TicketId>,
    #[serde(default)]
    proxy_granting_tickets: BTreeSet<TicketId>,
}

impl GrantingTicket {
    pub(crate) fn root(authentication: Authentication) -> Self {
        Self {
            authentication,
            parent: None,
            proxied_by: None,
            proxy_callback: None,
            services: BTreeMap::new(),
            granted_tickets: BTreeSet::new(),
            proxy_granting_tickets: BTreeSet::new(),
        }
    }

    pub(crate) fn delegated(
        authentication: Authentication,
        parent: TicketId,
        proxied_by: Service,
        proxy_callback: Service,
    ) -> Self {
        Self {
            authentication,
            parent: Some(parent),
            proxied_by: Some(proxied_by),
            proxy_callback: Some(proxy_callback),
            services: BTreeMap::new(),
            granted_tickets: BTreeSet::new(),
            proxy_granting_tickets: BTreeSet::new(),
        }
    }

    /// Authentication of the session's root login.
    #[must_use]
    pub const fn authentication(&self) -> &Authentication {
        &self.authentication
    }

    /// Granting ticket this one was delegated from.
    #[must_use]
    pub const fn parent(&self) -> Option<&TicketId> {
        self.parent.as_ref()
    }

    /// Service that requested the delegation.
    #[must_use]
    pub const fn proxied_by(&self) -> Option<&Service> {
        self.proxied_by.as_ref()
    }

    /// Callback URL that received this ticket.
    #[must_use]
    pub const fn proxy_callback(&self) -> Option<&Service> {
        self.proxy_callback.as_ref()
    }

    /// Services to notify on logout, keyed by the ticket that reached them.
    #[must_use]
    pub const fn services(&self) -> &BTreeMap<TicketId, Service> {
        &self.services
    }

    /// Proxy-granting tickets delegated beneath this ticket.
    #[must_use]
    pub const fn proxy_granting_tickets(&self) -> &BTreeSet<TicketId> {
        &self.proxy_granting_tickets
    }

    /// Every service and proxy ticket granted, superseded ones included.
    #[must_use]
    pub const fn granted_tickets(&self) -> &BTreeSet<TicketId> {
        &self.granted_tickets
    }

    /// Every direct child id (granted tickets and delegated PGTs).
    pub fn children(&self) -> impl Iterator<Item = &TicketId> {
        let untracked = self
            .services
            .keys()
            .filter(|id| !self.granted_tickets.contains(*id));
        self.granted_tickets
            .iter()
            .chain(untracked)
            .chain(self.proxy_granting_tickets.iter())
    }

    /// Record a granted ticket.
    ///
    /// With `only_most_recent`, earlier entries for the same service are
    /// dropped from the logout notification list. The tickets themselves
    /// stay children of this session.
    pub(crate) fn track_service(&mut self, id: TicketId, service: Service, only_most_recent: bool) {
        if only_most_recent {
            self.services.retain(|_, tracked| !tracked.matches(&service));
        }
        self.granted_tickets.insert(id.clone());
        self.services.insert(id, service);
    }

    pub(crate) fn track_proxy_granting_ticket(&mut self, id: TicketId) {
        self.proxy_granting_tickets.insert(id);
    }
}

/// State of a ticket presented to a service (ST, PT).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    granting_ticket: TicketId,
    service: Service,
    from_new_login: bool,
    #[serde(default)]
    granted_proxy_granting_ticket: Option<TicketId>,
}

impl ServiceTicket {
    pub(crate) const fn new(granting_ticket: TicketId, service: Service, from_new_login: bool) -> Self {
        Self {
            granting_ticket,
            service,
            from_new_login,
            granted_proxy_granting_ticket: None,
        }
    }

    /// Granting ticket (TGT or PGT) that issued this ticket.
    #[must_use]
    pub const fn granting_ticket(&self) -> &TicketId {
        &self.granting_ticket
    }

    /// Service the ticket was issued for.
    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    /// Whether the issuing session authenticated in the same transaction.
    #[must_use]
    pub const fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }

    /// Proxy-granting ticket already delegated from this ticket, if any.
    #[must_use]
    pub const fn granted_proxy_granting_ticket(&self) -> Option<&TicketId> {
        self.granted_proxy_granting_ticket.as_ref()
    }

    /// Whether `service` may redeem this ticket.
    #[must_use]
    pub fn is_valid_for(&self, service: &Service) -> bool {
        self.service.matches(service)
    }

    pub(crate) fn record_proxy_granting_ticket(&mut self, id: TicketId) {
        self.granted_proxy_granting_ticket = Some(id);
    }
}

impl Ticket {
    pub(crate) const fn new(
        id: TicketId,
        body: TicketBody,
        expiration_policy: ExpirationPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            expired: false,
            version: 0,
            body,
        }
    }

    /// Ticket identifier.
    #[must_use]
    pub const fn id(&self) -> &TicketId {
        &self.id
    }

    /// Ticket kind.
    #[must_use]
    pub const fn kind(&self) -> TicketKind {
        self.body.kind()
    }

    /// When the ticket was created.
    #[must_use]
    pub const fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// When the ticket was last used (creation time if never used).
    #[must_use]
    pub const fn last_time_used(&self) -> DateTime<Utc> {
        self.last_time_used
    }

    /// Use before the last one, if any.
    #[must_use]
    pub const fn previous_time_used(&self) -> Option<DateTime<Utc>> {
        self.previous_time_used
    }

    /// Number of times the ticket has been used.
    #[must_use]
    pub const fn count_of_uses(&self) -> u32 {
        self.count_of_uses
    }

    /// Attached expiration policy.
    #[must_use]
    pub const fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.expiration_policy
    }

    /// Storage version for compare-and-swap updates.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Set the storage version.
    ///
    /// Registry implementations call this when loading a ticket and after a
    /// successful update; nothing else should.
    pub const fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Kind-specific contents.
    #[must_use]
    pub const fn body(&self) -> &TicketBody {
        &self.body
    }

    /// Whether this ticket is a session root (TGT).
    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self.body, TicketBody::TicketGranting(_))
    }

    /// Granting state, for TGTs and PGTs.
    #[must_use]
    pub const fn as_granting(&self) -> Option<&GrantingTicket> {
        match &self.body {
            TicketBody::TicketGranting(state) | TicketBody::ProxyGranting(state) => Some(state),
            TicketBody::Service(_) | TicketBody::Proxy(_) => None,
        }
    }

    pub(crate) const fn as_granting_mut(&mut self) -> Option<&mut GrantingTicket> {
        match &mut self.body {
            TicketBody::TicketGranting(state) | TicketBody::ProxyGranting(state) => Some(state),
            TicketBody::Service(_) | TicketBody::Proxy(_) => None,
        }
    }

    /// Service state, for STs and PTs.
    #[must_use]
    pub const fn as_service(&self) -> Option<&ServiceTicket> {
        match &self.body {
            TicketBody::Service(state) | TicketBody::Proxy(state) => Some(state),
            TicketBody::TicketGranting(_) | TicketBody::ProxyGranting(_) => None,
        }
    }

    pub(crate) const fn as_service_mut(&mut self) -> Option<&mut ServiceTicket> {
        match &mut self.body {
            TicketBody::Service(state) | TicketBody::Proxy(state) => Some(state),
            TicketBody::TicketGranting(_) | TicketBody::ProxyGranting(_) => None,
        }
    }

    /// Whether the ticket is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expired || self.expiration_policy.is_expired(self, now)
    }

    /// Lifecycle state at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TicketState {
        if self.is_expired(now) {
            return TicketState::Expired;
        }
        match self.expiration_policy.max_uses() {
            Some(max) if self.count_of_uses >= max => TicketState::Consumed,
            _ => TicketState::Valid,
        }
    }

    /// Record a use at `now`.
    pub fn record_use(&mut self, now: DateTime<Utc>) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }

    /// Force the ticket into the expired state.
    pub const fn mark_expired(&mut self) {
        self.expired = true;
    }

    /// Direct children (empty for service and proxy tickets).
    #[must_use]
    pub fn children(&self) -> Vec<TicketId> {
        self.as_granting()
            .map(|state| state.children().cloned().collect())
            .unwrap_or_default()
    }

    /// When a backend may drop this ticket on its own, if ever.
    #[must_use]
    pub fn backend_expiry(&self) -> Option<DateTime<Utc>> {
        self.expiration_policy.backend_expiry(self)
    }
}
