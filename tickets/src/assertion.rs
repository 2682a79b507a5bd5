//! Validation results.

use crate::ids::TicketId;
use chrono::{DateTime, Utc};
use sso_broker_core::authentication::{Authentication, Principal};
use sso_broker_core::service::Service;

/// What a successful validation tells the service. Never persisted.
///
/// Only the released view of the session is carried: the principal after
/// the service's release policy and when the login happened. The root
/// principal and its attributes stay in the ticket-granting ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    principal: Principal,
    authenticated_at: DateTime<Utc>,
    service: Service,
    proxies: Vec<Service>,
    from_new_login: bool,
}

impl Assertion {
    pub(crate) const fn new(
        principal: Principal,
        authentication: &Authentication,
        service: Service,
        proxies: Vec<Service>,
        from_new_login: bool,
    ) -> Self {
        Self {
            principal,
            authenticated_at: authentication.authenticated_at(),
            service,
            proxies,
            from_new_login,
        }
    }

    /// Principal as released to the service (id and attributes filtered by
    /// the service's release policy).
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// When the session's root login happened.
    #[must_use]
    pub const fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at
    }

    /// Service the ticket was validated for.
    #[must_use]
    pub const fn service(&self) -> &Service {
        &self.service
    }

    /// Proxy callbacks the ticket passed through, oldest first. Empty for
    /// service tickets.
    #[must_use]
    pub fn proxies(&self) -> &[Service] {
        &self.proxies
    }

    /// Whether the session authenticated in the same transaction.
    #[must_use]
    pub const fn is_from_new_login(&self) -> bool {
        self.from_new_login
    }
}

/// Proxy-granting ticket handed to a callback during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGrant {
    /// Ticket delivered to the callback.
    pub ticket_id: TicketId,
    /// IOU returned in the validation response.
    pub iou: String,
}

/// Assertion plus the optional proxy grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Validated assertion.
    pub assertion: Assertion,
    /// Present when a callback was requested and accepted delivery.
    pub proxy_grant: Option<ProxyGrant>,
}
