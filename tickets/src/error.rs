//! Error types for ticket issuance, validation and storage.

use crate::ids::{TicketId, TicketKind};
use thiserror::Error;

/// Result type alias for ticket operations.
pub type Result<T> = std::result::Result<T, TicketError>;

/// Error taxonomy for the ticket subsystem.
///
/// Every variant is surfaced to the calling protocol front end, which maps
/// it to a wire-level failure via [`TicketError::protocol_code`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    // ═══════════════════════════════════════════════════════════
    // Ticket Errors
    // ═══════════════════════════════════════════════════════════

    /// Ticket does not exist (never issued, already removed, or cascaded away).
    #[error("Ticket {id} is not recognized")]
    InvalidTicket {
        /// Ticket that could not be resolved
        id: TicketId,
    },

    /// Ticket exists but is of a different kind than the operation expects.
    #[error("Ticket {id} is a {actual} where a {expected} is required")]
    TicketKindMismatch {
        /// Ticket presented
        id: TicketId,
        /// Kind the operation requires
        expected: TicketKind,
        /// Kind actually stored
        actual: TicketKind,
    },

    /// Ticket's expiration policy reports it expired.
    #[error("Ticket {id} has expired")]
    ExpiredTicket {
        /// Expired ticket
        id: TicketId,
    },

    /// Single-use (or n-use) ticket presented after its last allowed use.
    #[error("Ticket {id} has already been used")]
    TicketReuse {
        /// Replayed ticket
        id: TicketId,
    },

    /// Fresh primary authentication is required (`renew` requested on an
    /// established session).
    #[error("Ticket {id} cannot satisfy a renew request without new credentials")]
    AuthenticationRequired {
        /// Ticket-granting ticket that was asked to renew
        id: TicketId,
    },

    /// Re-authentication produced a different principal than the session's.
    #[error("Principal {actual} does not match session principal {expected}")]
    MixedPrincipal {
        /// Principal bound to the session
        expected: String,
        /// Principal from the new authentication
        actual: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Service Authorization Errors
    // ═══════════════════════════════════════════════════════════

    /// Service is not registered, disabled, or does not match the ticket.
    #[error("Service {service} is not authorized for this ticket")]
    UnauthorizedService {
        /// Service presented
        service: String,
    },

    /// Service does not participate in single sign-on and no credentials
    /// were supplied.
    #[error("Service {service} requires a fresh login")]
    UnauthorizedSsoService {
        /// Service presented
        service: String,
    },

    /// Service asked for a proxy-granting ticket but may not proxy.
    #[error("Service {service} is not allowed to proxy")]
    UnauthorizedProxying {
        /// Service presented
        service: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Registry Errors
    // ═══════════════════════════════════════════════════════════

    /// Identifier collision on add; indicates a broken id generator.
    #[error("Ticket {id} already exists")]
    TicketAlreadyExists {
        /// Colliding identifier
        id: TicketId,
    },

    /// Compare-and-swap lost against a concurrent writer.
    #[error("Ticket {id} was modified concurrently")]
    ConcurrentModification {
        /// Contended ticket
        id: TicketId,
    },

    /// Backend I/O failed or timed out.
    #[error("Ticket registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Stored ticket body could not be encoded or decoded.
    #[error("Ticket serialization failed: {0}")]
    SerializationError(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Internal invariant violated (should not be exposed to users).
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TicketError {
    /// CAS protocol failure code for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_broker_tickets::{TicketError, TicketId};
    /// let err = TicketError::TicketReuse { id: TicketId::from("ST-1-abc") };
    /// assert_eq!(err.protocol_code(), "INVALID_TICKET");
    /// ```
    #[must_use]
    pub const fn protocol_code(&self) -> &'static str {
        match self {
            Self::InvalidTicket { .. }
            | Self::TicketKindMismatch { .. }
            | Self::ExpiredTicket { .. }
            | Self::TicketReuse { .. } => "INVALID_TICKET",
            Self::AuthenticationRequired { .. } | Self::MixedPrincipal { .. } => {
                "INVALID_TICKET_SPEC"
            }
            Self::UnauthorizedService { .. } | Self::UnauthorizedSsoService { .. } => {
                "INVALID_SERVICE"
            }
            Self::UnauthorizedProxying { .. } => "UNAUTHORIZED_SERVICE_PROXY",
            Self::TicketAlreadyExists { .. }
            | Self::ConcurrentModification { .. }
            | Self::RegistryUnavailable(_)
            | Self::SerializationError(_)
            | Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns `true` if retrying the same read may succeed.
    ///
    /// Only backend availability failures qualify; consumption is never
    /// retried regardless.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_broker_tickets::TicketError;
    /// assert!(TicketError::RegistryUnavailable("timeout".into()).is_transient());
    /// assert!(!TicketError::InternalError("bug".into()).is_transient());
    /// ```
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RegistryUnavailable(_))
    }

    /// Returns `true` if this error indicates a security issue.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sso_broker_tickets::{TicketError, TicketId};
    /// assert!(TicketError::TicketReuse { id: TicketId::from("ST-1-x") }.is_security_issue());
    /// assert!(!TicketError::ExpiredTicket { id: TicketId::from("ST-1-x") }.is_security_issue());
    /// ```
    #[must_use]
    pub const fn is_security_issue(&self) -> bool {
        matches!(
            self,
            Self::TicketReuse { .. }
                | Self::TicketKindMismatch { .. }
                | Self::UnauthorizedService { .. }
                | Self::UnauthorizedProxying { .. }
                | Self::MixedPrincipal { .. }
                | Self::TicketAlreadyExists { .. }
        )
    }
}
