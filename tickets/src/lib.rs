//! # SSO Broker Tickets
//!
//! Ticket lifecycle, shared registry and protocol engine for a single
//! sign-on broker.
//!
//! ## Features
//!
//! - **Four ticket kinds**: sessions (TGT), service tickets (ST), proxy
//!   granting tickets (PGT) and proxy tickets (PT)
//! - **Exactly-once consumption**: validation is a compare-and-swap on the
//!   shared registry
//! - **Cascading logout**: destroying a session removes every descendant
//! - **Pluggable storage**: in-memory and Redis here, `PostgreSQL` in
//!   `sso-broker-postgres`
//! - **Testable**: clock, registry, services and proxy delivery are injected
//!
//! ## Architecture
//!
//! ```text
//! IdGenerator → ExpirationPolicy → Ticket → TicketFactory
//!                                              │
//!              CentralAuthenticationService ◀──┘
//!                         │
//!                  TicketRegistry ◀── TicketRegistryCleaner ── LockingStrategy
//! ```
//!
//! ## Example: login, grant, validate
//!
//! ```rust,ignore
//! let tgt = cas.create_ticket_granting_ticket(authentication).await?;
//! let st = cas.grant_service_ticket(tgt.id(), &service, false).await?;
//!
//! // later, from the service's back channel
//! let assertion = cas.validate_service_ticket(st.id(), &service).await?;
//!
//! // a second validation of the same ticket fails
//! assert!(cas.validate_service_ticket(st.id(), &service).await.is_err());
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod assertion;
pub mod cas;
pub mod cleaner;
pub mod config;
pub mod constants;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod ids;
pub mod providers;
pub mod retry;
pub mod stores;
pub mod ticket;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use assertion::{Assertion, ProxyGrant, ValidationResult};
pub use cas::CentralAuthenticationService;
pub use cleaner::{CleanupOutcome, TicketRegistryCleaner};
pub use config::TicketConfig;
pub use error::{Result, TicketError};
pub use expiration::ExpirationPolicy;
pub use factory::TicketFactory;
pub use ids::{DefaultUniqueTicketIdGenerator, TicketId, TicketKind, UniqueTicketIdGenerator};
pub use providers::{DeletionReport, LockingStrategy, ProxyHandler, TicketRegistry};
pub use ticket::{Ticket, TicketState};
