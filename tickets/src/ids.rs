//! Ticket identifiers, kinds, and the unique id generator.
//!
//! # Identifier format
//!
//! ```text
//! {PREFIX}-{sequence}-{random}[-{node suffix}]
//!   TGT-  42 -  Zk3v...43 chars...   - node-a
//! ```
//!
//! - **prefix**: ticket kind (`TGT`, `ST`, `PGT`, `PT`) or `PGTIOU`
//! - **sequence**: per-generator counter, for operational tracing only
//! - **random**: CSPRNG bytes, URL-safe base64 without padding; this is the
//!   only component that makes an id unguessable
//! - **node suffix**: optional cluster node name, never replaces entropy

use crate::constants::ids::{DEFAULT_RANDOM_BYTES, MIN_RANDOM_BYTES};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Ticket identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    /// Wrap an identifier string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind implied by the identifier prefix, if recognizable.
    #[must_use]
    pub fn kind(&self) -> Option<TicketKind> {
        let (prefix, _) = self.0.split_once('-')?;
        TicketKind::from_prefix(prefix)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TicketId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TicketId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Closed set of ticket kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketKind {
    /// Ticket-granting ticket: an authenticated SSO session.
    TicketGranting,
    /// Service ticket: single-use credential for one application.
    Service,
    /// Proxy-granting ticket: delegated session held by a proxying service.
    ProxyGranting,
    /// Proxy ticket: service ticket minted from a proxy-granting ticket.
    Proxy,
}

impl TicketKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::TicketGranting,
        Self::Service,
        Self::ProxyGranting,
        Self::Proxy,
    ];

    /// Identifier prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::TicketGranting => "TGT",
            Self::Service => "ST",
            Self::ProxyGranting => "PGT",
            Self::Proxy => "PT",
        }
    }

    /// Parse an identifier prefix.
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Whether tickets of this kind grant child tickets.
    #[must_use]
    pub const fn is_granting(self) -> bool {
        matches!(self, Self::TicketGranting | Self::ProxyGranting)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Source of unguessable ticket identifiers.
///
/// Implementations must draw the random component from a CSPRNG; a
/// predictable ticket id is a forgeable session.
pub trait UniqueTicketIdGenerator: Send + Sync {
    /// Generate a fresh identifier starting with `{prefix}-`.
    fn generate(&self, prefix: &str) -> String;

    /// Generate a fresh identifier for a ticket of `kind`.
    fn generate_ticket_id(&self, kind: TicketKind) -> TicketId {
        TicketId::new(self.generate(kind.prefix()))
    }
}

/// Default generator: sequence number, OS randomness, optional node suffix.
#[derive(Debug)]
pub struct DefaultUniqueTicketIdGenerator {
    sequence: AtomicU64,
    random_bytes: usize,
    suffix: Option<String>,
}

impl DefaultUniqueTicketIdGenerator {
    /// Create a generator drawing `random_bytes` bytes per id.
    ///
    /// Values below 16 bytes are raised to 16.
    #[must_use]
    pub fn new(random_bytes: usize) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            random_bytes: random_bytes.max(MIN_RANDOM_BYTES),
            suffix: None,
        }
    }

    /// Append `suffix` (e.g. a node name) to every id.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    /// Random bytes drawn per identifier.
    #[must_use]
    pub const fn random_bytes(&self) -> usize {
        self.random_bytes
    }

    fn random_component(&self) -> String {
        let mut bytes = vec![0u8; self.random_bytes];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }
}

impl Default for DefaultUniqueTicketIdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_RANDOM_BYTES)
    }
}

impl UniqueTicketIdGenerator for DefaultUniqueTicketIdGenerator {
    fn generate(&self, prefix: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let random = self.random_component();
        match &self.suffix {
            Some(suffix) => format!("{prefix}-{sequence}-{random}-{suffix}"),
            None => format!("{prefix}-{sequence}-{random}"),
        }
    }
}
