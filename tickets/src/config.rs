//! Ticket subsystem configuration.
//!
//! This module provides configuration structures for ticket lifetimes,
//! identifier generation, the registry cleaner and its lock, and registry
//! I/O. Values are supplied by the application (loading them is out of
//! scope); every struct has production defaults and `with_*` builders.

use crate::constants::ids::DEFAULT_RANDOM_BYTES;
use crate::expiration::ExpirationPolicy;
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ticket-granting ticket (session) lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicketConfig {
    /// Hard maximum session lifetime in seconds.
    ///
    /// Default: 8 hours
    pub max_time_to_live_seconds: i64,

    /// Idle timeout in seconds.
    ///
    /// Default: 2 hours
    pub time_to_kill_seconds: i64,
}

impl TicketGrantingTicketConfig {
    /// Create session configuration with the given lifetimes.
    #[must_use]
    pub const fn new(max_time_to_live_seconds: i64, time_to_kill_seconds: i64) -> Self {
        Self {
            max_time_to_live_seconds,
            time_to_kill_seconds,
        }
    }

    /// Expiration policy for tickets built from this configuration.
    #[must_use]
    pub const fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::TicketGranting {
            max_time_to_live_seconds: self.max_time_to_live_seconds,
            time_to_kill_seconds: self.time_to_kill_seconds,
        }
    }
}

impl Default for TicketGrantingTicketConfig {
    fn default() -> Self {
        Self::new(28_800, 7_200)
    }
}

/// Service and proxy ticket lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicketConfig {
    /// Hard lifetime in seconds.
    ///
    /// Default: 10 seconds
    pub time_to_kill_seconds: i64,

    /// Validations allowed per ticket.
    ///
    /// Default: 1
    pub number_of_uses: u32,
}

impl ServiceTicketConfig {
    /// Create configuration with the given lifetime and a single use.
    #[must_use]
    pub const fn new(time_to_kill_seconds: i64) -> Self {
        Self {
            time_to_kill_seconds,
            number_of_uses: 1,
        }
    }

    /// Allow more than one validation per ticket.
    #[must_use]
    pub const fn with_number_of_uses(mut self, number_of_uses: u32) -> Self {
        self.number_of_uses = number_of_uses;
        self
    }

    /// Expiration policy for tickets built from this configuration.
    #[must_use]
    pub const fn policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            time_to_live_seconds: self.time_to_kill_seconds,
            number_of_uses: self.number_of_uses,
        }
    }
}

impl Default for ServiceTicketConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

/// Identifier generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdGeneratorConfig {
    /// Random bytes per identifier (minimum 16).
    ///
    /// Default: 32
    pub random_bytes: usize,

    /// Node name appended to identifiers for operational tracing.
    pub node_suffix: Option<String>,
}

impl IdGeneratorConfig {
    /// Append `suffix` to generated identifiers.
    #[must_use]
    pub fn with_node_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.node_suffix = Some(suffix.into());
        self
    }

    /// Set random bytes per identifier.
    #[must_use]
    pub const fn with_random_bytes(mut self, random_bytes: usize) -> Self {
        self.random_bytes = random_bytes;
        self
    }
}

impl Default for IdGeneratorConfig {
    fn default() -> Self {
        Self {
            random_bytes: DEFAULT_RANDOM_BYTES,
            node_suffix: None,
        }
    }
}

/// Registry cleaner schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Whether the scheduled sweep runs at all.
    ///
    /// Default: true
    pub enabled: bool,

    /// Delay before the first sweep.
    ///
    /// Default: 20 seconds
    pub start_delay: Duration,

    /// Interval between sweeps.
    ///
    /// Default: 120 seconds
    pub repeat_interval: Duration,
}

impl CleanerConfig {
    /// Enable or disable scheduled sweeps.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Set the repeat interval.
    #[must_use]
    pub const fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_secs(20),
            repeat_interval: Duration::from_secs(120),
        }
    }
}

/// Cluster-wide cleaner lock settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Name of the lock (one per application).
    ///
    /// Default: `"cas-ticket-registry-cleaner"`
    pub application_id: String,

    /// Identity of this node as a lock holder.
    ///
    /// Default: random UUID per process
    pub unique_id: String,

    /// Lease after which a crashed holder's lock may be taken over.
    ///
    /// Default: 3600 seconds
    pub lease_seconds: i64,
}

impl LockConfig {
    /// Create lock configuration for `application_id` held as `unique_id`.
    #[must_use]
    pub fn new(application_id: impl Into<String>, unique_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            unique_id: unique_id.into(),
            lease_seconds: 3_600,
        }
    }

    /// Set the lease length.
    #[must_use]
    pub const fn with_lease_seconds(mut self, lease_seconds: i64) -> Self {
        self.lease_seconds = lease_seconds;
        self
    }

    /// End of a lease taken at `now`, saturating at the latest
    /// representable instant.
    #[must_use]
    pub fn lease_until(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::try_seconds(self.lease_seconds)
            .and_then(|lease| now.checked_add_signed(lease))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new(
            "cas-ticket-registry-cleaner",
            uuid::Uuid::new_v4().to_string(),
        )
    }
}

/// Registry I/O settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Budget for a single backend call.
    ///
    /// Default: 5 seconds
    pub operation_timeout: Duration,

    /// Retry policy for idempotent reads.
    pub read_retry: RetryPolicy,

    /// Whether backends set native expiry as a backstop to the cleaner.
    ///
    /// Native expiry uses wall-clock timestamps; disable it when tickets are
    /// created with a non-wall clock.
    ///
    /// Default: true
    pub backend_expiry: bool,

    /// Keys or rows fetched per round trip when streaming tickets.
    ///
    /// Default: 250
    pub scan_batch_size: usize,
}

impl RegistryConfig {
    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the read retry policy.
    #[must_use]
    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    /// Enable or disable backend-native expiry.
    #[must_use]
    pub const fn with_backend_expiry(mut self, enabled: bool) -> Self {
        self.backend_expiry = enabled;
        self
    }

    /// Set the streaming batch size.
    #[must_use]
    pub const fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.scan_batch_size = batch_size;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            read_retry: RetryPolicy::builder()
                .max_retries(2)
                .initial_delay(Duration::from_millis(50))
                .max_delay(Duration::from_secs(1))
                .build(),
            backend_expiry: true,
            scan_batch_size: 250,
        }
    }
}

/// Aggregate configuration for the ticket subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketConfig {
    /// Session lifetimes.
    pub ticket_granting: TicketGrantingTicketConfig,
    /// Service ticket lifetimes.
    pub service_ticket: ServiceTicketConfig,
    /// Proxy-granting ticket lifetimes (mirror sessions by default).
    pub proxy_granting: TicketGrantingTicketConfig,
    /// Proxy ticket lifetimes.
    pub proxy_ticket: ServiceTicketConfig,
    /// Identifier generation.
    pub id_generator: IdGeneratorConfig,
    /// Cleaner schedule.
    pub cleaner: CleanerConfig,
    /// Cleaner lock.
    pub lock: LockConfig,
    /// Registry I/O.
    pub registry: RegistryConfig,
    /// Keep only the newest granted ticket per service in a session.
    ///
    /// Default: true
    #[serde(default = "default_only_track_most_recent_session")]
    pub only_track_most_recent_session: bool,
}

const fn default_only_track_most_recent_session() -> bool {
    true
}

impl TicketConfig {
    /// Production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ticket_granting: TicketGrantingTicketConfig::default(),
            service_ticket: ServiceTicketConfig::default(),
            proxy_granting: TicketGrantingTicketConfig::default(),
            proxy_ticket: ServiceTicketConfig::default(),
            id_generator: IdGeneratorConfig::default(),
            cleaner: CleanerConfig::default(),
            lock: LockConfig::default(),
            registry: RegistryConfig::default(),
            only_track_most_recent_session: true,
        }
    }

    /// Set session lifetimes.
    #[must_use]
    pub const fn with_ticket_granting(mut self, config: TicketGrantingTicketConfig) -> Self {
        self.ticket_granting = config;
        self
    }

    /// Set service ticket lifetimes.
    #[must_use]
    pub const fn with_service_ticket(mut self, config: ServiceTicketConfig) -> Self {
        self.service_ticket = config;
        self
    }

    /// Set proxy-granting ticket lifetimes.
    #[must_use]
    pub const fn with_proxy_granting(mut self, config: TicketGrantingTicketConfig) -> Self {
        self.proxy_granting = config;
        self
    }

    /// Set proxy ticket lifetimes.
    #[must_use]
    pub const fn with_proxy_ticket(mut self, config: ServiceTicketConfig) -> Self {
        self.proxy_ticket = config;
        self
    }

    /// Set identifier generation.
    #[must_use]
    pub fn with_id_generator(mut self, config: IdGeneratorConfig) -> Self {
        self.id_generator = config;
        self
    }

    /// Set the cleaner schedule.
    #[must_use]
    pub const fn with_cleaner(mut self, config: CleanerConfig) -> Self {
        self.cleaner = config;
        self
    }

    /// Set the cleaner lock.
    #[must_use]
    pub fn with_lock(mut self, config: LockConfig) -> Self {
        self.lock = config;
        self
    }

    /// Set registry I/O.
    #[must_use]
    pub fn with_registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    /// Track every granted ticket per service instead of only the newest.
    #[must_use]
    pub const fn with_only_track_most_recent_session(mut self, enabled: bool) -> Self {
        self.only_track_most_recent_session = enabled;
        self
    }
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self::new()
    }
}
