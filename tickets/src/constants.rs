//! Ticket subsystem constants.
//!
//! This module contains constant values shared by the factory, the engine
//! and the storage backends.

/// Storage key layout shared by key/value backends.
pub mod keys {
    /// Prefix of every stored ticket: `cas:ticket:{ticket_id}`.
    pub const TICKET_KEY_PREFIX: &str = "cas:ticket:";

    /// Prefix of cleaner lock keys: `cas:lock:{application_id}`.
    pub const LOCK_KEY_PREFIX: &str = "cas:lock:";
}

/// Identifier generation.
pub mod ids {
    /// Prefix of proxy-granting ticket IOUs handed to proxy callbacks.
    pub const PROXY_GRANTING_TICKET_IOU_PREFIX: &str = "PGTIOU";

    /// Lower bound on random bytes per identifier (128 bits).
    pub const MIN_RANDOM_BYTES: usize = 16;

    /// Default random bytes per identifier (256 bits).
    pub const DEFAULT_RANDOM_BYTES: usize = 32;
}

/// Engine limits.
pub mod limits {
    /// Extra attempts at a contended ticket update before giving up.
    pub const MAX_GRANT_ATTEMPTS: usize = 5;

    /// Longest proxy chain walked when building an assertion.
    pub const MAX_PROXY_CHAIN_DEPTH: usize = 64;

    /// Budget for each cleaner lock call against a shared backend.
    pub const LOCK_OPERATION_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

    /// Slack added to backend-native expiry so the engine still sees, and
    /// reports, an expired ticket before the backend drops it.
    pub const BACKEND_EXPIRY_GRACE_SECONDS: i64 = 60;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefixes() {
        assert_eq!(format!("{}TGT-1-abc", keys::TICKET_KEY_PREFIX), "cas:ticket:TGT-1-abc");
        assert!(keys::LOCK_KEY_PREFIX.ends_with(':'));
    }

    #[test]
    fn test_random_bytes_bounds() {
        assert!(ids::MIN_RANDOM_BYTES <= ids::DEFAULT_RANDOM_BYTES);
    }
}
