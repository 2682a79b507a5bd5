//! `PostgreSQL` ticket registry for the SSO broker.
//!
//! This crate provides a PostgreSQL-backed implementation of the
//! `TicketRegistry` and `LockingStrategy` traits from `sso-broker-tickets`.
//! It uses sqlx with runtime-checked queries and supports:
//!
//! - Compare-and-swap updates on a `version` column
//! - Lazy, keyset-paginated streaming for the cleaner
//! - Optional expiry timestamps as a backstop to the cleaner
//! - A row lease lock so one node sweeps at a time
//!
//! # Example
//!
//! ```ignore
//! use sso_broker_postgres::PostgresTicketRegistry;
//! use sso_broker_tickets::config::RegistryConfig;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = PostgresTicketRegistry::new("postgres://localhost/cas", RegistryConfig::default()).await?;
//!     registry.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod lock;
pub mod registry;

pub use lock::PostgresLockingStrategy;
pub use registry::PostgresTicketRegistry;

use sso_broker_tickets::TicketError;

/// Map a sqlx failure to the registry's availability error.
pub(crate) fn unavailable(operation: &str, error: &sqlx::Error) -> TicketError {
    TicketError::RegistryUnavailable(format!("PostgreSQL {operation} failed: {error}"))
}

/// Run one database call under `timeout`.
pub(crate) async fn bounded<T>(
    operation: &str,
    timeout: std::time::Duration,
    call: impl std::future::Future<Output = Result<T, sqlx::Error>> + Send,
) -> Result<T, TicketError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(unavailable(operation, &e)),
        Err(_) => Err(TicketError::RegistryUnavailable(format!(
            "PostgreSQL {operation} timed out after {timeout:?}"
        ))),
    }
}
