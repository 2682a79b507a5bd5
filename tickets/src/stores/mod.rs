//! Storage implementations for the ticket subsystem.
//!
//! - **Ticket registry** (memory) - single node, tests and development
//! - **Ticket registry** (Redis) - shared registry with Lua compare-and-swap
//! - **Cleaner locks** - no-op, in-process lease table, and Redis lease lock
//!
//! The `PostgreSQL` registry and row lock live in `sso-broker-postgres`.

pub mod lock_memory;
pub mod lock_redis;
pub mod ticket_memory;
pub mod ticket_redis;

// Re-exports
pub use lock_memory::{InMemoryLockTable, MemoryLockingStrategy, NoOpLockingStrategy};
pub use lock_redis::RedisLockingStrategy;
pub use ticket_memory::InMemoryTicketRegistry;
pub use ticket_redis::RedisTicketRegistry;

use crate::error::{Result, TicketError};
use redis::RedisResult;
use std::time::Duration;

/// Run one `Redis` call under `timeout`, mapping every failure to
/// [`TicketError::RegistryUnavailable`].
pub(crate) async fn bounded<T>(
    operation: &str,
    timeout: Duration,
    call: impl std::future::Future<Output = RedisResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TicketError::RegistryUnavailable(format!(
            "Redis {operation} failed: {e}"
        ))),
        Err(_) => Err(TicketError::RegistryUnavailable(format!(
            "Redis {operation} timed out after {timeout:?}"
        ))),
    }
}
