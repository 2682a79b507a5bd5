//! Redis lease lock for the registry cleaner.
//!
//! The lock is a string key `cas:lock:{application_id}` whose value is the
//! holder's unique id, written with a `PX` lease. Both operations are Lua
//! scripts so ownership is checked and changed in one step.

use super::bounded;
use crate::config::LockConfig;
use crate::constants::keys::LOCK_KEY_PREFIX;
use crate::constants::limits::LOCK_OPERATION_TIMEOUT;
use crate::error::{Result, TicketError};
use crate::providers::LockingStrategy;
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;

const ACQUIRE_SCRIPT: &str = r"
    local holder = redis.call('GET', KEYS[1])
    if holder and holder ~= ARGV[1] then
        return 0
    end
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
";

const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// `Redis` lease lock.
#[derive(Clone)]
pub struct RedisLockingStrategy {
    conn_manager: ConnectionManager,
    config: LockConfig,
    timeout: Duration,
}

impl RedisLockingStrategy {
    /// Connect to `Redis`.
    ///
    /// Connecting, acquiring and releasing are each bounded by
    /// [`LOCK_OPERATION_TIMEOUT`] unless changed with [`Self::with_timeout`].
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] if the connection fails
    /// or times out.
    pub async fn new(redis_url: &str, config: LockConfig) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            TicketError::RegistryUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager =
            bounded("connect", LOCK_OPERATION_TIMEOUT, ConnectionManager::new(client)).await?;

        Ok(Self {
            conn_manager,
            config,
            timeout: LOCK_OPERATION_TIMEOUT,
        })
    }

    /// Budget for each lock call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `cas:lock:{application_id}`
    fn lock_key(&self) -> String {
        format!("{LOCK_KEY_PREFIX}{}", self.config.application_id)
    }
}

impl LockingStrategy for RedisLockingStrategy {
    async fn acquire(&self) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let lease_ms = self.config.lease_seconds.saturating_mul(1_000).max(1);

        let script = redis::Script::new(ACQUIRE_SCRIPT);
        let mut invocation = script.key(self.lock_key());
        invocation.arg(&self.config.unique_id).arg(lease_ms);
        let acquired: i64 = bounded("lock acquire", self.timeout, async move {
            invocation.invoke_async(&mut conn).await
        })
        .await?;

        tracing::debug!(
            application_id = %self.config.application_id,
            holder = %self.config.unique_id,
            acquired = acquired == 1,
            "Cleaner lock acquisition attempted"
        );

        Ok(acquired == 1)
    }

    async fn release(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();

        let script = redis::Script::new(RELEASE_SCRIPT);
        let mut invocation = script.key(self.lock_key());
        invocation.arg(&self.config.unique_id);
        let _: i64 = bounded("lock release", self.timeout, async move {
            invocation.invoke_async(&mut conn).await
        })
        .await?;

        Ok(())
    }
}

impl std::fmt::Debug for RedisLockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockingStrategy")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
