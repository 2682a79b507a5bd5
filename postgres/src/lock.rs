//! `PostgreSQL` lease lock for the registry cleaner.
//!
//! One row per application in `cas_locks`. Acquiring is a conditional
//! upsert that only succeeds when the row is free, already ours, or its
//! lease has run out; releasing clears the holder if it is still us.

use crate::bounded;
use sqlx::PgPool;
use sso_broker_core::environment::Clock;
use sso_broker_tickets::config::LockConfig;
use sso_broker_tickets::constants::limits::LOCK_OPERATION_TIMEOUT;
use sso_broker_tickets::{LockingStrategy, Result};
use std::sync::Arc;

/// `PostgreSQL` lease lock.
#[derive(Clone)]
pub struct PostgresLockingStrategy {
    pool: PgPool,
    config: LockConfig,
    clock: Arc<dyn Clock>,
    timeout: std::time::Duration,
}

impl PostgresLockingStrategy {
    /// Create a lock over `pool` (usually the registry's pool).
    #[must_use]
    pub fn new(pool: PgPool, config: LockConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            config,
            clock,
            timeout: LOCK_OPERATION_TIMEOUT,
        }
    }

    /// Budget for each lock query.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl LockingStrategy for PostgresLockingStrategy {
    async fn acquire(&self) -> Result<bool> {
        let now = self.clock.now();
        let lease_until = self.config.lease_until(now);

        let result = bounded(
            "lock acquire",
            self.timeout,
            sqlx::query(
                r"
                INSERT INTO cas_locks (application_id, unique_id, expiration_date)
                VALUES ($1, $2, $3)
                ON CONFLICT (application_id) DO UPDATE
                SET unique_id = EXCLUDED.unique_id,
                    expiration_date = EXCLUDED.expiration_date
                WHERE cas_locks.unique_id IS NULL
                   OR cas_locks.unique_id = EXCLUDED.unique_id
                   OR cas_locks.expiration_date <= $4
                ",
            )
            .bind(&self.config.application_id)
            .bind(&self.config.unique_id)
            .bind(lease_until)
            .bind(now)
            .execute(&self.pool),
        )
        .await?;

        let acquired = result.rows_affected() == 1;
        tracing::debug!(
            application_id = %self.config.application_id,
            holder = %self.config.unique_id,
            acquired,
            "Cleaner lock acquisition attempted"
        );
        Ok(acquired)
    }

    async fn release(&self) -> Result<()> {
        bounded(
            "lock release",
            self.timeout,
            sqlx::query(
                r"
                UPDATE cas_locks
                SET unique_id = NULL, expiration_date = NULL
                WHERE application_id = $1 AND unique_id = $2
                ",
            )
            .bind(&self.config.application_id)
            .bind(&self.config.unique_id)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }
}

impl std::fmt::Debug for PostgresLockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresLockingStrategy")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
