//! In-process locking strategies.

use crate::config::LockConfig;
use crate::error::Result;
use crate::providers::LockingStrategy;
use chrono::{DateTime, Utc};
use sso_broker_core::environment::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Lock that is always granted. For single-node deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

impl LockingStrategy for NoOpLockingStrategy {
    async fn acquire(&self) -> Result<bool> {
        Ok(true)
    }

    async fn release(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// Lease table shared by every in-process lock holder.
///
/// Each simulated node takes a [`MemoryLockingStrategy`] handle from the
/// same table; the table then behaves like the lock row a database-backed
/// strategy would use.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockTable {
    leases: Arc<Mutex<HashMap<String, Lease>>>,
}

impl InMemoryLockTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for one holder identity.
    #[must_use]
    pub fn strategy(&self, config: LockConfig, clock: Arc<dyn Clock>) -> MemoryLockingStrategy {
        MemoryLockingStrategy {
            table: self.clone(),
            config,
            clock,
        }
    }

    /// Current holder of `application_id`, if the lease is still running at `now`.
    #[must_use]
    pub fn holder(&self, application_id: &str, now: DateTime<Utc>) -> Option<String> {
        let leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        leases
            .get(application_id)
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.holder.clone())
    }
}

/// Lease lock held in an [`InMemoryLockTable`].
pub struct MemoryLockingStrategy {
    table: InMemoryLockTable,
    config: LockConfig,
    clock: Arc<dyn Clock>,
}

impl LockingStrategy for MemoryLockingStrategy {
    async fn acquire(&self) -> Result<bool> {
        let now = self.clock.now();
        let mut leases = self.table.leases.lock().unwrap_or_else(PoisonError::into_inner);

        let available = leases.get(&self.config.application_id).is_none_or(|lease| {
            lease.expires_at <= now || lease.holder == self.config.unique_id
        });

        if available {
            leases.insert(
                self.config.application_id.clone(),
                Lease {
                    holder: self.config.unique_id.clone(),
                    expires_at: self.config.lease_until(now),
                },
            );
        }
        Ok(available)
    }

    async fn release(&self) -> Result<()> {
        let mut leases = self.table.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if leases
            .get(&self.config.application_id)
            .is_some_and(|lease| lease.holder == self.config.unique_id)
        {
            leases.remove(&self.config.application_id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryLockingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLockingStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
