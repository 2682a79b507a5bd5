//! Cluster-wide locking for the registry cleaner.

use crate::error::Result;

/// Exclusive, lease-bounded lock.
///
/// One holder at a time across all nodes. The lease is bounded so a holder
/// that crashes without releasing loses the lock once the lease runs out.
/// Re-acquiring a lock this node already holds succeeds and renews it.
pub trait LockingStrategy: Send + Sync {
    /// Try to take the lock without waiting.
    ///
    /// Returns `true` if this node now holds the lock.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached.
    fn acquire(&self) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Give the lock up. Releasing a lock held by another node is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached.
    fn release(&self) -> impl std::future::Future<Output = Result<()>> + Send;
}
