//! Registry cleaner.
//!
//! Periodically removes expired and consumed tickets (with everything
//! beneath them) from the registry. Every node may run a cleaner; the
//! [`LockingStrategy`] makes sure only one sweeps at a time.
//!
//! # Example
//!
//! ```no_run
//! use sso_broker_core::environment::SystemClock;
//! use sso_broker_tickets::cleaner::TicketRegistryCleaner;
//! use sso_broker_tickets::config::CleanerConfig;
//! use sso_broker_tickets::stores::{InMemoryTicketRegistry, NoOpLockingStrategy};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let cleaner = Arc::new(TicketRegistryCleaner::new(
//!     Arc::new(InMemoryTicketRegistry::new()),
//!     Arc::new(NoOpLockingStrategy),
//!     Arc::new(SystemClock),
//!     CleanerConfig::default(),
//! ));
//!
//! let (shutdown, signal) = tokio::sync::watch::channel(false);
//! let handle = cleaner.spawn(signal);
//!
//! // On application shutdown:
//! shutdown.send(true).ok();
//! handle.await.ok();
//! # }
//! ```

use crate::config::CleanerConfig;
use crate::error::Result;
use crate::providers::{LockingStrategy, TicketRegistry};
use crate::ticket::TicketState;
use futures::StreamExt;
use sso_broker_core::environment::Clock;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one cleaner run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Another node holds the lock (or the lock backend failed).
    Skipped,
    /// Sweep finished.
    Completed {
        /// Tickets removed, descendants included.
        removed: usize,
    },
}

/// Sweeps expired tickets while holding a cluster-wide lock.
pub struct TicketRegistryCleaner<R, L> {
    registry: Arc<R>,
    lock: Arc<L>,
    clock: Arc<dyn Clock>,
    config: CleanerConfig,
}

impl<R, L> TicketRegistryCleaner<R, L>
where
    R: TicketRegistry + 'static,
    L: LockingStrategy + 'static,
{
    /// Create a cleaner.
    #[must_use]
    pub fn new(registry: Arc<R>, lock: Arc<L>, clock: Arc<dyn Clock>, config: CleanerConfig) -> Self {
        Self {
            registry,
            lock,
            clock,
            config,
        }
    }

    /// Run one sweep.
    ///
    /// Not holding the lock is a logged skip, not an error. The lock is
    /// released whether or not the sweep succeeds.
    ///
    /// # Errors
    ///
    /// Returns the registry error that aborted the sweep.
    pub async fn clean(&self) -> Result<CleanupOutcome> {
        match self.lock.acquire().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!("Cleaner lock held by another node, skipping sweep");
                metrics::counter!("registry.cleaner.skipped", "reason" => "locked").increment(1);
                return Ok(CleanupOutcome::Skipped);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not acquire cleaner lock, skipping sweep");
                metrics::counter!("registry.cleaner.skipped", "reason" => "lock_error").increment(1);
                return Ok(CleanupOutcome::Skipped);
            }
        }

        let result = self.sweep().await;

        if let Err(e) = self.lock.release().await {
            tracing::warn!(error = %e, "Failed to release cleaner lock; it will lapse with its lease");
        }

        let removed = result?;
        metrics::counter!("registry.cleaner.removed").increment(u64::try_from(removed).unwrap_or(u64::MAX));
        tracing::info!(removed, "Ticket registry sweep completed");

        Ok(CleanupOutcome::Completed { removed })
    }

    async fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        let mut tickets = self.registry.get_tickets_stream();

        while let Some(ticket) = tickets.next().await {
            let ticket = match ticket {
                Ok(ticket) => ticket,
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable ticket during sweep");
                    metrics::counter!("registry.cleaner.unreadable").increment(1);
                    continue;
                }
            };
            let state = ticket.state(now);
            if state == TicketState::Valid {
                continue;
            }

            let report = self.registry.delete_ticket(ticket.id()).await?;
            tracing::debug!(
                ticket_id = %ticket.id(),
                state = ?state,
                removed = report.removed(),
                "Cleaned ticket"
            );
            removed += report.removed();
        }

        Ok(removed)
    }

    /// Run sweeps on the configured schedule until `shutdown` turns `true`.
    ///
    /// A disabled cleaner returns a task that exits immediately. Errors from
    /// individual sweeps are logged and the schedule continues.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                tracing::info!("Ticket registry cleaner disabled");
                return;
            }
            if *shutdown.borrow() {
                return;
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.start_delay) => {}
                _ = shutdown.changed() => {
                    tracing::info!("Cleaner stopped before first sweep");
                    return;
                }
            }

            // interval() rejects a zero period
            let period = self.config.repeat_interval.max(std::time::Duration::from_millis(1));
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            while !*shutdown.borrow() {
                tokio::select! {
                    _ = ticks.tick() => {
                        if let Err(e) = self.clean().await {
                            tracing::error!(error = %e, "Ticket registry sweep failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Ticket registry cleaner stopped");
        })
    }
}

impl<R, L> std::fmt::Debug for TicketRegistryCleaner<R, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketRegistryCleaner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
