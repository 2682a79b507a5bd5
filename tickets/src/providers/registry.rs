//! Ticket registry trait.
//!
//! The registry is the single extension point for storage backends. Every
//! node of the broker talks to the same logical registry, so the backend
//! (not the engine) is responsible for atomicity:
//!
//! - `add_ticket` never overwrites: a duplicate id is a fatal
//!   [`TicketError::TicketAlreadyExists`]
//! - `update_ticket` is a compare-and-swap on the ticket's version; of N
//!   concurrent updates from the same snapshot exactly one succeeds
//! - `delete_single_ticket` is idempotent
//!
//! Cascading deletion and kind-checked lookups are provided on top of these
//! primitives.

use crate::error::{Result, TicketError};
use crate::ids::{TicketId, TicketKind};
use crate::ticket::Ticket;
use futures::stream::BoxStream;
use sso_broker_core::service::Service;
use std::collections::{BTreeSet, VecDeque};

/// Outcome of a cascading delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Tickets actually removed, descendants before ancestors.
    pub deleted: Vec<TicketId>,
    /// Services that held tickets from the removed granting tickets.
    pub services: BTreeSet<Service>,
}

impl DeletionReport {
    /// Number of tickets removed.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.deleted.len()
    }
}

/// Shared ticket storage.
///
/// # Implementation Notes
///
/// - Every backend call must be bounded by the configured operation timeout
///   and surface [`TicketError::RegistryUnavailable`] instead of blocking
/// - Stored tickets carry their version; `get_ticket` must return it set
/// - **CRITICAL**: `update_ticket` MUST be a single atomic backend
///   operation (Lua script, conditional `UPDATE`, or a lock held across the
///   check and the write). A read-then-write implementation lets two
///   validations of one service ticket both succeed.
pub trait TicketRegistry: Send + Sync {
    /// Store a new ticket.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketAlreadyExists`] if the id is already stored
    /// - [`TicketError::RegistryUnavailable`] on backend failure or timeout
    fn add_ticket(&self, ticket: &Ticket) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load a ticket by id.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(ticket))`: stored, with its current version
    /// - `Ok(None)`: never stored, deleted, or dropped by backend expiry
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    fn get_ticket(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>>> + Send;

    /// Replace a stored ticket if nobody else changed it since it was read.
    ///
    /// On success the stored version and `ticket`'s version are both
    /// incremented.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidTicket`] if the ticket is no longer stored
    /// - [`TicketError::ConcurrentModification`] if the stored version
    ///   differs from `ticket.version()`
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    fn update_ticket(
        &self,
        ticket: &mut Ticket,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove one ticket without touching its descendants.
    ///
    /// Returns whether a ticket was removed.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    fn delete_single_ticket(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Stream every stored ticket.
    ///
    /// The stream is lazy (backends page through storage) and restartable
    /// (calling again starts a fresh pass). Tickets added or removed during
    /// a pass may or may not be observed.
    fn get_tickets_stream(&self) -> BoxStream<'_, Result<Ticket>>;

    /// Number of stored tickets of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    fn count_tickets_of_kind(
        &self,
        kind: TicketKind,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;

    /// Load a ticket that must exist and be of `kind`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidTicket`] if absent
    /// - [`TicketError::TicketKindMismatch`] if stored with another kind
    /// - [`TicketError::RegistryUnavailable`] on backend failure
    fn get_ticket_of_kind(
        &self,
        id: &TicketId,
        kind: TicketKind,
    ) -> impl std::future::Future<Output = Result<Ticket>> + Send {
        async move {
            let ticket = self
                .get_ticket(id)
                .await?
                .ok_or_else(|| TicketError::InvalidTicket { id: id.clone() })?;

            if ticket.kind() == kind {
                Ok(ticket)
            } else {
                Err(TicketError::TicketKindMismatch {
                    id: id.clone(),
                    expected: kind,
                    actual: ticket.kind(),
                })
            }
        }
    }

    /// Remove a ticket and everything beneath it.
    ///
    /// Descendants are discovered breadth-first through each granting
    /// ticket's child list and removed before their ancestors, so a crash
    /// mid-way never leaves a child whose parent is already gone. Children
    /// that are already missing are skipped. Deleting an absent id is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::RegistryUnavailable`] on backend failure.
    fn delete_ticket(
        &self,
        id: &TicketId,
    ) -> impl std::future::Future<Output = Result<DeletionReport>> + Send {
        async move {
            let mut report = DeletionReport::default();
            let mut order = Vec::new();
            let mut visited = BTreeSet::new();
            let mut queue = VecDeque::from([id.clone()]);

            while let Some(current) = queue.pop_front() {
                if !visited.insert(current.clone()) {
                    continue;
                }
                if let Some(ticket) = self.get_ticket(&current).await? {
                    if let Some(granting) = ticket.as_granting() {
                        report.services.extend(granting.services().values().cloned());
                        queue.extend(granting.children().cloned());
                    }
                }
                order.push(current);
            }

            for current in order.into_iter().rev() {
                if self.delete_single_ticket(&current).await? {
                    report.deleted.push(current);
                }
            }

            if report.removed() > 0 {
                tracing::debug!(ticket_id = %id, removed = report.removed(), "Deleted ticket tree");
            }

            Ok(report)
        }
    }
}
