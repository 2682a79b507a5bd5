//! In-memory ticket registry.
//!
//! Single-process registry for tests, development and single-node
//! deployments. All nodes of a cluster must share one registry, so this
//! store only fits when there is exactly one node.

use crate::error::{Result, TicketError};
use crate::ids::{TicketId, TicketKind};
use crate::providers::TicketRegistry;
use crate::ticket::Ticket;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory registry.
///
/// Compare-and-swap happens under the write lock, so concurrent updates
/// from the same snapshot serialize and only the first wins.
///
/// # Thread Safety
///
/// This type is `Clone`; clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketRegistry {
    tickets: Arc<RwLock<HashMap<TicketId, Ticket>>>,
}

impl InMemoryTicketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets.
    pub async fn len(&self) -> usize {
        self.tickets.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.tickets.read().await.is_empty()
    }
}

impl TicketRegistry for InMemoryTicketRegistry {
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        let mut tickets = self.tickets.write().await;
        if tickets.contains_key(ticket.id()) {
            return Err(TicketError::TicketAlreadyExists {
                id: ticket.id().clone(),
            });
        }
        tickets.insert(ticket.id().clone(), ticket.clone());
        Ok(())
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        Ok(self.tickets.read().await.get(id).cloned())
    }

    async fn update_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        let mut tickets = self.tickets.write().await;
        let Some(stored) = tickets.get_mut(ticket.id()) else {
            return Err(TicketError::InvalidTicket {
                id: ticket.id().clone(),
            });
        };

        if stored.version() != ticket.version() {
            return Err(TicketError::ConcurrentModification {
                id: ticket.id().clone(),
            });
        }

        ticket.set_version(ticket.version() + 1);
        *stored = ticket.clone();
        Ok(())
    }

    async fn delete_single_ticket(&self, id: &TicketId) -> Result<bool> {
        Ok(self.tickets.write().await.remove(id).is_some())
    }

    fn get_tickets_stream(&self) -> BoxStream<'_, Result<Ticket>> {
        // snapshot ids only; bodies are fetched lazily as the stream is polled
        stream::once(async move { self.tickets.read().await.keys().cloned().collect::<Vec<_>>() })
            .flat_map(stream::iter)
            .filter_map(move |id| async move { self.get_ticket(&id).await.transpose() })
            .boxed()
    }

    async fn count_tickets_of_kind(&self, kind: TicketKind) -> Result<usize> {
        Ok(self
            .tickets
            .read()
            .await
            .values()
            .filter(|ticket| ticket.kind() == kind)
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TicketConfig;
    use crate::factory::TicketFactory;
    use futures::TryStreamExt;
    use sso_broker_testing::{ManualClock, fixtures};
    use sso_broker_core::environment::Clock;

    fn factory(clock: &ManualClock) -> TicketFactory {
        TicketFactory::new(&TicketConfig::default(), Arc::new(clock.clone()))
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_add_never_overwrites() {
        let clock = ManualClock::starting_at_test_epoch();
        let registry = InMemoryTicketRegistry::new();
        let tgt = factory(&clock).create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));

        registry.add_ticket(&tgt).await.unwrap();
        let duplicate = registry.add_ticket(&tgt).await;

        assert_eq!(
            duplicate,
            Err(TicketError::TicketAlreadyExists { id: tgt.id().clone() })
        );
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_update_is_compare_and_swap() {
        let clock = ManualClock::starting_at_test_epoch();
        let registry = InMemoryTicketRegistry::new();
        let tgt = factory(&clock).create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));
        registry.add_ticket(&tgt).await.unwrap();

        let mut first = registry.get_ticket(tgt.id()).await.unwrap().unwrap();
        let mut second = first.clone();

        first.record_use(clock.now());
        registry.update_ticket(&mut first).await.unwrap();
        assert_eq!(first.version(), 1);

        second.record_use(clock.now());
        let stale = registry.update_ticket(&mut second).await;
        assert_eq!(
            stale,
            Err(TicketError::ConcurrentModification { id: tgt.id().clone() })
        );

        let stored = registry.get_ticket(tgt.id()).await.unwrap().unwrap();
        assert_eq!(stored.count_of_uses(), 1);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_update_of_deleted_ticket_is_invalid() {
        let clock = ManualClock::starting_at_test_epoch();
        let registry = InMemoryTicketRegistry::new();
        let mut tgt = factory(&clock).create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));
        registry.add_ticket(&tgt).await.unwrap();

        assert!(registry.delete_single_ticket(tgt.id()).await.unwrap());
        assert!(!registry.delete_single_ticket(tgt.id()).await.unwrap());
        assert_eq!(
            registry.update_ticket(&mut tgt).await,
            Err(TicketError::InvalidTicket { id: tgt.id().clone() })
        );
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_cascade_delete_removes_descendants_and_reports_services() {
        let clock = ManualClock::starting_at_test_epoch();
        let factory = factory(&clock);
        let registry = InMemoryTicketRegistry::new();

        let mut tgt = factory.create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));
        let st1 = factory
            .create_service_ticket(&mut tgt, &fixtures::app_service(), false)
            .unwrap();
        let st2 = factory
            .create_service_ticket(&mut tgt, &fixtures::other_service(), false)
            .unwrap();
        let unrelated = factory.create_ticket_granting_ticket(fixtures::authentication("bob", clock.now()));
        for ticket in [&tgt, &st1, &st2, &unrelated] {
            registry.add_ticket(ticket).await.unwrap();
        }

        let report = registry.delete_ticket(tgt.id()).await.unwrap();

        assert_eq!(report.removed(), 3);
        assert_eq!(report.deleted.last(), Some(tgt.id()), "parent goes last");
        assert!(report.services.contains(&fixtures::app_service()));
        assert!(report.services.contains(&fixtures::other_service()));
        assert_eq!(registry.len().await, 1);
        assert!(registry.get_ticket(unrelated.id()).await.unwrap().is_some());

        let again = registry.delete_ticket(tgt.id()).await.unwrap();
        assert_eq!(again.removed(), 0);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_stream_and_counts() {
        let clock = ManualClock::starting_at_test_epoch();
        let factory = factory(&clock);
        let registry = InMemoryTicketRegistry::new();

        let mut tgt = factory.create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));
        let st = factory
            .create_service_ticket(&mut tgt, &fixtures::app_service(), false)
            .unwrap();
        registry.add_ticket(&tgt).await.unwrap();
        registry.add_ticket(&st).await.unwrap();

        let streamed: Vec<Ticket> = registry.get_tickets_stream().try_collect().await.unwrap();
        assert_eq!(streamed.len(), 2);

        // restartable
        let again: Vec<Ticket> = registry.get_tickets_stream().try_collect().await.unwrap();
        assert_eq!(again.len(), 2);

        assert_eq!(registry.count_tickets_of_kind(TicketKind::TicketGranting).await.unwrap(), 1);
        assert_eq!(registry.count_tickets_of_kind(TicketKind::Service).await.unwrap(), 1);
        assert_eq!(registry.count_tickets_of_kind(TicketKind::Proxy).await.unwrap(), 0);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)] // Test code
    async fn test_get_ticket_of_kind() {
        let clock = ManualClock::starting_at_test_epoch();
        let registry = InMemoryTicketRegistry::new();
        let tgt = factory(&clock).create_ticket_granting_ticket(fixtures::authentication("alice", clock.now()));
        registry.add_ticket(&tgt).await.unwrap();

        assert!(registry.get_ticket_of_kind(tgt.id(), TicketKind::TicketGranting).await.is_ok());
        assert!(matches!(
            registry.get_ticket_of_kind(tgt.id(), TicketKind::Service).await,
            Err(TicketError::TicketKindMismatch { .. })
        ));
        assert_eq!(
            registry.get_ticket_of_kind(&TicketId::from("ST-9-missing"), TicketKind::Service).await,
            Err(TicketError::InvalidTicket { id: TicketId::from("ST-9-missing") })
        );
    }
}
