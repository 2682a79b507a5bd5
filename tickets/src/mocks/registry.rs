//! Registry wrapper that injects backend failures and latency.

use crate::error::{Result, TicketError};
use crate::ids::{TicketId, TicketKind};
use crate::providers::TicketRegistry;
use crate::ticket::Ticket;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Wraps a registry and fails the first N reads and/or updates with
/// [`TicketError::RegistryUnavailable`].
///
/// It can also delay every read, which widens the window between a read and
/// the compare-and-swap that follows it, and prefix the ticket stream with
/// undecodable entries.
#[derive(Debug, Clone)]
pub struct FlakyTicketRegistry<R> {
    inner: R,
    failing_reads: Arc<AtomicUsize>,
    failing_updates: Arc<AtomicUsize>,
    corrupt_entries: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
    read_delay: Option<Duration>,
}

impl<R: TicketRegistry> FlakyTicketRegistry<R> {
    /// Wrap `inner` without injecting any failures yet.
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            failing_reads: Arc::new(AtomicUsize::new(0)),
            failing_updates: Arc::new(AtomicUsize::new(0)),
            corrupt_entries: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            updates: Arc::new(AtomicUsize::new(0)),
            read_delay: None,
        }
    }

    /// Sleep for `delay` before every `get_ticket`.
    #[must_use]
    pub const fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Start every ticket stream with `count` undecodable entries.
    pub fn corrupt_stream_entries(&self, count: usize) {
        self.corrupt_entries.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `get_ticket`.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `update_ticket`.
    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Calls to `get_ticket` so far, failed ones included.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Calls to `update_ticket` so far, failed ones included.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Wrapped registry.
    #[must_use]
    pub const fn inner(&self) -> &R {
        &self.inner
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<R: TicketRegistry> TicketRegistry for FlakyTicketRegistry<R> {
    async fn add_ticket(&self, ticket: &Ticket) -> Result<()> {
        self.inner.add_ticket(ticket).await
    }

    async fn get_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(TicketError::RegistryUnavailable("injected read failure".into()));
        }
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_ticket(id).await
    }

    async fn update_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_updates) {
            return Err(TicketError::RegistryUnavailable("injected update failure".into()));
        }
        self.inner.update_ticket(ticket).await
    }

    async fn delete_single_ticket(&self, id: &TicketId) -> Result<bool> {
        self.inner.delete_single_ticket(id).await
    }

    fn get_tickets_stream(&self) -> BoxStream<'_, Result<Ticket>> {
        let corrupt = self.corrupt_entries.load(Ordering::SeqCst);
        stream::iter((0..corrupt).map(|_| {
            Err::<Ticket, _>(TicketError::SerializationError("injected corrupt body".into()))
        }))
        .chain(self.inner.get_tickets_stream())
        .boxed()
    }

    async fn count_tickets_of_kind(&self, kind: TicketKind) -> Result<usize> {
        self.inner.count_tickets_of_kind(kind).await
    }
}
