//! Mock proxy handler for testing.

use crate::ids::TicketId;
use crate::providers::ProxyHandler;
use sso_broker_core::service::Service;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// One recorded delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Callback URL.
    pub callback: Service,
    /// Delivered ticket.
    pub proxy_granting_ticket: TicketId,
    /// Delivered IOU.
    pub iou: String,
}

/// Mock proxy handler.
///
/// Records every delivery attempt and accepts or refuses them all.
#[derive(Debug, Clone)]
pub struct MockProxyHandler {
    accept: Arc<AtomicBool>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MockProxyHandler {
    /// Handler that accepts every delivery.
    #[must_use]
    pub fn accepting() -> Self {
        Self {
            accept: Arc::new(AtomicBool::new(true)),
            deliveries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Handler that refuses every delivery.
    #[must_use]
    pub fn refusing() -> Self {
        let handler = Self::accepting();
        handler.set_accepting(false);
        handler
    }

    /// Switch between accepting and refusing.
    pub fn set_accepting(&self, accept: bool) {
        self.accept.store(accept, Ordering::SeqCst);
    }

    /// Every delivery attempt so far (for testing).
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockProxyHandler {
    fn default() -> Self {
        Self::accepting()
    }
}

impl ProxyHandler for MockProxyHandler {
    async fn deliver(&self, callback: &Service, proxy_granting_ticket: &TicketId, iou: &str) -> bool {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Delivery {
                callback: callback.clone(),
                proxy_granting_ticket: proxy_granting_ticket.clone(),
                iou: iou.to_string(),
            });
        self.accept.load(Ordering::SeqCst)
    }
}
