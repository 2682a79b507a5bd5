//! Proxy callback delivery.
//!
//! When a service asks for proxy rights during validation, the broker mints
//! a proxy-granting ticket and hands it to the service's callback URL
//! together with an IOU. The validation response only carries the IOU; the
//! service matches it against what its callback received.

use crate::ids::TicketId;
use sso_broker_core::service::Service;

/// Delivers proxy-granting tickets to callback URLs.
///
/// Network delivery (HTTPS, certificate checks) belongs to the front end
/// that implements this trait.
pub trait ProxyHandler: Send + Sync {
    /// Hand `proxy_granting_ticket` and `iou` to `callback`.
    ///
    /// Returns whether the callback accepted them. A refused delivery makes
    /// the engine discard the ticket; the validation itself still succeeds.
    fn deliver(
        &self,
        callback: &Service,
        proxy_granting_ticket: &TicketId,
        iou: &str,
    ) -> impl std::future::Future<Output = bool> + Send;
}

/// Handler for deployments without proxying: refuses every delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledProxyHandler;

impl ProxyHandler for DisabledProxyHandler {
    async fn deliver(&self, callback: &Service, _proxy_granting_ticket: &TicketId, _iou: &str) -> bool {
        tracing::debug!(callback = %callback, "Proxy delivery disabled");
        false
    }
}
