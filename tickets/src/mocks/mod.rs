//! Mock provider implementations for testing.
//!
//! In-memory stand-ins for the provider traits, for use in unit and
//! integration tests.

pub mod proxy;
pub mod registry;

pub use proxy::{Delivery, MockProxyHandler};
pub use registry::FlakyTicketRegistry;
