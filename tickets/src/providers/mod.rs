//! Ticket subsystem providers.
//!
//! This module defines traits for every external dependency of the engine
//! and cleaner. These traits enable dependency injection and keep the
//! ticket logic testable against in-memory implementations.
//!
//! # Architecture
//!
//! Providers are **interfaces**, not implementations. The engine depends on
//! these traits, and the application wires concrete implementations:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ CentralAuthenticationService │
//! └──────┬────────────────┬──────┘
//!        │                │
//!        ▼                ▼
//! ┌──────────────┐  ┌──────────────┐      ┌────────────────────────┐
//! │TicketRegistry│  │ ProxyHandler │      │ TicketRegistryCleaner  │
//! └──────┬───────┘  └──────────────┘      └──────┬──────────┬──────┘
//!        │                                       │          │
//!        ▼                                       ▼          ▼
//!   memory / Redis / PostgreSQL           TicketRegistry  LockingStrategy
//! ```
//!
//! This enables:
//! - **Testing**: in-memory registry, manual clock, mock proxy handler
//! - **Production**: Redis or `PostgreSQL` registries shared by every node

pub mod locking;
pub mod proxy;
pub mod registry;

pub use locking::LockingStrategy;
pub use proxy::{DisabledProxyHandler, ProxyHandler};
pub use registry::{DeletionReport, TicketRegistry};
