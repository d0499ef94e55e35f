//! # Raggy Core
//!
//! Core traits, types, and errors for the Raggy trust network.
//!
//! This crate provides the foundational abstractions shared by every node
//! subsystem, so the same sync and trust logic runs against the in-memory
//! collaborators used in tests and against real iroh networking.
//!
//! ## Key Traits
//!
//! - [`DocumentStore`] / [`DocHandle`]: replicated key/value documents with capability tickets
//! - [`MessagingChannel`]: best-effort publish/subscribe transport for [`GossipMessage`]s
//!
//! ## Key Types
//!
//! - [`NodeId`]: Identifier for a node or any other entity in the trust graph
//! - [`DocId`] / [`Ticket`]: Document identifiers and redeemable capabilities
//! - [`EventBus`]: In-process event fan-out with an append-only history
//! - [`RecordEnvelope`]: Versioned, kind-tagged encoding for every persisted value

pub mod error;
pub mod event;
pub mod identity;
pub mod memory;
pub mod message;
pub mod record;
pub mod ticket;
pub mod traits;

// Re-export main types
pub use error::*;
pub use event::*;
pub use identity::*;
pub use memory::*;
pub use message::*;
pub use record::*;
pub use ticket::*;
pub use traits::*;
