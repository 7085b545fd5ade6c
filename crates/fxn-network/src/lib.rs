//! fxn Network - Messaging collaborator interface
//!
//! Nodes never talk to a transport directly. They hold a [`Messenger`] over
//! an `Arc<dyn Network>` and receive inbound payloads, tagged with the
//! [`Pipeline`] they arrived on, from an [`InboundReceiver`].
//!
//! [`MemoryHub`] provides an in-process network with explicit connections
//! and send-failure injection.

pub mod error;
pub mod memory;
pub mod messenger;
pub mod pipeline;

pub use error::*;
pub use memory::{MemoryHub, MemoryNetwork};
pub use messenger::*;
pub use pipeline::*;
