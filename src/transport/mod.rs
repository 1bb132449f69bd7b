//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Transport` trait. Network transports are hidden behind feature flags
//! and exposed only through constructor functions.
//!
//! Domain code must not depend on transport-specific types.

mod callbacks;
mod memory;

#[cfg(feature = "transport_rumqttc")]
mod rumqttc;

pub use memory::{create_memory_transport, MemoryTransport, PublishedRecord};

#[cfg(feature = "transport_rumqttc")]
pub use rumqttc::{create_transport as create_rumqttc_transport, RumqttcTransport};
