//! Domain layer public interface.
//!
//! Abstractions shared by the engine, the transports and the harness sinks,
//! independent of any MQTT client library or load-testing framework.
//!
//! All domain consumers must import symbols via this module, not by
//! referencing individual files directly.

mod harness;
mod transport;

// --- Harness domain re-exports ---

pub use harness::{
    //
    FailureCause,
    Harness,
    HarnessPtr,
    MESSAGING_CATEGORY,
};

// --- Transport domain re-exports ---

pub use transport::{
    //
    AcceptHook,
    AckCallback,
    DisconnectCallback,
    OutboundMessage,
    QoS,
    Transport,
    TransportPtr,
};
