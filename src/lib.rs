//! MQTT load generation with in-flight acknowledgment correlation
//!
//! This library drives publishes against an MQTT broker on behalf of a load
//! testing harness. It tracks every publish until the broker acknowledges it,
//! times out stale publishes, and reports each request exactly once with its
//! measured latency.
//!
//! ```no_run
//! use std::sync::Arc;
//! use mom_loadgen::{
//!     create_memory_transport, CorrelationEngine, LoadConfig, PublishOptions, RecordingHarness,
//! };
//!
//! # async fn run() {
//! let config = LoadConfig::new("localhost", 1883);
//! let harness = Arc::new(RecordingHarness::new());
//! let engine = CorrelationEngine::new(create_memory_transport("mem"), harness, &config);
//!
//! engine
//!     .publish("lamp/set_config", &b"{\"on\":\"true\"}"[..], &PublishOptions::from(&config))
//!     .await;
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod correlation;
mod domain;
mod engine;
mod error;
mod instrument;
mod load_config;
mod reporter;
mod transport;
mod user;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use engine::{
    //
    CorrelationEngine,
    PendingMessage,
    PendingRegistry,
    PublishOptions,
    DISCONNECT_OPERATION,
};
pub use instrument::{Instrumented, CONNECT_OPERATION, PUBLISH_OPERATION};
pub use user::{LampConfigPayload, LoadUser, PayloadSource, LAMP_TOPIC};

pub use load_config::{LoadConfig, DEFAULT_PORT, DEFAULT_PUBLISH_TIMEOUT, DEFAULT_SWEEP_EVERY};

pub use correlation::CorrelationId;
pub use error::{LoadError, Result};

pub use reporter::{
    //
    elapsed_micros,
    ChannelHarness,
    Outcome,
    OutcomeReporter,
    RecordingHarness,
    RequestEvent,
    TracingHarness,
};

pub use transport::{create_memory_transport, MemoryTransport, PublishedRecord};

#[cfg(feature = "transport_rumqttc")]
pub use transport::{create_rumqttc_transport, RumqttcTransport};

// --- public re-exports
pub use domain::{
    //
    AcceptHook,
    AckCallback,
    DisconnectCallback,
    FailureCause,
    Harness,
    HarnessPtr,
    OutboundMessage,
    QoS,
    Transport,
    TransportPtr,
    MESSAGING_CATEGORY,
};

/// Create the MQTT network transport for `config`.
///
/// Only available with the `transport_rumqttc` feature. Dry runs build a
/// [`MemoryTransport`] explicitly with [`create_memory_transport`].
#[cfg(feature = "transport_rumqttc")]
pub fn create_transport(config: &LoadConfig) -> TransportPtr {
    // ---
    create_rumqttc_transport(config)
}
