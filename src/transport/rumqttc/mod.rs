//! MQTT transport implementation based on rumqttc.
//!
//! Adapts the rumqttc client to the domain-level `Transport` trait. Packet
//! ids never leave this module; the engine only sees correlation ids.
//!
//! # Features
//!
//! - Actor-based concurrency model with single EventLoop ownership
//! - CONNACK confirmation before returning from connect()
//! - Acknowledgment on PUBACK (QoS 1), PUBCOMP (QoS 2) or write (QoS 0)
//! - Disconnect notification once per dropped connection
//!
//! # Usage
//!
//! Enabled by default through the `transport_rumqttc` feature:
//!
//! ```toml
//! [dependencies]
//! mom-loadgen = { version = "0.1", features = ["transport_rumqttc"] }
//! ```

mod transport;
pub use transport::{create_transport, RumqttcTransport};
