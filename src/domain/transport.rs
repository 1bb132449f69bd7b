// src/domain/transport.rs

//! Transport capability abstractions.
//!
//! The correlation engine needs very little from a messaging client: connect,
//! start whatever drives its network IO, hand over a publish, and call back
//! when the broker acknowledges a publish or the connection drops. This module
//! pins that narrow capability down as the [`Transport`] trait so the engine
//! never touches protocol client types.
//!
//! Concrete implementations live under `src/transport/`.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, LoadError, Result};

/// Delivery guarantee requested for a publish.
///
/// Mirrors the three MQTT levels without depending on any client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QoS {
    /// Fire and forget. Acknowledged once written to the connection.
    AtMostOnce,

    /// Acknowledged by the broker with PUBACK.
    #[default]
    AtLeastOnce,

    /// Acknowledged by the broker with PUBCOMP.
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = LoadError;

    fn try_from(level: u8) -> Result<Self> {
        // ---
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(LoadError::Transport(format!("invalid qos level: {other}"))),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// A single publish handed to a transport.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    // ---
    /// Destination topic.
    pub topic: Arc<str>,

    /// Opaque payload bytes.
    pub payload: Bytes,

    /// Requested delivery guarantee.
    pub qos: QoS,

    /// Whether the broker should retain the message.
    pub retain: bool,
}

impl OutboundMessage {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Invoked from the transport's delivery context when a publish is acknowledged.
pub type AckCallback = Arc<dyn Fn(CorrelationId) + Send + Sync>;

/// Invoked from the transport's delivery context when the connection drops.
pub type DisconnectCallback = Arc<dyn Fn() + Send + Sync>;

/// Invoked exactly once with the id of an accepted publish.
///
/// Transports call this *before* an acknowledgment for the same id can be
/// delivered, which lets the caller record the publish without racing the
/// acknowledgment callback.
pub type AcceptHook = Box<dyn FnOnce(CorrelationId) + Send>;

/// Messaging client capability consumed by the correlation engine.
///
/// Implementations must ensure that:
/// - `publish()` returns as soon as the send is accepted or rejected; it never
///   waits for the broker acknowledgment.
/// - A rejected publish returns `Err` and never invokes its `on_accepted`
///   hook nor the acknowledgment callback.
/// - Every id passed to the acknowledgment callback was previously passed to
///   an `on_accepted` hook. Duplicate or late acknowledgments are allowed;
///   the engine ignores ids it no longer tracks.
/// - Callbacks may run on any task or thread and must not be invoked while
///   holding locks the callback could need.
///
/// # Notes
///
/// This trait uses `async_trait`; treat its methods as normal `async fn`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    // ---
    /// Identifier used to prefix log lines.
    fn transport_id(&self) -> &str;

    /// Open a broker connection.
    async fn connect(&self, host: &str, port: u16) -> Result<()>;

    /// Start the background loop that drives network IO and callbacks.
    ///
    /// Calling this while the loop already runs is a no-op.
    async fn start_delivery_loop(&self) -> Result<()>;

    /// Hand a publish to the transport.
    ///
    /// On acceptance `on_accepted` runs with the assigned id and the same id
    /// is returned.
    async fn publish(&self, msg: OutboundMessage, on_accepted: AcceptHook)
        -> Result<CorrelationId>;

    /// Install the acknowledgment callback, replacing any previous one.
    fn set_on_acknowledged(&self, callback: AckCallback);

    /// Install the disconnect callback, replacing any previous one.
    fn set_on_disconnected(&self, callback: DisconnectCallback);

    /// Re-establish a dropped connection.
    async fn reconnect(&self) -> Result<()>;

    /// Whether the broker connection is currently up.
    fn is_connected(&self) -> bool;

    /// Close the broker connection.
    async fn disconnect(&self) -> Result<()>;
}

impl fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("transport_id", &self.transport_id())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Shared transport pointer.
///
/// Cloning is cheap and every clone drives the same broker connection.
pub type TransportPtr = Arc<dyn Transport>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_qos_levels() {
        // ---
        assert_eq!(QoS::try_from(0u8).unwrap(), QoS::AtMostOnce);
        assert_eq!(QoS::try_from(2u8).unwrap(), QoS::ExactlyOnce);
        assert!(QoS::try_from(3u8).is_err());
        assert_eq!(u8::from(QoS::AtLeastOnce), 1);
        assert_eq!(QoS::default(), QoS::AtLeastOnce);
    }
}
