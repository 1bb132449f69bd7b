//! Timing decorator for transport calls.
//!
//! [`Instrumented`] wraps a transport and reports every `connect`, `publish`
//! and `disconnect` call to the harness under the call's own name. The
//! remaining `Transport` methods pass through untimed.
//!
//! `publish` timing covers the hand-off to the transport only. Broker
//! acknowledgment latency is what [`CorrelationEngine`](crate::CorrelationEngine)
//! measures.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::reporter::{Outcome, OutcomeReporter};
use crate::{
    //
    AcceptHook,
    AckCallback,
    CorrelationId,
    DisconnectCallback,
    FailureCause,
    HarnessPtr,
    OutboundMessage,
    Result,
    Transport,
    TransportPtr,
    DISCONNECT_OPERATION,
};

/// Operation name reported for timed `connect` calls.
pub const CONNECT_OPERATION: &str = "connect";

/// Operation name reported for timed `publish` hand-offs.
pub const PUBLISH_OPERATION: &str = "publish";

/// A transport whose connect, publish and disconnect calls are reported.
pub struct Instrumented {
    inner: TransportPtr,
    reporter: OutcomeReporter,
}

impl Instrumented {
    // ---
    pub fn new(inner: TransportPtr, harness: HarnessPtr) -> Self {
        Self {
            inner,
            reporter: OutcomeReporter::new(harness),
        }
    }

    /// The undecorated transport.
    pub fn inner(&self) -> &TransportPtr {
        &self.inner
    }

    /// Wrap into a shareable transport pointer.
    pub fn into_ptr(self) -> TransportPtr {
        Arc::new(self)
    }

    fn record<T>(&self, operation_name: &str, start: Instant, result: &Result<T>, bytes: usize) {
        // ---
        let elapsed: Duration = start.elapsed();

        let outcome = match result {
            Ok(_) => Outcome::Success {
                elapsed,
                payload_size: bytes,
            },
            Err(_) => Outcome::Failure {
                elapsed,
                cause: FailureCause::TransportError,
            },
        };

        self.reporter.report(operation_name, outcome);
    }
}

#[async_trait::async_trait]
impl Transport for Instrumented {
    // ---
    fn transport_id(&self) -> &str {
        self.inner.transport_id()
    }

    async fn connect(&self, host: &str, port: u16) -> Result<()> {
        // ---
        let start = Instant::now();
        let result = self.inner.connect(host, port).await;
        self.record(CONNECT_OPERATION, start, &result, 0);
        result
    }

    async fn start_delivery_loop(&self) -> Result<()> {
        self.inner.start_delivery_loop().await
    }

    async fn publish(&self, msg: OutboundMessage, on_accepted: AcceptHook) -> Result<CorrelationId> {
        // ---
        let bytes = msg.len();
        let start = Instant::now();
        let result = self.inner.publish(msg, on_accepted).await;
        self.record(PUBLISH_OPERATION, start, &result, bytes);
        result
    }

    fn set_on_acknowledged(&self, callback: AckCallback) {
        self.inner.set_on_acknowledged(callback);
    }

    fn set_on_disconnected(&self, callback: DisconnectCallback) {
        self.inner.set_on_disconnected(callback);
    }

    async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    async fn disconnect(&self) -> Result<()> {
        // ---
        let start = Instant::now();
        let result = self.inner.disconnect().await;
        self.record(DISCONNECT_OPERATION, start, &result, 0);
        result
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport, RecordingHarness};
    use bytes::Bytes;

    fn message(payload: &'static [u8]) -> OutboundMessage {
        OutboundMessage {
            topic: Arc::from("lamp/set_config"),
            payload: Bytes::from_static(payload),
            qos: crate::QoS::AtLeastOnce,
            retain: false,
        }
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_reported_by_name() {
        // ---
        let harness = Arc::new(RecordingHarness::new());
        let transport = Instrumented::new(create_memory_transport("mem"), harness.clone());

        transport.connect("localhost", 1883).await.unwrap();
        transport.disconnect().await.unwrap();

        let names: Vec<String> = harness
            .events()
            .iter()
            .map(|e| e.operation_name.to_string())
            .collect();
        assert_eq!(names, ["connect", "disconnect"]);
        assert!(harness.events().iter().all(|e| e.success && e.bytes_transferred == 0));
    }

    #[tokio::test]
    async fn test_failed_connect_reported_as_transport_error() {
        // ---
        let harness = Arc::new(RecordingHarness::new());
        let memory = create_memory_transport("mem");
        memory.set_reachable(false);
        let transport = Instrumented::new(memory, harness.clone());

        assert!(transport.connect("localhost", 1883).await.is_err());

        let failures = harness.failures_with(FailureCause::TransportError);
        assert_eq!(failures.len(), 1);
        assert_eq!(&*failures[0].operation_name, "connect");
    }

    #[tokio::test]
    async fn test_publish_reports_handoff_with_payload_size() {
        // ---
        let harness = Arc::new(RecordingHarness::new());
        let memory = create_memory_transport("mem");
        let transport = Instrumented::new(memory.clone(), harness.clone());

        transport.connect("localhost", 1883).await.unwrap();
        let id = transport
            .publish(message(b"0123456789"), Box::new(|_: CorrelationId| {}))
            .await
            .unwrap();
        assert_eq!(memory.in_flight_ids(), vec![id]);

        let publishes: Vec<_> = harness
            .successes()
            .into_iter()
            .filter(|e| &*e.operation_name == "publish")
            .collect();
        assert_eq!(publishes.len(), 1);
        assert_eq!(publishes[0].bytes_transferred, 10);
    }

    #[tokio::test]
    async fn test_rejected_publish_reported_as_failure() {
        // ---
        let harness = Arc::new(RecordingHarness::new());
        let transport = Instrumented::new(create_memory_transport("mem"), harness.clone());

        // never connected
        let result = transport
            .publish(message(b"x"), Box::new(|_: CorrelationId| {}))
            .await;
        assert!(result.is_err());

        let failures = harness.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(&*failures[0].operation_name, "publish");
        assert_eq!(failures[0].failure_cause, Some(FailureCause::TransportError));
    }
}
