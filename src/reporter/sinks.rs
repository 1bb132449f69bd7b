//! Harness implementations shipped with the crate.
//!
//! Real load-testing frameworks plug in their own [`Harness`]; these cover
//! tests, demos and piping events into another task.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use super::RequestEvent;
use crate::domain::{FailureCause, Harness};
#[allow(unused_imports)]
use crate::{log_info, log_warn};

fn success_event(category: &str, name: &str, micros: u64, bytes: usize) -> RequestEvent {
    RequestEvent {
        category: Arc::from(category),
        operation_name: Arc::from(name),
        elapsed_micros: micros,
        success: true,
        failure_cause: None,
        bytes_transferred: bytes,
    }
}

fn failure_event(category: &str, name: &str, micros: u64, cause: FailureCause) -> RequestEvent {
    RequestEvent {
        category: Arc::from(category),
        operation_name: Arc::from(name),
        elapsed_micros: micros,
        success: false,
        failure_cause: Some(cause),
        bytes_transferred: 0,
    }
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps every event in memory, in arrival order.
#[derive(Default)]
pub struct RecordingHarness {
    events: Mutex<Vec<RequestEvent>>,
}

impl RecordingHarness {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all recorded events.
    pub fn events(&self) -> Vec<RequestEvent> {
        lock_ignore_poison(&self.events).clone()
    }

    /// Recorded successes.
    pub fn successes(&self) -> Vec<RequestEvent> {
        self.events().into_iter().filter(|e| e.success).collect()
    }

    /// Recorded failures.
    pub fn failures(&self) -> Vec<RequestEvent> {
        self.events().into_iter().filter(|e| !e.success).collect()
    }

    /// Recorded failures with the given cause.
    pub fn failures_with(&self, cause: FailureCause) -> Vec<RequestEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.failure_cause == Some(cause))
            .collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.events).len()
    }

    /// True when nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain all recorded events.
    pub fn take(&self) -> Vec<RequestEvent> {
        std::mem::take(&mut *lock_ignore_poison(&self.events))
    }
}

impl Harness for RecordingHarness {
    fn report_success(&self, category: &str, name: &str, micros: u64, bytes: usize) {
        lock_ignore_poison(&self.events).push(success_event(category, name, micros, bytes));
    }

    fn report_failure(&self, category: &str, name: &str, micros: u64, cause: FailureCause) {
        lock_ignore_poison(&self.events).push(failure_event(category, name, micros, cause));
    }
}

/// Forwards every event over an unbounded channel.
///
/// Unbounded so the acknowledgment path never blocks on a slow consumer and
/// never drops an event. Events reported after the receiver is gone are lost.
#[derive(Clone)]
pub struct ChannelHarness {
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl ChannelHarness {
    /// Create a harness and the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Harness for ChannelHarness {
    fn report_success(&self, category: &str, name: &str, micros: u64, bytes: usize) {
        let _ = self.tx.send(success_event(category, name, micros, bytes));
    }

    fn report_failure(&self, category: &str, name: &str, micros: u64, cause: FailureCause) {
        let _ = self.tx.send(failure_event(category, name, micros, cause));
    }
}

/// Logs every event; successes at info, failures at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHarness;

impl Harness for TracingHarness {
    fn report_success(&self, category: &str, name: &str, micros: u64, bytes: usize) {
        log_info!("{category}/{name}: ok in {micros}us ({bytes} bytes)");
    }

    fn report_failure(&self, category: &str, name: &str, micros: u64, cause: FailureCause) {
        log_warn!("{category}/{name}: failed after {micros}us: {cause}");
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_recording_harness_filters() {
        // ---
        let harness = RecordingHarness::new();
        harness.report_success("messaging", "a", 10, 4);
        harness.report_failure("messaging", "b", 20, FailureCause::AckTimeout);
        harness.report_failure("messaging", "c", 0, FailureCause::ConnectionDropped);

        assert_eq!(harness.len(), 3);
        assert_eq!(harness.successes().len(), 1);
        assert_eq!(harness.failures().len(), 2);
        assert_eq!(harness.failures_with(FailureCause::AckTimeout).len(), 1);

        let drained = harness.take();
        assert_eq!(drained.len(), 3);
        assert!(harness.is_empty());
    }

    #[tokio::test]
    async fn test_channel_harness_forwards_in_order() {
        // ---
        let (harness, mut rx) = ChannelHarness::new();
        harness.report_success("messaging", "first", 1, 1);
        harness.report_failure("messaging", "second", 2, FailureCause::TransportError);

        let first = rx.recv().await.expect("first event");
        let second = rx.recv().await.expect("second event");
        assert_eq!(&*first.operation_name, "first");
        assert!(first.success);
        assert_eq!(second.failure_cause, Some(FailureCause::TransportError));
    }
}
