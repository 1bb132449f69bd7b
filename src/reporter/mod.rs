//! Outcome reporting.
//!
//! Translates request outcomes into the harness's event shape. The reporter
//! is the only place that converts elapsed time into the microsecond figure
//! the harness aggregates.

mod sinks;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{FailureCause, HarnessPtr, MESSAGING_CATEGORY};

pub use sinks::{ChannelHarness, RecordingHarness, TracingHarness};

/// Result of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    // ---
    /// Acknowledged within its timeout.
    Success {
        elapsed: Duration,
        payload_size: usize,
    },

    /// Rejected, timed out or cut off by a dropped connection.
    Failure {
        elapsed: Duration,
        cause: FailureCause,
    },
}

impl Outcome {
    /// Time from issue to resolution.
    pub fn elapsed(&self) -> Duration {
        match self {
            Outcome::Success { elapsed, .. } | Outcome::Failure { elapsed, .. } => *elapsed,
        }
    }

    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }
}

/// One harness event, as emitted by [`OutcomeReporter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestEvent {
    // ---
    pub category: Arc<str>,
    pub operation_name: Arc<str>,
    pub elapsed_micros: u64,
    pub success: bool,
    pub failure_cause: Option<FailureCause>,
    pub bytes_transferred: usize,
}

/// Elapsed time in whole microseconds.
///
/// Equivalent to rounding fractional seconds to six decimal places, which
/// keeps sub-microsecond noise out of aggregated percentiles.
pub fn elapsed_micros(elapsed: Duration) -> u64 {
    // ---
    let secs = elapsed.as_secs_f64();
    (secs * 1_000_000.0).round() as u64
}

/// Maps outcomes onto the harness success/failure calls.
///
/// Every call to [`report`](Self::report) produces exactly one harness call.
#[derive(Clone)]
pub struct OutcomeReporter {
    harness: HarnessPtr,
}

impl OutcomeReporter {
    /// Create a reporter emitting into `harness`.
    pub fn new(harness: HarnessPtr) -> Self {
        Self { harness }
    }

    /// Build the harness event for an outcome without emitting it.
    pub fn to_event(operation_name: &str, outcome: &Outcome) -> RequestEvent {
        // ---
        let (success, failure_cause, bytes_transferred) = match outcome {
            Outcome::Success { payload_size, .. } => (true, None, *payload_size),
            Outcome::Failure { cause, .. } => (false, Some(*cause), 0),
        };

        RequestEvent {
            category: Arc::from(MESSAGING_CATEGORY),
            operation_name: Arc::from(operation_name),
            elapsed_micros: elapsed_micros(outcome.elapsed()),
            success,
            failure_cause,
            bytes_transferred,
        }
    }

    /// Emit one harness event for `outcome`.
    pub fn report(&self, operation_name: &str, outcome: Outcome) {
        // ---
        let micros = elapsed_micros(outcome.elapsed());

        match outcome {
            Outcome::Success { payload_size, .. } => {
                self.harness
                    .report_success(MESSAGING_CATEGORY, operation_name, micros, payload_size);
            }
            Outcome::Failure { cause, .. } => {
                self.harness
                    .report_failure(MESSAGING_CATEGORY, operation_name, micros, cause);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_elapsed_micros_rounds_to_microseconds() {
        // ---
        assert_eq!(elapsed_micros(Duration::from_secs(2)), 2_000_000);
        assert_eq!(elapsed_micros(Duration::from_nanos(1_499)), 1);
        assert_eq!(elapsed_micros(Duration::from_nanos(1_500)), 2);
        assert_eq!(elapsed_micros(Duration::ZERO), 0);
    }

    #[test]
    fn test_success_event_shape() {
        // ---
        let outcome = Outcome::Success {
            elapsed: Duration::from_millis(250),
            payload_size: 10,
        };
        let event = OutcomeReporter::to_event("lamp/set_config", &outcome);

        assert_eq!(&*event.category, "messaging");
        assert_eq!(&*event.operation_name, "lamp/set_config");
        assert_eq!(event.elapsed_micros, 250_000);
        assert!(event.success);
        assert_eq!(event.failure_cause, None);
        assert_eq!(event.bytes_transferred, 10);
    }

    #[test]
    fn test_failure_event_carries_cause_and_no_bytes() {
        // ---
        let outcome = Outcome::Failure {
            elapsed: Duration::ZERO,
            cause: FailureCause::ConnectionDropped,
        };
        let event = OutcomeReporter::to_event("publish", &outcome);

        assert!(!event.success);
        assert_eq!(event.failure_cause, Some(FailureCause::ConnectionDropped));
        assert_eq!(event.bytes_transferred, 0);
        assert_eq!(event.elapsed_micros, 0);
    }

    #[test]
    fn test_report_emits_exactly_one_event() {
        // ---
        let harness = Arc::new(RecordingHarness::new());
        let reporter = OutcomeReporter::new(harness.clone());

        let outcome = Outcome::Failure {
            elapsed: Duration::from_micros(1_234),
            cause: FailureCause::AckTimeout,
        };
        reporter.report("t", outcome);

        let events = harness.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], OutcomeReporter::to_event("t", &outcome));
    }

    #[test]
    fn test_event_serializes_as_json_line() {
        // ---
        let outcome = Outcome::Failure {
            elapsed: Duration::from_micros(42),
            cause: FailureCause::AckTimeout,
        };
        let event = OutcomeReporter::to_event("lamp/set_config", &outcome);

        let value = serde_json::to_value(&event).expect("event serializes");
        assert_eq!(
            value,
            serde_json::json!({
                "category": "messaging",
                "operation_name": "lamp/set_config",
                "elapsed_micros": 42,
                "success": false,
                "failure_cause": "ack_timeout",
                "bytes_transferred": 0,
            })
        );
    }
}
