// src/domain/harness.rs

//! Harness reporting boundary.
//!
//! The load-testing harness aggregates outcomes into statistics. This crate
//! only ever talks to it through [`Harness`], two calls mirroring the
//! harness's success and failure events.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Category under which every messaging outcome is reported.
pub const MESSAGING_CATEGORY: &str = "messaging";

/// Why a request failed.
///
/// A late acknowledgment and a genuinely lost message share
/// [`FailureCause::AckTimeout`]; downstream statistics rely on the single
/// category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The transport rejected the send synchronously.
    TransportError,

    /// No acknowledgment within the configured timeout.
    AckTimeout,

    /// The broker connection dropped.
    ConnectionDropped,
}

impl FailureCause {
    /// Stable label used in harness events and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::TransportError => "transport error",
            FailureCause::AckTimeout => "acknowledgment timeout",
            FailureCause::ConnectionDropped => "connection dropped",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics sink of the external load-testing harness.
///
/// Implementations must record every call; batching or dropping events
/// skews the aggregated percentiles.
pub trait Harness: Send + Sync {
    // ---
    /// Record a successful request.
    fn report_success(
        &self,
        category: &str,
        operation_name: &str,
        elapsed_micros: u64,
        bytes_transferred: usize,
    );

    /// Record a failed request.
    fn report_failure(
        &self,
        category: &str,
        operation_name: &str,
        elapsed_micros: u64,
        cause: FailureCause,
    );
}

/// Shared harness pointer.
pub type HarnessPtr = Arc<dyn Harness>;
