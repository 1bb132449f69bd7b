use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier a transport assigns to one accepted publish.
///
/// Unlike request/response correlation ids, these are *out-of-band*: the
/// payload never carries them. The transport hands one out when it accepts
/// a send and quotes it again when the broker acknowledges delivery. Ids are
/// unique only while the publish is in flight; transports may reuse them
/// (MQTT packet ids wrap at 65535).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Wrap a raw transport id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw transport id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for CorrelationId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<u16> for CorrelationId {
    fn from(value: u16) -> Self {
        Self(u64::from(value))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
