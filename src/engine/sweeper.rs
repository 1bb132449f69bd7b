//! Timeout sweeping.
//!
//! Messages that never get acknowledged would otherwise stay in the registry
//! forever. The sweeper evicts entries past their timeout and reports them
//! as acknowledgment timeouts.
//!
//! # Cadence
//!
//! By default the sweep is piggy-backed on acknowledgment traffic: every
//! `sweep_every`-th successful acknowledgment runs one sweep. Late and
//! orphaned acknowledgments are not counted. Reclamation cost
//! thus follows load, and no timer task exists. The price is a staleness
//! bound tied to throughput rather than wall-clock time: with little traffic
//! a lost message can sit unswept for as long as acknowledgments stay rare,
//! and with no traffic at all, indefinitely.
//!
//! Callers needing a wall-clock bound can additionally run
//! [`CorrelationEngine::spawn_periodic_sweeper`](crate::CorrelationEngine::spawn_periodic_sweeper).

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

use super::registry::PendingRegistry;
use crate::domain::FailureCause;
use crate::reporter::{Outcome, OutcomeReporter};

/// Counts successful acknowledgments and fires every `every`-th one.
#[derive(Debug)]
pub(crate) struct SweepTrigger {
    every: u64,
    seen: AtomicU64,
}

impl SweepTrigger {
    /// `every == 0` never fires.
    pub(crate) fn new(every: u64) -> Self {
        Self {
            every,
            seen: AtomicU64::new(0),
        }
    }

    /// Record one acknowledgment; true when a sweep is due.
    pub(crate) fn record(&self) -> bool {
        // ---
        if self.every == 0 {
            return false;
        }
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        seen % self.every == 0
    }
}

/// Evict and report every entry whose timeout has passed at `now`.
///
/// Iterates a snapshot, never the live map, so concurrent publishes and
/// acknowledgments proceed while the scan runs. Each eviction re-checks the
/// entry under the registry lock; an entry acknowledged meanwhile is left to
/// the acknowledgment path and reported there.
///
/// Returns the number of evicted entries.
pub(crate) fn sweep(registry: &PendingRegistry, reporter: &OutcomeReporter, now: Instant) -> usize {
    // ---
    let mut evicted = 0;

    for (id, entry) in registry.snapshot_entries() {
        if !entry.is_expired_after(entry.elapsed_at(now)) {
            continue;
        }

        let Some(entry) = registry.pop_if(id, |live| live.is_expired_after(live.elapsed_at(now)))
        else {
            continue;
        };

        reporter.report(
            &entry.operation_name,
            Outcome::Failure {
                elapsed: entry.elapsed_at(now),
                cause: FailureCause::AckTimeout,
            },
        );
        evicted += 1;
    }

    evicted
}
