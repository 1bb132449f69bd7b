use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::{CorrelationId, LoadError, Result};

/// One accepted publish awaiting its acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    // ---
    /// When the send attempt started.
    pub start_time: Instant,

    /// Acknowledgment deadline relative to `start_time`; `None` never expires.
    pub timeout: Option<Duration>,

    /// Label the outcome is reported under.
    pub operation_name: Arc<str>,

    /// Payload length, reported as bytes transferred on success.
    pub payload_size: usize,
}

impl PendingMessage {
    /// Time since the send attempt started.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start_time)
    }

    /// True once `elapsed` is strictly past the configured timeout.
    pub fn is_expired_after(&self, elapsed: Duration) -> bool {
        matches!(self.timeout, Some(timeout) if elapsed > timeout)
    }
}

/// In-flight publishes keyed by correlation id.
///
/// A single mutex guards the map; entries are independent, so no finer
/// locking is needed. The lock is never held while reporting or awaiting.
#[derive(Default)]
pub struct PendingRegistry {
    // ---
    entries: Mutex<HashMap<CorrelationId, PendingMessage>>,
}

/// Acquire mutex guard, ignoring poisoning
fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl PendingRegistry {
    // ---

    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new in-flight publish.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::DuplicateCorrelationId`] if `id` is still live.
    /// The existing entry is kept; `entry` is dropped.
    pub fn insert(&self, id: CorrelationId, entry: PendingMessage) -> Result<()> {
        // ---
        let mut entries = lock_ignore_poison(&self.entries);
        if entries.contains_key(&id) {
            return Err(LoadError::DuplicateCorrelationId(id));
        }
        entries.insert(id, entry);
        Ok(())
    }

    /// Remove and return the entry for `id`, if still live.
    ///
    /// Concurrent callers racing on the same id get `Some` at most once.
    pub fn pop_if_present(&self, id: CorrelationId) -> Option<PendingMessage> {
        lock_ignore_poison(&self.entries).remove(&id)
    }

    /// Remove and return the entry for `id` only if `predicate` holds for it.
    ///
    /// The check and the removal happen under one lock, so an id reused
    /// between a snapshot and this call is judged on its current entry.
    pub fn pop_if<F>(&self, id: CorrelationId, predicate: F) -> Option<PendingMessage>
    where
        F: FnOnce(&PendingMessage) -> bool,
    {
        // ---
        let mut entries = lock_ignore_poison(&self.entries);
        if entries.get(&id).is_some_and(predicate) {
            entries.remove(&id)
        } else {
            None
        }
    }

    /// Independent copy of all live entries.
    pub fn snapshot_entries(&self) -> Vec<(CorrelationId, PendingMessage)> {
        lock_ignore_poison(&self.entries)
            .iter()
            .map(|(id, entry)| (*id, entry.clone()))
            .collect()
    }

    /// Whether `id` is currently in flight.
    pub fn contains(&self, id: CorrelationId) -> bool {
        lock_ignore_poison(&self.entries).contains_key(&id)
    }

    /// Number of in-flight publishes.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.entries).len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn entry(name: &str, timeout: Option<Duration>) -> PendingMessage {
        PendingMessage {
            start_time: Instant::now(),
            timeout,
            operation_name: Arc::from(name),
            payload_size: 3,
        }
    }

    #[test]
    fn test_insert_and_pop() {
        // ---
        let registry = PendingRegistry::new();
        let id = CorrelationId::new(1);

        registry.insert(id, entry("a", None)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(id));

        let popped = registry.pop_if_present(id).expect("entry present");
        assert_eq!(&*popped.operation_name, "a");
        assert!(registry.is_empty());

        // Second pop finds nothing
        assert!(registry.pop_if_present(id).is_none());
    }

    #[test]
    fn test_duplicate_insert_keeps_first_entry() {
        // ---
        let registry = PendingRegistry::new();
        let id = CorrelationId::new(9);

        registry.insert(id, entry("first", None)).unwrap();
        let err = registry.insert(id, entry("second", None)).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateCorrelationId(dup) if dup == id));

        let kept = registry.pop_if_present(id).unwrap();
        assert_eq!(&*kept.operation_name, "first");
    }

    #[test]
    fn test_id_reusable_after_removal() {
        // ---
        let registry = PendingRegistry::new();
        let id = CorrelationId::new(5);

        registry.insert(id, entry("a", None)).unwrap();
        registry.pop_if_present(id);
        registry.insert(id, entry("b", None)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_independent() {
        // ---
        let registry = PendingRegistry::new();
        registry.insert(CorrelationId::new(1), entry("a", None)).unwrap();
        registry.insert(CorrelationId::new(2), entry("b", None)).unwrap();

        let snapshot = registry.snapshot_entries();
        registry.pop_if_present(CorrelationId::new(1));
        registry.insert(CorrelationId::new(3), entry("c", None)).unwrap();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_pop_if_respects_predicate() {
        // ---
        let registry = PendingRegistry::new();
        let id = CorrelationId::new(4);
        registry.insert(id, entry("a", None)).unwrap();

        assert!(registry.pop_if(id, |_| false).is_none());
        assert!(registry.contains(id));
        assert!(registry.pop_if(id, |_| true).is_some());
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_expiry_is_strict() {
        // ---
        let timed = entry("a", Some(Duration::from_secs(5)));
        assert!(!timed.is_expired_after(Duration::from_secs(5)));
        assert!(timed.is_expired_after(Duration::from_millis(5_001)));

        let untimed = entry("b", None);
        assert!(!untimed.is_expired_after(Duration::from_secs(3_600)));
    }
}
