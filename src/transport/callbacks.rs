//! Callback storage shared by the transport implementations.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::{AckCallback, DisconnectCallback};
use crate::CorrelationId;

/// Acknowledgment and disconnect callbacks installed by the engine.
///
/// Firing clones the callback out of its slot first, so no lock is held while
/// user code runs and a callback may safely replace itself.
#[derive(Default)]
pub(crate) struct CallbackSlots {
    on_ack: RwLock<Option<AckCallback>>,
    on_disconnect: RwLock<Option<DisconnectCallback>>,
}

fn read_ignore_poison<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match l.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_ignore_poison<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match l.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CallbackSlots {
    // ---
    pub(crate) fn set_on_ack(&self, callback: AckCallback) {
        *write_ignore_poison(&self.on_ack) = Some(callback);
    }

    pub(crate) fn set_on_disconnect(&self, callback: DisconnectCallback) {
        *write_ignore_poison(&self.on_disconnect) = Some(callback);
    }

    /// Deliver an acknowledgment; no-op when nothing is installed.
    pub(crate) fn fire_ack(&self, id: CorrelationId) {
        let callback = read_ignore_poison(&self.on_ack).clone();
        if let Some(callback) = callback {
            callback(id);
        }
    }

    /// Deliver a disconnect; no-op when nothing is installed.
    pub(crate) fn fire_disconnect(&self) {
        let callback = read_ignore_poison(&self.on_disconnect).clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fire_without_callbacks_is_noop() {
        // ---
        let slots = CallbackSlots::default();
        slots.fire_ack(CorrelationId::new(1));
        slots.fire_disconnect();
    }

    #[test]
    fn test_latest_callback_wins() {
        // ---
        let slots = CallbackSlots::default();
        let seen = Arc::new(AtomicU64::new(0));

        slots.set_on_ack(Arc::new(|_: CorrelationId| panic!("replaced callback must not run")));
        let seen_clone = Arc::clone(&seen);
        slots.set_on_ack(Arc::new(move |id: CorrelationId| {
            seen_clone.store(id.get(), Ordering::SeqCst);
        }));

        slots.fire_ack(CorrelationId::new(17));
        assert_eq!(seen.load(Ordering::SeqCst), 17);
    }
}
