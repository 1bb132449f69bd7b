//! In-memory transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Transport` trait. It simulates one broker connection and is intended for
//! tests, dry runs and as the reference for transport semantics.
//!
//! ## Reference Semantics
//!
//! - Every accepted publish gets an MQTT-style 16-bit packet id: non-zero,
//!   increasing, wrapping after 65535, never one that is still in flight.
//!   Ids are therefore reused once acknowledged.
//! - The `on_accepted` hook runs under the transport's state lock, before
//!   `publish()` returns and before any acknowledgment for that id can fire,
//!   even when another thread acknowledges concurrently. Hooks must not call
//!   back into the transport.
//! - Acknowledgments are delivered either on demand through
//!   [`MemoryTransport::acknowledge`] or automatically after a configured
//!   delay. All QoS levels are acknowledged the same way.
//! - Dropping the connection fires the disconnect callback; publishing while
//!   disconnected is rejected.
//!
//! ## Non-Goals
//!
//! This transport does not emulate the wire protocol, persistence or the
//! retransmission behavior of a real broker.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use super::callbacks::CallbackSlots;
#[allow(unused_imports)]
use crate::{
    // ---
    log_debug,
    log_info,
    AcceptHook,
    AckCallback,
    CorrelationId,
    DisconnectCallback,
    LoadError,
    OutboundMessage,
    Result,
    Transport,
};

/// A publish accepted by the in-memory transport.
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub id: CorrelationId,
    pub message: OutboundMessage,
}

#[derive(Default)]
struct MemoryState {
    last_packet_id: u16,
    in_flight: BTreeSet<u16>,
    published: Vec<PublishedRecord>,
    reject_next: VecDeque<i32>,
    auto_ack: Option<Duration>,
    connects: usize,
    reconnects: usize,
}

impl MemoryState {
    /// Next free packet id after the last one handed out.
    fn next_packet_id(&mut self) -> Option<u16> {
        // ---
        if self.in_flight.len() >= usize::from(u16::MAX) {
            return None;
        }

        let mut candidate = self.last_packet_id;
        loop {
            candidate = candidate.checked_add(1).unwrap_or(1);
            if !self.in_flight.contains(&candidate) {
                self.last_packet_id = candidate;
                return Some(candidate);
            }
        }
    }
}

/// Simulated broker connection.
///
/// # ⚠️  Testing Only - Subject to Change
///
/// The control methods (`acknowledge`, `drop_connection`, `reject_next`, ...)
/// exist to script broker behavior in tests and demos.
pub struct MemoryTransport {
    // ---
    transport_id: String,
    me: Weak<MemoryTransport>,
    state: Mutex<MemoryState>,
    callbacks: CallbackSlots,
    connected: AtomicBool,
    loop_running: AtomicBool,
    reachable: AtomicBool,
}

fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryTransport {
    // ---

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        lock_ignore_poison(&self.state)
    }

    /// Make subsequent `connect`/`reconnect` calls succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Reject the next accepted-looking publish with `code`.
    ///
    /// Queued rejections apply in order, one per publish.
    pub fn reject_next(&self, code: i32) {
        self.state().reject_next.push_back(code);
    }

    /// Acknowledge every publish `delay` after it is accepted
    /// (`None` = only on demand).
    pub fn set_auto_ack(&self, delay: Option<Duration>) {
        self.state().auto_ack = delay;
    }

    /// Deliver an acknowledgment for `id`.
    ///
    /// The callback fires even if `id` is not in flight, which simulates
    /// duplicate or stray acknowledgments. Returns whether `id` was in flight.
    pub fn acknowledge(&self, id: CorrelationId) -> bool {
        // ---
        let was_in_flight = match u16::try_from(id.get()) {
            Ok(packet_id) => self.state().in_flight.remove(&packet_id),
            Err(_) => false,
        };

        self.callbacks.fire_ack(id);
        was_in_flight
    }

    /// Acknowledge every in-flight publish in id order.
    pub fn acknowledge_all(&self) -> usize {
        // ---
        let ids = self.in_flight_ids();
        for id in &ids {
            self.acknowledge(*id);
        }
        ids.len()
    }

    /// Simulate the broker dropping the connection.
    pub fn drop_connection(&self) {
        // ---
        self.connected.store(false, Ordering::SeqCst);
        self.loop_running.store(false, Ordering::SeqCst);
        log_info!("{}: connection dropped", self.transport_id);
        self.callbacks.fire_disconnect();
    }

    /// Every accepted publish, in acceptance order.
    pub fn published(&self) -> Vec<PublishedRecord> {
        self.state().published.clone()
    }

    /// Ids accepted but not yet acknowledged.
    pub fn in_flight_ids(&self) -> Vec<CorrelationId> {
        self.state()
            .in_flight
            .iter()
            .map(|packet_id| CorrelationId::from(*packet_id))
            .collect()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    /// Number of `reconnect` calls, successful or not.
    pub fn reconnect_count(&self) -> usize {
        self.state().reconnects
    }

    /// Whether `start_delivery_loop` ran since the last connection loss.
    pub fn is_delivery_loop_running(&self) -> bool {
        self.loop_running.load(Ordering::SeqCst)
    }

    fn schedule_auto_ack(&self, id: CorrelationId, delay: Duration) {
        // ---
        let me = self.me.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(transport) = me.upgrade() {
                transport.acknowledge(id);
            }
        });
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    // ---
    fn transport_id(&self) -> &str {
        &self.transport_id
    }

    async fn connect(&self, host: &str, port: u16) -> Result<()> {
        // ---
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LoadError::Connect(format!("{host}:{port} unreachable")));
        }

        self.state().connects += 1;
        self.connected.store(true, Ordering::SeqCst);
        log_debug!("{}: connected to {host}:{port}", self.transport_id);
        Ok(())
    }

    async fn start_delivery_loop(&self) -> Result<()> {
        // ---
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LoadError::NotConnected);
        }
        self.loop_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, msg: OutboundMessage, on_accepted: AcceptHook) -> Result<CorrelationId> {
        // ---
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LoadError::NotConnected);
        }

        let (id, auto_ack) = {
            let mut state = self.state();

            if let Some(code) = state.reject_next.pop_front() {
                return Err(LoadError::PublishRejected { code });
            }

            let packet_id = state
                .next_packet_id()
                .ok_or_else(|| LoadError::Transport("no free packet id".into()))?;

            let id = CorrelationId::from(packet_id);
            state.in_flight.insert(packet_id);
            state.published.push(PublishedRecord {
                id,
                message: msg,
            });

            // `acknowledge` needs this lock, so no ack for `id` can fire
            // before the hook has run.
            on_accepted(id);

            (id, state.auto_ack)
        };

        if let Some(delay) = auto_ack {
            self.schedule_auto_ack(id, delay);
        }

        Ok(id)
    }

    fn set_on_acknowledged(&self, callback: AckCallback) {
        self.callbacks.set_on_ack(callback);
    }

    fn set_on_disconnected(&self, callback: DisconnectCallback) {
        self.callbacks.set_on_disconnect(callback);
    }

    async fn reconnect(&self) -> Result<()> {
        // ---
        self.state().reconnects += 1;

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(LoadError::Connect("broker unreachable".into()));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.loop_running.store(true, Ordering::SeqCst);
        log_debug!("{}: reconnected", self.transport_id);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        // ---
        self.connected.store(false, Ordering::SeqCst);
        self.loop_running.store(false, Ordering::SeqCst);
        log_debug!("{}: disconnected", self.transport_id);
        Ok(())
    }
}

/// Create a disconnected, reachable in-memory transport.
pub fn create_memory_transport(transport_id: impl Into<String>) -> Arc<MemoryTransport> {
    // ---
    let transport_id = transport_id.into();

    Arc::new_cyclic(|me| MemoryTransport {
        transport_id,
        me: me.clone(),
        state: Mutex::new(MemoryState::default()),
        callbacks: CallbackSlots::default(),
        connected: AtomicBool::new(false),
        loop_running: AtomicBool::new(false),
        reachable: AtomicBool::new(true),
    })
}
