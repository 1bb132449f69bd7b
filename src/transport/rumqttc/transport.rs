//! MQTT transport implementation using `rumqttc`.
//!
//! This module provides an implementation of the `Transport` trait backed by
//! an MQTT broker connection. It follows an **actor-based concurrency model**
//! to safely integrate with the underlying MQTT client.
//!
//! ## Concurrency model
//!
//! - `connect()` drives the fresh `EventLoop` itself until the broker's
//!   CONNACK arrives, so a failed connect is reported to the caller.
//! - `start_delivery_loop()` hands the `EventLoop` to a background **actor
//!   task**, which from then on:
//!   - enqueues outbound publishes via `AsyncClient::try_publish`,
//!   - polls the `EventLoop` for acknowledgments and connection events,
//!   - invokes the acknowledgment and disconnect callbacks,
//!   - shuts the connection down cleanly.
//! - No other task touches the event loop once the actor owns it.
//!
//! ## Correlation ids
//!
//! rumqttc assigns packet ids inside its event loop and only reveals them
//! through `Outgoing::Publish(pkid)` events, which follow request order. The
//! actor therefore hands out its own monotonically increasing correlation id
//! when it enqueues a publish, remembers it in a FIFO, and binds it to the
//! packet id once the matching outgoing event shows up:
//!
//! - QoS 0: acknowledged as soon as the publish is written.
//! - QoS 1: acknowledged on PUBACK.
//! - QoS 2: acknowledged on PUBCOMP.
//!
//! An outgoing event for a packet id that is already bound is a
//! retransmission after reconnect and leaves the FIFO alone.
//!
//! ## Connection behavior
//!
//! On a connection error the actor marks the transport disconnected, fires
//! the disconnect callback once per drop and arms a backoff timer. The event
//! loop is not polled while the timer runs; rumqttc reconnects on the first
//! poll after it. Commands are still served during the backoff, and
//! `reconnect()` cancels a running backoff so the next poll reconnects at
//! once. Without a running backoff `reconnect()` changes nothing.

use rumqttc::{
    //
    AsyncClient,
    ConnectReturnCode,
    Event,
    EventLoop,
    MqttOptions,
    Outgoing,
    Packet,
};

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::transport::callbacks::CallbackSlots;
#[allow(unused_imports)]
use crate::{
    //
    log_debug,
    log_error,
    log_info,
    log_warn,
    AcceptHook,
    AckCallback,
    CorrelationId,
    DisconnectCallback,
    LoadConfig,
    LoadError,
    OutboundMessage,
    QoS,
    Result,
    Transport,
    TransportPtr,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const CLOSE_DRAIN: Duration = Duration::from_secs(1);

fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        msg: OutboundMessage,
        on_accepted: AcceptHook,
        resp: oneshot::Sender<Result<CorrelationId>>,
    },
    Reconnect,
    Close {
        resp: oneshot::Sender<()>,
    },
}

enum ActorStep {
    //
    Continue,
    Stop,
}

impl Cmd {
    // ---

    /// Dispatches an actor command to the correct handler on the actor
    async fn handle(self, actor: &mut MqttActor) -> ActorStep {
        // ---

        match self {
            Cmd::Publish {
                msg,
                on_accepted,
                resp,
            } => {
                let result = actor.handle_publish(msg, on_accepted);
                let _ = resp.send(result);
                ActorStep::Continue
            }
            Cmd::Reconnect => {
                if actor.backoff.take().is_some() {
                    log_debug!("{}: reconnect requested, backoff cancelled", actor.transport_id);
                }
                ActorStep::Continue
            }
            Cmd::Close { resp } => {
                actor.handle_close().await;
                let _ = resp.send(());
                ActorStep::Stop
            }
        }
    }
}

/// Connection lifecycle as seen by the transport handle.
enum Session {
    /// No broker connection.
    Idle,
    /// Connected; event loop not yet handed to the actor.
    Ready {
        client: AsyncClient,
        event_loop: Box<EventLoop>,
    },
    /// Actor running.
    Running {
        cmd_tx: mpsc::Sender<Cmd>,
        handle: JoinHandle<()>,
    },
}

/// MQTT-based implementation of the `Transport` trait.
///
/// Represents a single broker connection.
pub struct RumqttcTransport {
    // ---
    transport_id: String,
    client_id: String,
    keep_alive_secs: Option<u16>,
    connect_timeout: Duration,
    request_capacity: usize,
    callbacks: Arc<CallbackSlots>,
    state_tx: Arc<watch::Sender<bool>>,
    state_rx: watch::Receiver<bool>,
    session: Mutex<Session>,
}

impl RumqttcTransport {
    // ---

    /// Creates a disconnected rumqttc transport.
    pub fn create(transport_id: impl Into<String>, config: &LoadConfig) -> TransportPtr {
        // ---
        let (state_tx, state_rx) = watch::channel(false);

        Arc::new(Self {
            transport_id: transport_id.into(),
            client_id: config.client_id.clone(),
            keep_alive_secs: config.keep_alive_secs,
            connect_timeout: config.connect_timeout,
            request_capacity: config.request_capacity.max(1),
            callbacks: Arc::new(CallbackSlots::default()),
            state_tx: Arc::new(state_tx),
            state_rx,
            session: Mutex::new(Session::Idle),
        })
    }

    fn mqtt_options(&self, host: &str, port: u16) -> MqttOptions {
        // ---
        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_clean_session(true);

        if let Some(secs) = self.keep_alive_secs {
            options.set_keep_alive(Duration::from_secs(u64::from(secs)));
        }

        options
    }

    /// Poll a fresh event loop until the broker accepts the session.
    async fn handshake(&self, event_loop: &mut EventLoop) -> Result<()> {
        // ---
        let wait_connack = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                        return if connack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(LoadError::Connect(format!(
                                "broker refused connection: {:?}",
                                connack.code
                            )))
                        };
                    }
                    Ok(_event) => continue,
                    Err(err) => return Err(LoadError::Connect(err.to_string())),
                }
            }
        };

        tokio::time::timeout(self.connect_timeout, wait_connack)
            .await
            .map_err(|_| {
                LoadError::Connect(format!(
                    "no CONNACK within {:?}",
                    self.connect_timeout
                ))
            })?
    }

    /// Wait for the running actor to report the connection up again.
    async fn await_reconnect(&self) -> Result<()> {
        // ---
        let mut state_rx = self.state_rx.clone();
        let waited = tokio::time::timeout(self.connect_timeout, state_rx.wait_for(|up| *up)).await;

        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LoadError::Transport("connection state channel closed".into())),
            Err(_) => Err(LoadError::Connect(format!(
                "not reconnected within {:?}",
                self.connect_timeout
            ))),
        }
    }
}

async fn wait_backoff(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

struct MqttActor {
    // ---
    transport_id: String, // for logging only
    client: AsyncClient,
    event_loop: EventLoop,
    cmd_rx: mpsc::Receiver<Cmd>,
    callbacks: Arc<CallbackSlots>,
    state_tx: Arc<watch::Sender<bool>>,

    next_id: u64,
    // Enqueued publishes waiting for rumqttc to reveal their packet id.
    awaiting_pkid: VecDeque<(QoS, CorrelationId)>,
    // Packet id → correlation id for QoS 1/2 publishes awaiting PUBACK/PUBCOMP.
    in_flight: HashMap<u16, CorrelationId>,
    // Running while the event loop rests after a connection error.
    backoff: Option<Pin<Box<Sleep>>>,
}

impl MqttActor {
    // ---

    async fn run(mut self) {
        // ---

        loop {
            let resting = self.backoff.is_some();

            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if matches!(cmd.handle(&mut self).await, ActorStep::Stop) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = wait_backoff(&mut self.backoff), if resting => {
                    self.backoff = None;
                }

                event = self.event_loop.poll(), if !resting => {
                    match event {
                        Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                            self.handle_outgoing_publish(pkid);
                        }
                        Ok(Event::Incoming(Packet::PubAck(puback))) => {
                            self.handle_ack(puback.pkid);
                        }
                        Ok(Event::Incoming(Packet::PubComp(pubcomp))) => {
                            self.handle_ack(pubcomp.pkid);
                        }
                        Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                            self.handle_connack(connack);
                        }
                        Ok(_event) => {
                            // PingResp, PubRec, ... - nothing to correlate
                            log_debug!("{}: received mqtt event (ignored): {:?}",
                                       self.transport_id, _event);
                        }
                        Err(err) => {
                            self.handle_connection_error(&err);
                        }
                    }
                }
            }
        }

        self.state_tx.send_replace(false);
        log_debug!("{}: actor stopped", self.transport_id);
    }

    /// Enqueues a publish with rumqttc and assigns its correlation id.
    ///
    /// Uses `try_publish`: the actor is the only task polling the event
    /// loop, so awaiting a full request queue here would never resolve.
    fn handle_publish(&mut self, msg: OutboundMessage, on_accepted: AcceptHook) -> Result<CorrelationId> {
        // ---

        let topic = msg.topic.as_ref();

        self.client
            .try_publish(topic, to_mqtt_qos(msg.qos), msg.retain, msg.payload.to_vec())
            .map_err(|err| {
                log_debug!("{}: publish rejected for topic {topic}: {err}", self.transport_id);
                LoadError::Transport(err.to_string())
            })?;

        self.next_id += 1;
        let id = CorrelationId::new(self.next_id);
        self.awaiting_pkid.push_back((msg.qos, id));

        // Runs before this actor can observe any acknowledgment for `id`.
        on_accepted(id);

        Ok(id)
    }

    /// Binds the packet id rumqttc just wrote to the oldest awaiting publish.
    fn handle_outgoing_publish(&mut self, pkid: u16) {
        // ---

        if pkid != 0 && self.in_flight.contains_key(&pkid) {
            log_debug!("{}: retransmitted packet {pkid}", self.transport_id);
            return;
        }

        let Some((qos, id)) = self.awaiting_pkid.pop_front() else {
            log_warn!("{}: outgoing packet {pkid} matches no publish", self.transport_id);
            return;
        };

        match qos {
            QoS::AtMostOnce => self.callbacks.fire_ack(id),
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                self.in_flight.insert(pkid, id);
            }
        }
    }

    /// Processes PUBACK / PUBCOMP from the broker.
    fn handle_ack(&mut self, pkid: u16) {
        // ---

        match self.in_flight.remove(&pkid) {
            Some(id) => self.callbacks.fire_ack(id),
            None => {
                log_debug!("{}: acknowledgment for unknown packet {pkid}", self.transport_id);
            }
        }
    }

    /// Processes connection acknowledgment from the broker.
    fn handle_connack(&self, connack: rumqttc::ConnAck) {
        // ---

        if connack.code == ConnectReturnCode::Success {
            log_info!("{}: connected to broker", self.transport_id);
            self.state_tx.send_replace(true);
        } else {
            log_error!(
                "{}: connection failed: {:?}",
                self.transport_id,
                connack.code
            );
        }
    }

    /// Marks the connection down, firing the disconnect callback once per
    /// drop, and arms the reconnect backoff.
    fn handle_connection_error(&mut self, err: &rumqttc::ConnectionError) {
        // ---

        let was_up = self.state_tx.send_replace(false);
        self.backoff = Some(Box::pin(tokio::time::sleep(RECONNECT_DELAY)));

        if was_up {
            log_error!("{}: broker disconnected: {err}", self.transport_id);
            self.callbacks.fire_disconnect();
        } else {
            log_debug!("{}: still disconnected: {err}", self.transport_id);
        }
    }

    /// Sends DISCONNECT and drains the event loop until it is written.
    async fn handle_close(&mut self) {
        // ---

        log_debug!("{}: disconnecting mqtt client", self.transport_id);

        if let Err(_err) = self.client.try_disconnect() {
            log_debug!("{}: mqtt disconnect failed: {_err}", self.transport_id);
            return;
        }

        let event_loop = &mut self.event_loop;
        let drain = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(CLOSE_DRAIN, drain).await.is_err() {
            log_debug!("{}: disconnect not confirmed within {CLOSE_DRAIN:?}", self.transport_id);
        }
    }
} // MqttActor

#[async_trait::async_trait]
impl Transport for RumqttcTransport {
    // ---

    fn transport_id(&self) -> &str {
        // ---
        &self.transport_id
    }

    async fn connect(&self, host: &str, port: u16) -> Result<()> {
        // ---

        let mut session = self.session.lock().await;

        if let Session::Running { cmd_tx, .. } = &*session {
            if self.is_connected() {
                return Ok(());
            }
            // The actor owns the connection and reconnects on its own.
            let _ = cmd_tx.send(Cmd::Reconnect).await;
            drop(session);
            return self.await_reconnect().await;
        }

        let (client, mut event_loop) =
            AsyncClient::new(self.mqtt_options(host, port), self.request_capacity);

        self.handshake(&mut event_loop).await?;
        log_info!("{}: connected to {host}:{port}", self.transport_id);

        *session = Session::Ready {
            client,
            event_loop: Box::new(event_loop),
        };
        self.state_tx.send_replace(true);

        Ok(())
    }

    async fn start_delivery_loop(&self) -> Result<()> {
        // ---

        let mut session = self.session.lock().await;

        match std::mem::replace(&mut *session, Session::Idle) {
            Session::Idle => Err(LoadError::NotConnected),
            Session::Ready { client, event_loop } => {
                let (cmd_tx, cmd_rx) = mpsc::channel(self.request_capacity);

                let actor = MqttActor {
                    transport_id: self.transport_id.clone(),
                    client,
                    event_loop: *event_loop,
                    cmd_rx,
                    callbacks: Arc::clone(&self.callbacks),
                    state_tx: Arc::clone(&self.state_tx),
                    next_id: 0,
                    awaiting_pkid: VecDeque::new(),
                    in_flight: HashMap::new(),
                    backoff: None,
                };

                let handle = tokio::spawn(actor.run());
                *session = Session::Running { cmd_tx, handle };
                Ok(())
            }
            running @ Session::Running { .. } => {
                *session = running;
                Ok(())
            }
        }
    }

    async fn publish(&self, msg: OutboundMessage, on_accepted: AcceptHook) -> Result<CorrelationId> {
        // ---

        let cmd_tx = match &*self.session.lock().await {
            Session::Running { cmd_tx, .. } => cmd_tx.clone(),
            Session::Idle | Session::Ready { .. } => return Err(LoadError::NotConnected),
        };

        let (tx, rx) = oneshot::channel();

        cmd_tx
            .send(Cmd::Publish {
                msg,
                on_accepted,
                resp: tx,
            })
            .await
            .map_err(|_| LoadError::Transport("mqtt actor stopped".into()))?;

        rx.await
            .map_err(|_| LoadError::Transport("mqtt actor dropped publish".into()))?
    }

    fn set_on_acknowledged(&self, callback: AckCallback) {
        self.callbacks.set_on_ack(callback);
    }

    fn set_on_disconnected(&self, callback: DisconnectCallback) {
        self.callbacks.set_on_disconnect(callback);
    }

    async fn reconnect(&self) -> Result<()> {
        // ---

        let cmd_tx = match &*self.session.lock().await {
            Session::Running { cmd_tx, .. } => cmd_tx.clone(),
            Session::Idle | Session::Ready { .. } => return Err(LoadError::NotConnected),
        };

        cmd_tx
            .send(Cmd::Reconnect)
            .await
            .map_err(|_| LoadError::Transport("mqtt actor stopped".into()))
    }

    fn is_connected(&self) -> bool {
        *self.state_rx.borrow()
    }

    async fn disconnect(&self) -> Result<()> {
        // ---

        let mut session = self.session.lock().await;

        match std::mem::replace(&mut *session, Session::Idle) {
            Session::Idle => {}
            Session::Ready { client, .. } => {
                let _ = client.try_disconnect();
            }
            Session::Running { cmd_tx, handle } => {
                let (tx, rx) = oneshot::channel();
                let _ = cmd_tx.send(Cmd::Close { resp: tx }).await;
                let _ = rx.await;
                let _ = handle.await;
            }
        }

        self.state_tx.send_replace(false);
        Ok(())
    }
}

/// Creates a rumqttc-based MQTT transport from the given configuration.
///
/// Infallible: nothing touches the network until `connect()`.
pub fn create_transport(config: &LoadConfig) -> TransportPtr {
    // ---
    RumqttcTransport::create("rumqttc", config)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Observed {
        acked: Arc<std::sync::Mutex<Vec<CorrelationId>>>,
        drops: Arc<AtomicUsize>,
    }

    impl Observed {
        fn acked(&self) -> Vec<CorrelationId> {
            self.acked.lock().unwrap().clone()
        }
    }

    // Nothing here touches the network: rumqttc only connects on poll.
    fn offline_actor() -> (MqttActor, Observed) {
        // ---
        let options = MqttOptions::new("offline", "localhost", 1883);
        let (client, event_loop) = AsyncClient::new(options, 16);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let (state_tx, _state_rx) = watch::channel(false);

        let observed = Observed {
            acked: Arc::new(std::sync::Mutex::new(Vec::new())),
            drops: Arc::new(AtomicUsize::new(0)),
        };

        let callbacks = Arc::new(CallbackSlots::default());
        let acked = Arc::clone(&observed.acked);
        callbacks.set_on_ack(Arc::new(move |id: CorrelationId| {
            acked.lock().unwrap().push(id);
        }));
        let drops = Arc::clone(&observed.drops);
        callbacks.set_on_disconnect(Arc::new(move || {
            drops.fetch_add(1, Ordering::SeqCst);
        }));

        let actor = MqttActor {
            transport_id: "offline".into(),
            client,
            event_loop,
            cmd_rx,
            callbacks,
            state_tx: Arc::new(state_tx),
            next_id: 0,
            awaiting_pkid: VecDeque::new(),
            in_flight: HashMap::new(),
            backoff: None,
        };

        (actor, observed)
    }

    fn message(qos: QoS) -> OutboundMessage {
        OutboundMessage {
            topic: Arc::from("lamp/set_config"),
            payload: Bytes::from_static(b"{}"),
            qos,
            retain: false,
        }
    }

    fn connection_reset() -> rumqttc::ConnectionError {
        rumqttc::ConnectionError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
    }

    #[tokio::test]
    async fn test_publish_runs_hook_and_queues_for_pkid() {
        // ---
        let (mut actor, _observed) = offline_actor();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        let id = actor
            .handle_publish(
                message(QoS::AtLeastOnce),
                Box::new(move |id: CorrelationId| *seen_clone.lock().unwrap() = Some(id)),
            )
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(id));
        assert_eq!(actor.awaiting_pkid.front(), Some(&(QoS::AtLeastOnce, id)));
    }

    #[tokio::test]
    async fn test_pkids_bind_in_publish_order() {
        // ---
        let (mut actor, observed) = offline_actor();
        let first = CorrelationId::new(1);
        let second = CorrelationId::new(2);
        actor.awaiting_pkid.push_back((QoS::AtLeastOnce, first));
        actor.awaiting_pkid.push_back((QoS::ExactlyOnce, second));

        actor.handle_outgoing_publish(5);
        actor.handle_outgoing_publish(6);
        assert!(actor.awaiting_pkid.is_empty());
        assert!(observed.acked().is_empty());

        actor.handle_ack(6);
        actor.handle_ack(5);
        assert_eq!(observed.acked(), vec![second, first]);
        assert!(actor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_retransmitted_pkid_keeps_queue() {
        // ---
        let (mut actor, observed) = offline_actor();
        let bound = CorrelationId::new(1);
        let waiting = CorrelationId::new(2);
        actor.awaiting_pkid.push_back((QoS::AtLeastOnce, bound));
        actor.awaiting_pkid.push_back((QoS::AtLeastOnce, waiting));

        actor.handle_outgoing_publish(9);
        actor.handle_outgoing_publish(9);

        assert_eq!(actor.awaiting_pkid.front(), Some(&(QoS::AtLeastOnce, waiting)));
        assert_eq!(actor.in_flight.get(&9), Some(&bound));
        assert!(observed.acked().is_empty());
    }

    #[tokio::test]
    async fn test_qos0_acknowledged_when_written() {
        // ---
        let (mut actor, observed) = offline_actor();
        let id = CorrelationId::new(3);
        actor.awaiting_pkid.push_back((QoS::AtMostOnce, id));

        actor.handle_outgoing_publish(0);

        assert_eq!(observed.acked(), vec![id]);
        assert!(actor.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ack_ignored() {
        // ---
        let (mut actor, observed) = offline_actor();
        actor.handle_ack(42);
        assert!(observed.acked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_running_backoff_only() {
        // ---
        let (mut actor, observed) = offline_actor();
        actor.state_tx.send_replace(true);

        actor.handle_connection_error(&connection_reset());
        assert_eq!(observed.drops.load(Ordering::SeqCst), 1);
        assert!(!*actor.state_tx.borrow());
        assert!(actor.backoff.is_some());

        assert!(matches!(Cmd::Reconnect.handle(&mut actor).await, ActorStep::Continue));
        assert!(actor.backoff.is_none());

        // A reconnect without a running backoff leaves nothing behind for
        // the next error, which backs off again without a second drop report.
        Cmd::Reconnect.handle(&mut actor).await;
        actor.handle_connection_error(&connection_reset());
        assert!(actor.backoff.is_some());
        assert_eq!(observed.drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_elapses_after_reconnect_delay() {
        // ---
        let (mut actor, _observed) = offline_actor();
        actor.handle_connection_error(&connection_reset());

        let waited = tokio::time::timeout(
            RECONNECT_DELAY - Duration::from_millis(1),
            wait_backoff(&mut actor.backoff),
        )
        .await;
        assert!(waited.is_err());

        wait_backoff(&mut actor.backoff).await;
    }
}
