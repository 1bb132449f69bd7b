//! In-flight correlation engine.
//!
//! Issues publishes through a [`Transport`](crate::Transport), tracks every
//! accepted publish until the broker acknowledges it or its timeout passes,
//! and reports each request exactly once to the harness.
//!
//! ## Concurrency model
//!
//! - Any number of tasks may call [`CorrelationEngine::publish`].
//! - The transport's delivery context calls back into
//!   [`CorrelationEngine::on_acknowledged`] and
//!   [`CorrelationEngine::on_disconnected`], concurrently with publishers.
//! - The [`PendingRegistry`] is the only shared mutable state. Removal is
//!   pop-once, so an id is never matched twice, whichever of the
//!   acknowledgment path and the sweeper gets there first.

mod registry;
mod sweeper;

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::domain::{AcceptHook, FailureCause, HarnessPtr, OutboundMessage, QoS, TransportPtr};
use crate::load_config::DEFAULT_PUBLISH_TIMEOUT;
use crate::reporter::{Outcome, OutcomeReporter};
#[allow(unused_imports)]
use crate::{log_debug, log_error, log_info, log_warn};
use crate::{CorrelationId, LoadConfig, LoadError, Result};

pub use registry::{PendingMessage, PendingRegistry};
use sweeper::SweepTrigger;

/// Operation name under which dropped connections are reported.
pub const DISCONNECT_OPERATION: &str = "disconnect";

/// Per-call publish settings.
///
/// Build from a [`LoadConfig`] to inherit its defaults, then override.
#[derive(Debug, Clone)]
pub struct PublishOptions {
    // ---
    /// Delivery guarantee.
    pub qos: QoS,

    /// Broker retain flag.
    pub retain: bool,

    /// Acknowledgment timeout; `None` never times out.
    ///
    /// Default: 5 seconds
    pub timeout: Option<Duration>,

    /// Number of sends issued by one `publish` call.
    pub repeat: u32,

    /// Reporting label; the topic when unset.
    pub operation_name: Option<Arc<str>>,
}

impl Default for PublishOptions {
    /// QoS 1, no retain, 5 second timeout, one send.
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            retain: false,
            timeout: Some(DEFAULT_PUBLISH_TIMEOUT),
            repeat: 1,
            operation_name: None,
        }
    }
}

impl From<&LoadConfig> for PublishOptions {
    fn from(config: &LoadConfig) -> Self {
        Self {
            qos: config.qos,
            retain: config.retain,
            timeout: config.publish_timeout,
            repeat: config.repeat,
            operation_name: None,
        }
    }
}

impl PublishOptions {
    /// Set the delivery guarantee.
    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the retain flag.
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Set the acknowledgment timeout.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the repeat count.
    pub fn repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Set the reporting label.
    pub fn operation_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.operation_name = Some(name.into());
        self
    }
}

/// Publishes, correlates acknowledgments and reports outcomes.
///
/// Construct with [`CorrelationEngine::new`], which installs the engine's
/// acknowledgment and disconnect callbacks on the transport. The callbacks
/// hold weak references; dropping the last `Arc` detaches the engine.
pub struct CorrelationEngine {
    // ---
    transport: TransportPtr,
    reporter: OutcomeReporter,
    registry: Arc<PendingRegistry>,
    trigger: SweepTrigger,

    host: String,
    port: u16,
    sweep_interval: Option<Duration>,

    // Serializes lazy connects so concurrent publishers connect once.
    connect_lock: tokio::sync::Mutex<()>,

    // Runtime used for fire-and-forget reconnects when a callback arrives
    // from a thread outside any runtime.
    runtime: Option<Handle>,
}

impl CorrelationEngine {
    /// Create an engine publishing through `transport` and reporting into
    /// `harness`, and install its transport callbacks.
    pub fn new(transport: TransportPtr, harness: HarnessPtr, config: &LoadConfig) -> Arc<Self> {
        // ---
        let engine = Arc::new(Self {
            transport,
            reporter: OutcomeReporter::new(harness),
            registry: Arc::new(PendingRegistry::new()),
            trigger: SweepTrigger::new(config.sweep_every),
            host: config.host.clone(),
            port: config.port,
            sweep_interval: config.sweep_interval,
            connect_lock: tokio::sync::Mutex::new(()),
            runtime: Handle::try_current().ok(),
        });

        Self::attach(&engine);
        engine
    }

    fn attach(engine: &Arc<Self>) {
        // ---
        let weak: Weak<Self> = Arc::downgrade(engine);
        engine
            .transport
            .set_on_acknowledged(Arc::new(move |id: CorrelationId| {
                if let Some(engine) = weak.upgrade() {
                    engine.on_acknowledged(id);
                }
            }));

        let weak: Weak<Self> = Arc::downgrade(engine);
        engine.transport.set_on_disconnected(Arc::new(move || {
            if let Some(engine) = weak.upgrade() {
                engine.on_disconnected();
            }
        }));
    }

    /// The transport this engine publishes through.
    pub fn transport(&self) -> &TransportPtr {
        &self.transport
    }

    /// The in-flight registry.
    pub fn registry(&self) -> &PendingRegistry {
        &self.registry
    }

    /// Number of publishes awaiting acknowledgment.
    pub fn pending_count(&self) -> usize {
        self.registry.len()
    }

    /// Publish `payload` to `topic`, `options.repeat` times.
    ///
    /// Returns once every send was accepted or rejected by the transport;
    /// acknowledgments resolve later. Never fails: rejections are reported
    /// to the harness as transport errors and no entry is tracked for them.
    ///
    /// When the transport is not connected, connects (and starts its
    /// delivery loop) before sending.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>, options: &PublishOptions) {
        // ---
        let payload = payload.into();
        let topic: Arc<str> = Arc::from(topic);
        let operation_name = options
            .operation_name
            .clone()
            .unwrap_or_else(|| Arc::clone(&topic));

        for _ in 0..options.repeat {
            self.publish_once(&topic, &payload, options, &operation_name)
                .await;
        }
    }

    async fn publish_once(
        &self,
        topic: &Arc<str>,
        payload: &Bytes,
        options: &PublishOptions,
        operation_name: &Arc<str>,
    ) {
        // ---
        let start = Instant::now();

        if let Err(err) = self.ensure_connected().await {
            self.report_rejection(operation_name, start, &err);
            return;
        }

        let entry = PendingMessage {
            start_time: start,
            timeout: options.timeout,
            operation_name: Arc::clone(operation_name),
            payload_size: payload.len(),
        };

        let on_accepted = self.accept_hook(entry);

        let msg = OutboundMessage {
            topic: Arc::clone(topic),
            payload: payload.clone(),
            qos: options.qos,
            retain: options.retain,
        };

        match self.transport.publish(msg, on_accepted).await {
            Ok(_id) => {
                log_debug!(
                    "{}: publish {_id} accepted on {topic}",
                    self.transport.transport_id()
                );
            }
            Err(err) => self.report_rejection(operation_name, start, &err),
        }
    }

    /// Registry insert run by the transport as soon as it assigns an id.
    fn accept_hook(&self, entry: PendingMessage) -> AcceptHook {
        // ---
        let registry = Arc::clone(&self.registry);
        let reporter = self.reporter.clone();
        let transport_id = self.transport.transport_id().to_string();

        Box::new(move |id: CorrelationId| {
            let operation_name = Arc::clone(&entry.operation_name);
            let start = entry.start_time;

            if let Err(err) = registry.insert(id, entry) {
                // The earlier entry stays tracked; this send can't be.
                log_error!("{transport_id}: {err}; reporting the new send as failed");
                reporter.report(
                    &operation_name,
                    Outcome::Failure {
                        elapsed: start.elapsed(),
                        cause: FailureCause::TransportError,
                    },
                );
            }
        })
    }

    async fn ensure_connected(&self) -> Result<()> {
        // ---
        if self.transport.is_connected() {
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        if self.transport.is_connected() {
            return Ok(());
        }

        log_info!(
            "{}: not connected, connecting to {}:{}",
            self.transport.transport_id(),
            self.host,
            self.port
        );

        self.transport.connect(&self.host, self.port).await?;
        self.transport.start_delivery_loop().await
    }

    fn report_rejection(&self, operation_name: &str, start: Instant, _err: &LoadError) {
        // ---
        log_debug!(
            "{}: publish rejected for {operation_name}: {_err}",
            self.transport.transport_id()
        );

        self.reporter.report(
            operation_name,
            Outcome::Failure {
                elapsed: start.elapsed(),
                cause: FailureCause::TransportError,
            },
        );
    }

    /// Resolve the publish identified by `id`.
    ///
    /// Called by the transport's delivery context. An acknowledgment arriving
    /// after the publish's timeout is reported as an acknowledgment timeout
    /// even though the message was delivered. Unknown ids (already swept or
    /// re-delivered) are ignored.
    ///
    /// Every `sweep_every`-th successful acknowledgment also runs a sweep;
    /// late ones do not count.
    pub fn on_acknowledged(&self, id: CorrelationId) {
        // ---
        let now = Instant::now();

        let Some(entry) = self.registry.pop_if_present(id) else {
            log_debug!(
                "{}: no pending publish for {id}, ignoring acknowledgment",
                self.transport.transport_id()
            );
            return;
        };

        let elapsed = entry.elapsed_at(now);

        if entry.is_expired_after(elapsed) {
            self.reporter.report(
                &entry.operation_name,
                Outcome::Failure {
                    elapsed,
                    cause: FailureCause::AckTimeout,
                },
            );
            return;
        }

        self.reporter.report(
            &entry.operation_name,
            Outcome::Success {
                elapsed,
                payload_size: entry.payload_size,
            },
        );

        if self.trigger.record() {
            self.sweep(now);
        }
    }

    /// Report the dropped connection and request a reconnect.
    ///
    /// In-flight publishes stay tracked; they resolve through a later
    /// acknowledgment or age out through the sweeper.
    pub fn on_disconnected(&self) {
        // ---
        log_warn!(
            "{}: connection dropped with {} publish(es) in flight, reconnecting",
            self.transport.transport_id(),
            self.registry.len()
        );

        self.reporter.report(
            DISCONNECT_OPERATION,
            Outcome::Failure {
                elapsed: Duration::ZERO,
                cause: FailureCause::ConnectionDropped,
            },
        );

        let Some(runtime) = Handle::try_current().ok().or_else(|| self.runtime.clone()) else {
            log_error!(
                "{}: no async runtime available, reconnect skipped",
                self.transport.transport_id()
            );
            return;
        };

        let transport = Arc::clone(&self.transport);
        runtime.spawn(async move {
            if let Err(_err) = transport.reconnect().await {
                log_warn!("{}: reconnect failed: {_err}", transport.transport_id());
            }
        });
    }

    /// Evict and report every publish whose timeout has passed at `now`.
    ///
    /// Returns the number of evicted publishes.
    pub fn sweep(&self, now: Instant) -> usize {
        // ---
        let evicted = sweeper::sweep(&self.registry, &self.reporter, now);

        if evicted > 0 {
            log_debug!(
                "{}: swept {evicted} timed out publish(es), {} still in flight",
                self.transport.transport_id(),
                self.registry.len()
            );
        }

        evicted
    }

    /// Run [`sweep`](Self::sweep) on the configured `sweep_interval`.
    ///
    /// Bounds how long a lost message can stay unreported by wall-clock time
    /// instead of acknowledgment volume. Returns `None` when no interval is
    /// configured. The task ends once the engine is dropped.
    pub fn spawn_periodic_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        // ---
        let period = self.sweep_interval?;
        let weak = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.sweep(Instant::now());
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_publish_options_from_config() {
        // ---
        let config = LoadConfig::new("localhost", 1883)
            .with_qos(QoS::AtMostOnce)
            .with_retain(true)
            .with_repeat(4)
            .with_publish_timeout(Some(Duration::from_secs(1)));

        let options = PublishOptions::from(&config);
        assert_eq!(options.qos, QoS::AtMostOnce);
        assert!(options.retain);
        assert_eq!(options.repeat, 4);
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));
        assert!(options.operation_name.is_none());
    }

    #[test]
    fn test_publish_options_defaults() {
        // ---
        let options = PublishOptions::default().operation_name("set_config");
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert_eq!(options.repeat, 1);
        assert_eq!(options.operation_name.as_deref(), Some("set_config"));
    }
}
