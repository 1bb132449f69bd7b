//! Simulated load user.
//!
//! A [`LoadUser`] is what a harness spawns per virtual user: it connects on
//! start, publishes one generated payload per task invocation, waits a
//! random think time between tasks and disconnects on stop.

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;

use crate::{
    //
    log_debug,
    CorrelationEngine,
    HarnessPtr,
    Instrumented,
    LoadConfig,
    PublishOptions,
    Result,
    Transport,
};

/// Default topic of the lamp configuration scenario.
pub const LAMP_TOPIC: &str = "lamp/set_config";

/// Produces the payload for each publish.
pub trait PayloadSource: Send + Sync {
    fn next_payload(&self) -> Result<Bytes>;
}

/// A fixed payload, sent unchanged every time.
impl PayloadSource for Bytes {
    fn next_payload(&self) -> Result<Bytes> {
        Ok(self.clone())
    }
}

#[derive(Serialize)]
struct LampColor {
    h: f64,
    s: f64,
}

#[derive(Serialize)]
struct LampConfigDoc {
    on: &'static str,
    color: LampColor,
    brightness: f64,
}

/// Random lamp configuration documents.
///
/// ```json
/// {"on":"true","color":{"h":0.42,"s":0.17},"brightness":0.9}
/// ```
///
/// `on` is the string `"true"` or `"false"`; hue, saturation and brightness
/// are uniform in `[0, 1)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LampConfigPayload;

impl PayloadSource for LampConfigPayload {
    fn next_payload(&self) -> Result<Bytes> {
        // ---
        let mut rng = rand::thread_rng();

        let doc = LampConfigDoc {
            on: if rng.gen_bool(0.5) { "true" } else { "false" },
            color: LampColor {
                h: rng.gen(),
                s: rng.gen(),
            },
            brightness: rng.gen(),
        };

        Ok(Bytes::from(serde_json::to_vec(&doc)?))
    }
}

/// One virtual user publishing to a single topic.
pub struct LoadUser {
    // ---
    engine: Arc<CorrelationEngine>,
    instrumented: Instrumented,
    config: LoadConfig,
    topic: String,
    payload: Box<dyn PayloadSource>,
    options: PublishOptions,
    think_time_ms: RangeInclusive<u64>,
}

impl LoadUser {
    /// Create a user publishing through `engine`.
    ///
    /// Connect and disconnect are reported to `harness` under `"connect"`
    /// and `"disconnect"`; publishes are reported by the engine.
    pub fn new(
        engine: Arc<CorrelationEngine>,
        harness: HarnessPtr,
        config: LoadConfig,
        topic: impl Into<String>,
        payload: impl PayloadSource + 'static,
    ) -> Self {
        // ---
        let instrumented = Instrumented::new(Arc::clone(engine.transport()), harness);
        let options = PublishOptions::from(&config);

        Self {
            engine,
            instrumented,
            config,
            topic: topic.into(),
            payload: Box::new(payload),
            options,
            think_time_ms: 5..=500,
        }
    }

    /// Override the random pause between tasks (milliseconds, inclusive).
    pub fn with_think_time(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.think_time_ms = min_ms.min(max_ms)..=max_ms.max(min_ms);
        self
    }

    /// Override the per-publish options derived from the config.
    pub fn with_publish_options(mut self, options: PublishOptions) -> Self {
        self.options = options;
        self
    }

    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Connect to the configured broker and start acknowledgment delivery.
    ///
    /// Also starts the periodic sweeper when the config asks for one.
    pub async fn on_start(&self) -> Result<()> {
        // ---
        self.instrumented
            .connect(&self.config.host, self.config.port)
            .await?;
        self.instrumented.start_delivery_loop().await?;

        if let Some(_handle) = self.engine.spawn_periodic_sweeper() {
            log_debug!(
                "{}: periodic sweeper running",
                self.instrumented.transport_id()
            );
        }
        Ok(())
    }

    /// Publish one generated payload.
    ///
    /// Payload generation errors are returned; send failures are reported to
    /// the harness by the engine.
    pub async fn run_task(&self) -> Result<()> {
        // ---
        let payload = self.payload.next_payload()?;
        self.engine
            .publish(&self.topic, payload, &self.options)
            .await;
        Ok(())
    }

    /// Random pause to take between two tasks.
    pub fn think_time(&self) -> Duration {
        let ms = rand::thread_rng().gen_range(self.think_time_ms.clone());
        Duration::from_millis(ms)
    }

    /// Run `iterations` tasks separated by think time.
    pub async fn run(&self, iterations: usize) -> Result<()> {
        // ---
        for _ in 0..iterations {
            self.run_task().await?;
            tokio::time::sleep(self.think_time()).await;
        }
        Ok(())
    }

    /// Disconnect from the broker.
    pub async fn on_stop(&self) -> Result<()> {
        self.instrumented.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::{create_memory_transport, FailureCause, RecordingHarness};

    #[test]
    fn test_lamp_payload_shape() {
        // ---
        let payload = LampConfigPayload.next_payload().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        let on = doc["on"].as_str().unwrap();
        assert!(on == "true" || on == "false");

        for value in [&doc["color"]["h"], &doc["color"]["s"], &doc["brightness"]] {
            let v = value.as_f64().unwrap();
            assert!((0.0..1.0).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn test_think_time_within_bounds() {
        // ---
        let config = LoadConfig::new("localhost", 1883);
        let harness = Arc::new(RecordingHarness::new());
        let engine = CorrelationEngine::new(create_memory_transport("mem"), harness.clone(), &config);

        let user = LoadUser::new(engine, harness, config, LAMP_TOPIC, LampConfigPayload)
            .with_think_time(20, 10);

        for _ in 0..50 {
            let pause = user.think_time();
            assert!(pause >= Duration::from_millis(10) && pause <= Duration::from_millis(20));
        }
    }

    #[tokio::test]
    async fn test_user_lifecycle_reports_connect_publish_disconnect() {
        // ---
        let config = LoadConfig::new("localhost", 1883);
        let harness = Arc::new(RecordingHarness::new());
        let memory = create_memory_transport("mem");
        let engine = CorrelationEngine::new(memory.clone(), harness.clone(), &config);

        let user = LoadUser::new(
            engine,
            harness.clone(),
            config,
            LAMP_TOPIC,
            Bytes::from_static(b"0123456789"),
        );

        user.on_start().await.unwrap();
        user.run_task().await.unwrap();
        memory.acknowledge_all();
        user.on_stop().await.unwrap();

        let names: Vec<String> = harness
            .events()
            .iter()
            .map(|e| e.operation_name.to_string())
            .collect();
        assert_eq!(names, ["connect", LAMP_TOPIC, "disconnect"]);

        let publish = &harness.events()[1];
        assert!(publish.success);
        assert_eq!(publish.bytes_transferred, 10);
        assert!(harness.failures_with(FailureCause::TransportError).is_empty());
    }

    #[tokio::test]
    async fn test_start_against_unreachable_broker_fails() {
        // ---
        let config = LoadConfig::new("localhost", 1883);
        let harness = Arc::new(RecordingHarness::new());
        let memory = create_memory_transport("mem");
        memory.set_reachable(false);
        let engine = CorrelationEngine::new(memory, harness.clone(), &config);

        let user = LoadUser::new(engine, harness.clone(), config, LAMP_TOPIC, LampConfigPayload);

        assert!(user.on_start().await.is_err());
        assert_eq!(harness.failures_with(FailureCause::TransportError).len(), 1);
    }
}
