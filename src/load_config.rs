//! Load generation configuration.
//!
//! Holds the broker target and the per-publish defaults a load user applies
//! when a task does not override them. Transport layers interpret the
//! connection fields into concrete client options.

use std::time::Duration;

use crate::{LoadError, QoS, Result};

/// Default MQTT port used when the target URI omits one.
pub const DEFAULT_PORT: u16 = 1883;

/// Default acknowledgment timeout for a publish.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of successful acknowledgments between opportunistic sweeps.
pub const DEFAULT_SWEEP_EVERY: u64 = 1000;

/// Target broker and publish defaults.
#[derive(Debug, Clone)]
pub struct LoadConfig {
    // ---
    /// Broker host name or address.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// MQTT client id. Generated when not set explicitly.
    pub client_id: String,

    /// Default acknowledgment timeout; `None` never times out.
    ///
    /// Default: 5 seconds
    pub publish_timeout: Option<Duration>,

    /// Default delivery guarantee.
    pub qos: QoS,

    /// Default retain flag.
    pub retain: bool,

    /// Default number of sends per publish call.
    pub repeat: u32,

    /// Matched acknowledgments between opportunistic sweeps (0 disables).
    pub sweep_every: u64,

    /// Optional wall-clock sweep period, see
    /// [`CorrelationEngine::spawn_periodic_sweeper`](crate::CorrelationEngine::spawn_periodic_sweeper).
    pub sweep_interval: Option<Duration>,

    /// Broker keep-alive interval in seconds.
    pub keep_alive_secs: Option<u16>,

    /// How long `connect` waits for the broker to accept the session.
    pub connect_timeout: Duration,

    /// Capacity of the client request queue between callers and the
    /// network loop.
    pub request_capacity: usize,
}

impl LoadConfig {
    /// Create a config for the given broker host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: format!("mom-loadgen-{}", uuid::Uuid::new_v4().simple()),
            publish_timeout: Some(DEFAULT_PUBLISH_TIMEOUT),
            qos: QoS::AtLeastOnce,
            retain: false,
            repeat: 1,
            sweep_every: DEFAULT_SWEEP_EVERY,
            sweep_interval: None,
            keep_alive_secs: None,
            connect_timeout: Duration::from_secs(5),
            request_capacity: 1024,
        }
    }

    /// Parse a target of the form `mqtt://host[:port]`.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidUri`] for a missing or foreign scheme,
    /// an empty host, a path component or an unparsable port.
    ///
    /// # Example
    ///
    /// ```
    /// use mom_loadgen::LoadConfig;
    ///
    /// let config = LoadConfig::from_uri("mqtt://broker.local:1884").unwrap();
    /// assert_eq!(config.host, "broker.local");
    /// assert_eq!(config.port, 1884);
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self> {
        // ---
        let (host, port) = parse_target(uri)?;
        Ok(Self::new(host, port))
    }

    /// Set an explicit MQTT client id.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Set the default acknowledgment timeout (`None` = never time out).
    pub fn with_publish_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the default delivery guarantee.
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Set the default retain flag.
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Set the default repeat count.
    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    /// Sweep every `n` successful acknowledgments (0 disables the opportunistic sweep).
    pub fn with_sweep_every(mut self, n: u64) -> Self {
        self.sweep_every = n;
        self
    }

    /// Additionally sweep on a wall-clock period.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set an explicit keep-alive interval.
    pub fn with_keep_alive_secs(mut self, secs: u16) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    /// Set how long `connect` waits for the broker.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the client request queue capacity.
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity;
        self
    }
}

/// Split `mqtt://host[:port]` into host and port.
fn parse_target(uri: &str) -> Result<(String, u16)> {
    // ---
    let invalid = |why: &str| LoadError::InvalidUri(format!("{uri}: {why}"));

    let rest = uri
        .strip_prefix("mqtt://")
        .ok_or_else(|| invalid("expected mqtt:// scheme"))?;

    let authority = rest.strip_suffix('/').unwrap_or(rest);
    if authority.contains('/') {
        return Err(invalid("unexpected path"));
    }

    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| invalid("port is not a number in 1..=65535"))?;
            if port == 0 {
                return Err(invalid("port is not a number in 1..=65535"));
            }
            (host, port)
        }
        None => (authority, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }

    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults() {
        // ---
        let config = LoadConfig::new("localhost", 1883);
        assert_eq!(config.publish_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.qos, QoS::AtLeastOnce);
        assert!(!config.retain);
        assert_eq!(config.repeat, 1);
        assert_eq!(config.sweep_every, 1000);
        assert!(config.sweep_interval.is_none());
        assert!(config.client_id.starts_with("mom-loadgen-"));
    }

    #[test]
    fn test_from_uri_default_port() {
        // ---
        let config = LoadConfig::from_uri("mqtt://my.mqtt.host").unwrap();
        assert_eq!(config.host, "my.mqtt.host");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn test_from_uri_explicit_port() {
        // ---
        let config = LoadConfig::from_uri("mqtt://10.0.0.5:8883/").unwrap();
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn test_from_uri_rejects_malformed() {
        // ---
        for uri in [
            "localhost:1883",
            "tcp://localhost:1883",
            "mqtt://",
            "mqtt://:1883",
            "mqtt://host:notaport",
            "mqtt://host:0",
            "mqtt://host:1883/topic",
        ] {
            assert!(
                matches!(LoadConfig::from_uri(uri), Err(LoadError::InvalidUri(_))),
                "{uri} should be rejected"
            );
        }
    }

    #[test]
    fn test_builder_overrides() {
        // ---
        let config = LoadConfig::new("h", 1)
            .with_qos(QoS::ExactlyOnce)
            .with_retain(true)
            .with_repeat(3)
            .with_publish_timeout(None)
            .with_sweep_every(10)
            .with_sweep_interval(Duration::from_secs(1))
            .with_client_id("c1");

        assert_eq!(config.qos, QoS::ExactlyOnce);
        assert!(config.retain);
        assert_eq!(config.repeat, 3);
        assert_eq!(config.publish_timeout, None);
        assert_eq!(config.sweep_every, 10);
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(1)));
        assert_eq!(config.client_id, "c1");
    }
}
