use thiserror::Error;

use crate::CorrelationId;

/// Errors raised while driving publish load.
///
/// None of these ever escape [`CorrelationEngine::publish`](crate::CorrelationEngine::publish);
/// the engine turns them into failure reports. They surface from transports,
/// configuration parsing and the instrumented decorator.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Generic transport failure with details.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport has no live broker connection.
    #[error("transport not connected")]
    NotConnected,

    /// The transport refused the publish synchronously.
    #[error("publish rejected by transport (code {code})")]
    PublishRejected { code: i32 },

    /// Broker connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A correlation id was handed out while a live entry still used it.
    #[error("correlation id {0} already in flight")]
    DuplicateCorrelationId(CorrelationId),

    /// Target address is not of the form `mqtt://host[:port]`.
    #[error("invalid target uri: {0}")]
    InvalidUri(String),

    /// Required configuration missing.
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    /// A configuration value is present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for load generation operations
pub type Result<T> = std::result::Result<T, LoadError>;
