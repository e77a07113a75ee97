use thiserror::Error;

/// Errors returned by the client facade.
///
/// Only fatal conditions surface as `Err`: a malformed configuration, an
/// operation called on the wrong topology, or a payload that cannot be
/// encoded. Operational failures (dial, close, assertion, publish, ack) are
/// reported through the [`ClientObserver`](crate::ClientObserver) instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A required construction parameter is absent.
    #[error("{0} is required")]
    MissingConfig(&'static str),

    /// `options.type` is neither `queue` nor `exchange`.
    #[error("options.type is not correct {0}")]
    InvalidTopologyType(String),

    /// The operation is not valid for the configured topology.
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// No connection exists yet.
    #[error("there is no connection yet")]
    NotConnected,

    /// Broker driver failure (dial, channel, declaration, transmission).
    #[error("driver error: {0}")]
    Driver(String),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A finite reconnect policy ran out of attempts.
    #[error("gave up connecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;
