//! Error types for the titler bridge.

/// Top-level error type for the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A remote call was attempted while the channel is not connected.
    #[error("not connected to the titling engine")]
    NotConnected,

    /// The transport closed before the remote call completed.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The remote object does not expose the requested method.
    #[error("unknown remote method: {0}")]
    UnknownMethod(String),

    /// WebSocket transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine replied with data that is not valid JSON.
    #[error("malformed reply from {method}: {message}")]
    MalformedReply {
        /// Remote method that produced the reply.
        method: String,
        /// Parser message.
        message: String,
    },

    /// Wire protocol violation (unexpected frame, missing field).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Image decode, composite or encode error.
    #[error("image error: {0}")]
    Image(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BridgeError>;
