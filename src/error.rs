//! Error types for tracker signaling and peer negotiation

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while announcing to trackers or negotiating peers
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation attempted on a closed client or registry
    #[error("Client closed")]
    Closed,

    /// Control-channel (WebSocket) transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Peer-connection engine error
    #[error("Peer connection error: {0}")]
    Engine(String),

    /// Malformed 20-byte identifier on the wire
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

impl Error {
    /// Check if this error is transient (the operation may succeed on retry)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Check if this error means the client has been closed
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}
