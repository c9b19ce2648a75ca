//! Error types for Hauptbahnhof

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Static configuration is unusable (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed inbound payload
    #[error("invalid payload on {topic}: {reason}")]
    Validation { topic: String, reason: String },

    /// Translation cycle or a graph deeper than the recursion budget
    #[error("translation of {topic} exceeded recursion depth {depth}")]
    RecursionExceeded { topic: String, depth: usize },

    /// Topic is not mapped by the node
    #[error("topic {0} not present in node mapping")]
    NotFound(String),

    /// Mapping index does not fit the node's state vector
    #[error("mapping index {index} out of bounds for state of len {len}")]
    OutOfRange { index: usize, len: usize },

    /// Wire serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Error codes sent to WebSocket clients in `error` messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    BadRequest = 400,
    Unauthorized = 403,
    ServiceUnavailable = 503,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}
