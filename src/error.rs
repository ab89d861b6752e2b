//! Error types for drishti-relay

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// drishti-relay error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Read or write deadline expired
    #[error("operation timed out")]
    Timeout,

    /// Malformed wire frame (sentinel or length inconsistency)
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Buffer used-length exceeds capacity (caller bug)
    #[error("invalid length: {requested} exceeds capacity {capacity}")]
    InvalidLength {
        /// Requested used length
        requested: usize,
        /// Buffer capacity
        capacity: usize,
    },

    /// Peer closed the connection
    #[error("connection closed")]
    Disconnected,

    /// Malformed or inconsistent configuration (fatal at startup)
    #[error("configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
