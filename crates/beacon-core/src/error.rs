//! Error types for beacon notification sync.

use thiserror::Error;

/// Result type alias using beacon's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for notification sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Live subscription failed to open, or the transport reported a failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Bounded historical fetch failed.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Remote write (update/delete) was rejected or failed.
    #[error("Write error: {0}")]
    Write(String),

    /// An asynchronous result arrived after its session was torn down.
    #[error("Stale result for session generation {0}")]
    StaleResult(u64),

    /// A mutation was requested while no user session is active.
    #[error("No active notification session")]
    NoActiveSession,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
