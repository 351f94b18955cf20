//! Error types for the timer engine.

/// Top-level error type for timer operations.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// The requested owner could not be resolved.
    #[error("invalid owner: {0}")]
    InvalidOwner(String),

    /// Timer store persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// A time sentence could not be understood.
    #[error("parse error: {0}")]
    Parse(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed host command payload.
    #[error("command error: {0}")]
    Command(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TimerError>;
