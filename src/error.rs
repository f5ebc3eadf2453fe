//! Error types for Floodgate.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The wait queue is at its maximum length
    #[error("Queue full: {max_len} items")]
    QueueFull {
        /// Configured maximum length of the queue
        max_len: usize,
    },

    /// A completion callback was already registered
    #[error("Completion callback already set")]
    CallbackAlreadySet,

    /// The limiter was already started
    #[error("Limiter already started")]
    AlreadyStarted,

    /// No Tokio runtime to spawn background tasks on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
