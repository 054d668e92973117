//! Error types for observable directories.

use thiserror::Error;

/// Result type alias for observable directory operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while opening, running or closing a session.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The root does not exist or is not a directory.
    #[error("directory not found: {0}")]
    PathNotFound(String),

    /// Caller-context capture was requested outside a tokio runtime.
    #[error("no execution context to capture: not running inside a tokio runtime")]
    NoExecutionContext,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The dispatcher's consumer has exited and can no longer take jobs.
    #[error("dispatcher consumer is gone")]
    ChannelSend,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
