//! Error types for the pushgate-queue crate.

use std::io;

use thiserror::Error;

/// Top-level queue error type.
///
/// Persist failures are deliberately loud: a message that exhausted its
/// retries has only the queue left as a safety net, so losing the
/// append must surface to the caller rather than being swallowed.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (directory creation, append, read).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record could not be encoded as a JSON line.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue directory validation failed.
    #[error("Queue path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
