//! Error types for oncrpc.

use thiserror::Error;

/// Main error type for all oncrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XDR decode ran past the end of the buffer.
    #[error("buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    /// Accumulated message exceeded the configured size cap.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// Protocol error (malformed header, unexpected field value, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Reply writer task is gone; the connection is shutting down.
    #[error("writer closed")]
    WriterClosed,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
