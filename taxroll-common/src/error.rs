//! Common error types for taxroll

use thiserror::Error;

/// Common result type for taxroll operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the taxroll crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Payload conflicts with authoritative state (e.g. page/county mismatch)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller's role is not in the allow-list for the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}
