//! Error types for the Turnstile service.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a counter store while running the admission check.
///
/// A store error is never interpreted as a verdict: callers decide how to
/// respond to it.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis connection, I/O or script execution failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The store did not answer before the caller's deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The admission script returned something other than 0 or 1
    #[error("Unexpected store reply: {0}")]
    UnexpectedReply(i64),
}

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
