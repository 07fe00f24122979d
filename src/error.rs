//! Error types for the Windowgate service.

use thiserror::Error;

use crate::ratelimit::LimiterError;
use crate::store::StoreError;

/// Main error type for Windowgate operations.
#[derive(Error, Debug)]
pub enum WindowGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while evaluating a client's quota
    #[error("Limiter error: {0}")]
    Limiter(#[from] LimiterError),

    /// Key-value store errors outside of an evaluation (connect, startup)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Windowgate operations.
pub type Result<T> = std::result::Result<T, WindowGateError>;
