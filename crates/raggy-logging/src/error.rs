//! Error types for raggy-logging

use thiserror::Error;

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to create rolling appender: {0}")]
    Appender(String),

    #[error("Global subscriber already set: {0}")]
    AlreadyInitialized(String),
}
